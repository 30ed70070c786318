mod alpn;
mod server_name;
mod signature_algorithms;
mod supported_groups;
mod use_srtp;

pub use alpn::{alpn_protocol_selection, AlpnExt};
pub use server_name::ServerNameExt;
pub use signature_algorithms::{
    default_signature_schemes, is_advertised_scheme, HashAlgorithm, SignatureAlgorithm,
    SignatureAlgorithmsExt, SignatureHashAlgorithm,
};
pub use supported_groups::{default_curves, NamedCurve, SupportedGroupsExt};
pub use use_srtp::{find_matching_srtp_profile, SrtpProfile, UseSrtpExt};
