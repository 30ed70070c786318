//! Wire codecs for the DTLS 1.2 record layer and handshake messages.
//!
//! Each message pairs a nom parser with a `serialize` that byte-matches the
//! RFC 6347/5246 layouts.

mod alert;
mod certificate;
mod certificate_request;
mod certificate_verify;
mod client_hello;
mod client_key_exchange;
pub mod extension;
pub mod extensions;
mod finished;
mod handshake;
mod hello_verify_request;
mod random;
mod record;
mod server_hello;
mod server_key_exchange;
pub(crate) mod util;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use certificate::Certificate;
pub use certificate_request::{CertificateRequest, ClientCertificateType};
pub use certificate_verify::CertificateVerify;
pub use client_hello::ClientHello;
pub use client_key_exchange::ClientKeyExchange;
pub use extension::Extension;
pub use finished::{ChangeCipherSpec, Finished};
pub use handshake::{Body, Handshake, Header, MessageType, HANDSHAKE_HEADER_SIZE};
pub use hello_verify_request::HelloVerifyRequest;
pub use random::{Random, RANDOM_LENGTH};
pub use record::{
    unpack_datagram, ContentType, DtlsRecord, RecordHeader, MAX_SEQUENCE_NUMBER, RECORD_HEADER_SIZE,
};
pub use server_hello::ServerHello;
pub use server_key_exchange::ServerKeyExchange;

use nom::number::complete::be_u8;
use nom::IResult;

/// Protocol versions tolerated on the wire: DTLS 1.0 appears in legacy
/// ClientHello compatibility paths, DTLS 1.2 everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(non_camel_case_types)]
pub enum ProtocolVersion {
    DTLS1_0,
    #[default]
    DTLS1_2,
}

impl ProtocolVersion {
    pub fn from_bytes(major: u8, minor: u8) -> Option<Self> {
        match (major, minor) {
            (0xFE, 0xFF) => Some(ProtocolVersion::DTLS1_0),
            (0xFE, 0xFD) => Some(ProtocolVersion::DTLS1_2),
            _ => None,
        }
    }

    pub fn bytes(&self) -> [u8; 2] {
        match self {
            ProtocolVersion::DTLS1_0 => [0xFE, 0xFF],
            ProtocolVersion::DTLS1_2 => [0xFE, 0xFD],
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, major) = be_u8(input)?;
        let (input, minor) = be_u8(input)?;
        let version = Self::from_bytes(major, minor).ok_or_else(|| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
        })?;
        Ok((input, version))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.bytes());
    }
}
