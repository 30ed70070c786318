//! Cipher suite lifecycle and the cryptographic operations the handshake
//! engine needs. The engine itself never inspects key material; it drives
//! everything through the [`CipherSuite`] capability.

pub(crate) mod gcm;
pub(crate) mod key_exchange;
pub(crate) mod prf;
pub(crate) mod signing;
mod suites;

use std::fmt;
use std::sync::Arc;

use crate::message::extensions::HashAlgorithm;
use crate::Error;

pub use suites::Aes128GcmSuite;

/// Cipher suite identifiers (IANA registry values) this crate implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum CipherSuiteId {
    ECDHE_ECDSA_AES128_GCM_SHA256,
    ECDHE_RSA_AES128_GCM_SHA256,
    PSK_AES128_GCM_SHA256,
}

impl CipherSuiteId {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0xC02B => Some(CipherSuiteId::ECDHE_ECDSA_AES128_GCM_SHA256),
            0xC02F => Some(CipherSuiteId::ECDHE_RSA_AES128_GCM_SHA256),
            0x00A8 => Some(CipherSuiteId::PSK_AES128_GCM_SHA256),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuiteId::ECDHE_ECDSA_AES128_GCM_SHA256 => 0xC02B,
            CipherSuiteId::ECDHE_RSA_AES128_GCM_SHA256 => 0xC02F,
            CipherSuiteId::PSK_AES128_GCM_SHA256 => 0x00A8,
        }
    }
}

impl fmt::Display for CipherSuiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlgorithm {
    Ecdhe,
    Psk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationType {
    Certificate,
    PreSharedKey,
}

/// Which kind of local certificate/key a suite requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateType {
    EcdsaSign,
    RsaSign,
}

/// The capability the engine holds for all record cryptography.
///
/// `init` is invoked exactly once per connection, after premaster derivation
/// and (when negotiated) session-hash computation; `is_initialized` guards
/// it. Calling `encrypt`/`decrypt` earlier is a programmer error surfaced as
/// [`Error::CipherSuiteNotInitialized`].
pub trait CipherSuite: Send + Sync + fmt::Debug {
    fn id(&self) -> CipherSuiteId;

    fn certificate_type(&self) -> Option<CertificateType>;

    fn authentication_type(&self) -> AuthenticationType;

    fn key_exchange_algorithm(&self) -> KeyExchangeAlgorithm;

    fn hash_algorithm(&self) -> HashAlgorithm;

    fn is_initialized(&self) -> bool;

    fn init(
        &self,
        master_secret: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
        is_client: bool,
    ) -> Result<(), Error>;

    /// Encrypt a marshaled plaintext record (header included); returns the
    /// full ciphertext record with its length field rewritten.
    fn encrypt(&self, raw: &[u8]) -> Result<Vec<u8>, Error>;

    /// Inverse of `encrypt`.
    fn decrypt(&self, raw: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Hook for injecting suite implementations (the config's
/// `custom_cipher_suites`). Tests use this to wrap suites with counters.
pub type CipherSuiteFactory =
    Arc<dyn Fn(CipherSuiteId) -> Option<Arc<dyn CipherSuite>> + Send + Sync>;

/// Instantiate a built-in suite.
pub fn create_cipher_suite(id: CipherSuiteId) -> Arc<dyn CipherSuite> {
    Arc::new(Aes128GcmSuite::new(id))
}

/// Default offered suites given what credentials the config holds, mirroring
/// the original's suite selection: PSK configs offer PSK suites, certificate
/// configs offer certificate suites.
pub fn default_cipher_suite_ids(have_certificate: bool, have_psk: bool) -> Vec<CipherSuiteId> {
    let mut out = Vec::new();
    if have_certificate || !have_psk {
        out.push(CipherSuiteId::ECDHE_ECDSA_AES128_GCM_SHA256);
        out.push(CipherSuiteId::ECDHE_RSA_AES128_GCM_SHA256);
    }
    if have_psk {
        out.push(CipherSuiteId::PSK_AES128_GCM_SHA256);
    }
    out
}

/// First of the peer's suites that we also offer (peer preference order).
pub(crate) fn find_matching_cipher_suite(
    peer: &[u16],
    local: &[CipherSuiteId],
) -> Option<CipherSuiteId> {
    peer.iter()
        .filter_map(|id| CipherSuiteId::from_u16(*id))
        .find(|id| local.contains(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip() {
        for id in [
            CipherSuiteId::ECDHE_ECDSA_AES128_GCM_SHA256,
            CipherSuiteId::ECDHE_RSA_AES128_GCM_SHA256,
            CipherSuiteId::PSK_AES128_GCM_SHA256,
        ] {
            assert_eq!(CipherSuiteId::from_u16(id.as_u16()), Some(id));
        }
        assert_eq!(CipherSuiteId::from_u16(0x1234), None);
    }

    #[test]
    fn suite_matching_prefers_peer_order() {
        let local = vec![
            CipherSuiteId::ECDHE_ECDSA_AES128_GCM_SHA256,
            CipherSuiteId::ECDHE_RSA_AES128_GCM_SHA256,
        ];
        let peer = [0x1234, 0xC02F, 0xC02B];
        assert_eq!(
            find_matching_cipher_suite(&peer, &local),
            Some(CipherSuiteId::ECDHE_RSA_AES128_GCM_SHA256)
        );
        assert_eq!(find_matching_cipher_suite(&[0x1234], &local), None);
    }

    #[test]
    fn default_suites_by_credentials() {
        assert_eq!(default_cipher_suite_ids(false, false).len(), 2);
        assert_eq!(
            default_cipher_suite_ids(false, true),
            vec![CipherSuiteId::PSK_AES128_GCM_SHA256]
        );
        assert_eq!(default_cipher_suite_ids(true, true).len(), 3);
    }
}
