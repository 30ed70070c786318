use std::sync::OnceLock;

use super::gcm::{RecordGcm, WRITE_IV_LENGTH, WRITE_KEY_LENGTH};
use super::{prf, AuthenticationType, CertificateType, CipherSuite, CipherSuiteId, KeyExchangeAlgorithm};
use crate::message::extensions::HashAlgorithm;
use crate::Error;

/// The AES-128-GCM suites. Key state is published once through an
/// `OnceLock`: readers either see no keys or fully-derived keys, never a
/// partially initialized suite.
#[derive(Debug)]
pub struct Aes128GcmSuite {
    id: CipherSuiteId,
    keys: OnceLock<RecordGcm>,
}

impl Aes128GcmSuite {
    pub fn new(id: CipherSuiteId) -> Self {
        Aes128GcmSuite {
            id,
            keys: OnceLock::new(),
        }
    }

    fn keys(&self) -> Result<&RecordGcm, Error> {
        self.keys.get().ok_or(Error::CipherSuiteNotInitialized)
    }
}

impl CipherSuite for Aes128GcmSuite {
    fn id(&self) -> CipherSuiteId {
        self.id
    }

    fn certificate_type(&self) -> Option<CertificateType> {
        match self.id {
            CipherSuiteId::ECDHE_ECDSA_AES128_GCM_SHA256 => Some(CertificateType::EcdsaSign),
            CipherSuiteId::ECDHE_RSA_AES128_GCM_SHA256 => Some(CertificateType::RsaSign),
            CipherSuiteId::PSK_AES128_GCM_SHA256 => None,
        }
    }

    fn authentication_type(&self) -> AuthenticationType {
        match self.id {
            CipherSuiteId::PSK_AES128_GCM_SHA256 => AuthenticationType::PreSharedKey,
            _ => AuthenticationType::Certificate,
        }
    }

    fn key_exchange_algorithm(&self) -> KeyExchangeAlgorithm {
        match self.id {
            CipherSuiteId::PSK_AES128_GCM_SHA256 => KeyExchangeAlgorithm::Psk,
            _ => KeyExchangeAlgorithm::Ecdhe,
        }
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha256
    }

    fn is_initialized(&self) -> bool {
        self.keys.get().is_some()
    }

    fn init(
        &self,
        master_secret: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
        is_client: bool,
    ) -> Result<(), Error> {
        let total = 2 * (WRITE_KEY_LENGTH + WRITE_IV_LENGTH);
        let block = prf::key_expansion(
            self.hash_algorithm(),
            master_secret,
            client_random,
            server_random,
            total,
        )?;

        let (client_key, rest) = block.split_at(WRITE_KEY_LENGTH);
        let (server_key, rest) = rest.split_at(WRITE_KEY_LENGTH);
        let (client_iv, server_iv) = rest.split_at(WRITE_IV_LENGTH);

        let gcm = if is_client {
            RecordGcm::new(client_key, client_iv, server_key, server_iv)?
        } else {
            RecordGcm::new(server_key, server_iv, client_key, client_iv)?
        };

        self.keys
            .set(gcm)
            .map_err(|_| Error::Internal("cipher suite initialized twice"))
    }

    fn encrypt(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        self.keys()?.encrypt(raw)
    }

    fn decrypt(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        self.keys()?.decrypt(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ContentType, ProtocolVersion, RecordHeader};

    fn record(body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        RecordHeader {
            content_type: ContentType::ApplicationData,
            version: ProtocolVersion::DTLS1_2,
            epoch: 1,
            sequence_number: 7,
            length: body.len() as u16,
        }
        .serialize(&mut out);
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn uninitialized_is_an_error() {
        let suite = Aes128GcmSuite::new(CipherSuiteId::ECDHE_ECDSA_AES128_GCM_SHA256);
        assert!(!suite.is_initialized());
        assert_eq!(
            suite.encrypt(&record(b"x")),
            Err(Error::CipherSuiteNotInitialized)
        );
        assert_eq!(
            suite.decrypt(&record(b"x")),
            Err(Error::CipherSuiteNotInitialized)
        );
    }

    #[test]
    fn client_and_server_interoperate() {
        let client = Aes128GcmSuite::new(CipherSuiteId::ECDHE_ECDSA_AES128_GCM_SHA256);
        let server = Aes128GcmSuite::new(CipherSuiteId::ECDHE_ECDSA_AES128_GCM_SHA256);

        let master = [9u8; 48];
        let cr = [1u8; 32];
        let sr = [2u8; 32];
        client.init(&master, &cr, &sr, true).unwrap();
        server.init(&master, &cr, &sr, false).unwrap();
        assert!(client.is_initialized());

        let plain = record(b"application bytes");
        let wire = client.encrypt(&plain).unwrap();
        assert_eq!(server.decrypt(&wire).unwrap(), plain);

        let reply = record(b"reply");
        let wire = server.encrypt(&reply).unwrap();
        assert_eq!(client.decrypt(&wire).unwrap(), reply);
    }

    #[test]
    fn double_init_is_rejected() {
        let suite = Aes128GcmSuite::new(CipherSuiteId::PSK_AES128_GCM_SHA256);
        let master = [9u8; 48];
        suite.init(&master, &[1; 32], &[2; 32], true).unwrap();
        assert!(suite.init(&master, &[1; 32], &[2; 32], true).is_err());
    }
}
