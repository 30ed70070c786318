use std::sync::Arc;
use std::time::Duration;

use crate::crypto::signing::PrivateKey;
use crate::crypto::{
    create_cipher_suite, default_cipher_suite_ids, CertificateType, CipherSuite, CipherSuiteFactory,
    CipherSuiteId,
};
use crate::message::extensions::{
    default_signature_schemes, SignatureHashAlgorithm, SrtpProfile,
};
use crate::Error;

/// Called once the remote's PSK identity hint is known (`None` when the
/// remote provided none); returns the pre-shared key to use.
pub type PskCallback = dyn Fn(Option<&[u8]>) -> Result<Vec<u8>, String> + Send + Sync;

/// Called with the peer's raw DER certificate chain after the in-engine
/// signature checks pass. Chain/hostname validation lives here; returning an
/// error aborts the handshake with a bad_certificate alert.
pub type VerifyPeerCertificate = dyn Fn(&[Vec<u8>]) -> Result<(), String> + Send + Sync;

/// Server policy for client certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ClientAuthType {
    #[default]
    NoClientCert,
    RequestClientCert,
    RequireAnyClientCert,
    VerifyClientCertIfGiven,
    RequireAndVerifyClientCert,
}

/// Policy for the Extended Master Secret extension (RFC 7627).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtendedMasterSecretType {
    #[default]
    Request,
    Require,
    Disable,
}

/// A local certificate chain and its private key.
#[derive(Debug, Clone)]
pub struct DtlsCertificate {
    pub certificate_chain: Vec<Vec<u8>>,
    pub(crate) private_key: Arc<PrivateKey>,
}

impl DtlsCertificate {
    /// `chain` is leaf-first DER; `private_key_der` is PKCS#8 DER (P-256
    /// ECDSA or RSA).
    pub fn new(chain: Vec<Vec<u8>>, private_key_der: &[u8]) -> Result<Self, Error> {
        if chain.is_empty() {
            return Err(Error::InvalidCertificate);
        }
        let private_key = Arc::new(PrivateKey::from_pkcs8_der(private_key_der)?);
        Ok(DtlsCertificate {
            certificate_chain: chain,
            private_key,
        })
    }

    pub(crate) fn certificate_type(&self) -> CertificateType {
        match self.private_key.as_ref() {
            PrivateKey::Ecdsa(_) => CertificateType::EcdsaSign,
            PrivateKey::Rsa(_) => CertificateType::RsaSign,
        }
    }
}

/// An exported session, stored by a [`SessionStore`] for resumption.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Vec<u8>,
    pub secret: Vec<u8>,
}

/// External storage collaborator for session resumption.
pub trait SessionStore: Send + Sync {
    fn set(&self, id: &[u8], session: Session) -> Result<(), String>;
    fn get(&self, id: &[u8]) -> Result<Option<Session>, String>;
    fn del(&self, id: &[u8]) -> Result<(), String>;
}

/// DTLS configuration, shared between client and server roles.
#[derive(Clone)]
pub struct Config {
    mtu: usize,
    replay_protection_window: usize,
    retransmit_interval: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    cipher_suites: Option<Vec<CipherSuiteId>>,
    custom_cipher_suites: Option<CipherSuiteFactory>,
    signature_schemes: Vec<SignatureHashAlgorithm>,
    psk: Option<Arc<PskCallback>>,
    psk_identity_hint: Option<Vec<u8>>,
    extended_master_secret: ExtendedMasterSecretType,
    srtp_protection_profiles: Vec<SrtpProfile>,
    client_auth: ClientAuthType,
    certificates: Vec<DtlsCertificate>,
    insecure_skip_verify: bool,
    verify_peer_certificate: Option<Arc<VerifyPeerCertificate>>,
    server_name: String,
    alpn_protocols: Vec<String>,
    insecure_skip_hello_verify: bool,
    session_store: Option<Arc<dyn SessionStore>>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: 1200,
            replay_protection_window: 64,
            retransmit_interval: Duration::from_secs(1),
            flight_retries: 6,
            handshake_timeout: Duration::from_secs(30),
            cipher_suites: None,
            custom_cipher_suites: None,
            signature_schemes: default_signature_schemes().to_vec(),
            psk: None,
            psk_identity_hint: None,
            extended_master_secret: ExtendedMasterSecretType::Request,
            srtp_protection_profiles: Vec::new(),
            client_auth: ClientAuthType::NoClientCert,
            certificates: Vec::new(),
            insecure_skip_verify: false,
            verify_peer_certificate: None,
            server_name: String::new(),
            alpn_protocols: Vec::new(),
            insecure_skip_hello_verify: false,
            session_store: None,
        }
    }

    /// Max transmission unit: fragmentation threshold for handshake messages
    /// and the coalescing limit for outbound datagrams.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Sliding replay window size per epoch (RFC 6347 4.1.2.6, default 64).
    #[inline(always)]
    pub fn replay_protection_window(&self) -> usize {
        self.replay_protection_window
    }

    /// Initial flight retransmission interval; doubles per retry.
    #[inline(always)]
    pub fn retransmit_interval(&self) -> Duration {
        self.retransmit_interval
    }

    /// Max retransmissions per flight before the handshake times out.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Deadline for the entire handshake, regardless of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    #[inline(always)]
    pub fn extended_master_secret(&self) -> ExtendedMasterSecretType {
        self.extended_master_secret
    }

    #[inline(always)]
    pub fn srtp_protection_profiles(&self) -> &[SrtpProfile] {
        &self.srtp_protection_profiles
    }

    #[inline(always)]
    pub fn client_auth(&self) -> ClientAuthType {
        self.client_auth
    }

    #[inline(always)]
    pub fn certificates(&self) -> &[DtlsCertificate] {
        &self.certificates
    }

    #[inline(always)]
    pub fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }

    #[inline(always)]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    #[inline(always)]
    pub fn alpn_protocols(&self) -> &[String] {
        &self.alpn_protocols
    }

    #[inline(always)]
    pub fn insecure_skip_hello_verify(&self) -> bool {
        self.insecure_skip_hello_verify
    }

    #[inline(always)]
    pub fn signature_schemes(&self) -> &[SignatureHashAlgorithm] {
        &self.signature_schemes
    }

    pub(crate) fn psk(&self) -> Option<&Arc<PskCallback>> {
        self.psk.as_ref()
    }

    pub(crate) fn psk_identity_hint(&self) -> Option<&[u8]> {
        self.psk_identity_hint.as_deref()
    }

    pub(crate) fn verify_peer_certificate(&self) -> Option<&Arc<VerifyPeerCertificate>> {
        self.verify_peer_certificate.as_ref()
    }

    pub(crate) fn session_store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.session_store.as_ref()
    }

    /// The suite ids this side offers/accepts.
    pub(crate) fn local_cipher_suite_ids(&self) -> Vec<CipherSuiteId> {
        match &self.cipher_suites {
            Some(ids) => ids.clone(),
            None => default_cipher_suite_ids(!self.certificates.is_empty(), self.psk.is_some()),
        }
    }

    /// Instantiate a fresh suite object for this connection.
    pub(crate) fn create_cipher_suite(&self, id: CipherSuiteId) -> Arc<dyn CipherSuite> {
        if let Some(factory) = &self.custom_cipher_suites {
            if let Some(suite) = factory(id) {
                return suite;
            }
        }
        create_cipher_suite(id)
    }

    /// The local certificate matching a suite's required key type.
    pub(crate) fn certificate_for(&self, wanted: CertificateType) -> Option<&DtlsCertificate> {
        self.certificates
            .iter()
            .find(|cert| cert.certificate_type() == wanted)
    }
}

pub struct ConfigBuilder {
    mtu: usize,
    replay_protection_window: usize,
    retransmit_interval: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    cipher_suites: Option<Vec<CipherSuiteId>>,
    custom_cipher_suites: Option<CipherSuiteFactory>,
    signature_schemes: Vec<SignatureHashAlgorithm>,
    psk: Option<Arc<PskCallback>>,
    psk_identity_hint: Option<Vec<u8>>,
    extended_master_secret: ExtendedMasterSecretType,
    srtp_protection_profiles: Vec<SrtpProfile>,
    client_auth: ClientAuthType,
    certificates: Vec<DtlsCertificate>,
    insecure_skip_verify: bool,
    verify_peer_certificate: Option<Arc<VerifyPeerCertificate>>,
    server_name: String,
    alpn_protocols: Vec<String>,
    insecure_skip_hello_verify: bool,
    session_store: Option<Arc<dyn SessionStore>>,
}

impl ConfigBuilder {
    /// Defaults to 1200 bytes.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Defaults to 64.
    pub fn replay_protection_window(mut self, window: usize) -> Self {
        self.replay_protection_window = window;
        self
    }

    /// Defaults to 1 second.
    pub fn retransmit_interval(mut self, interval: Duration) -> Self {
        self.retransmit_interval = interval;
        self
    }

    /// Defaults to 6.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Defaults to 30 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Restrict the offered cipher suites. By default the list is derived
    /// from the configured credentials.
    pub fn cipher_suites(mut self, suites: Vec<CipherSuiteId>) -> Self {
        self.cipher_suites = Some(suites);
        self
    }

    /// Inject custom suite implementations (returned per negotiated id).
    pub fn custom_cipher_suites(mut self, factory: CipherSuiteFactory) -> Self {
        self.custom_cipher_suites = Some(factory);
        self
    }

    /// Use PSK key exchange. `identity_hint` is sent to the peer; clients
    /// must set it.
    pub fn psk(mut self, callback: Arc<PskCallback>, identity_hint: Option<Vec<u8>>) -> Self {
        self.psk = Some(callback);
        self.psk_identity_hint = identity_hint;
        self
    }

    /// Defaults to `Request`.
    pub fn extended_master_secret(mut self, policy: ExtendedMasterSecretType) -> Self {
        self.extended_master_secret = policy;
        self
    }

    /// Offer DTLS-SRTP protection profiles (RFC 5764). Empty disables the
    /// use_srtp extension.
    pub fn srtp_protection_profiles(mut self, profiles: Vec<SrtpProfile>) -> Self {
        self.srtp_protection_profiles = profiles;
        self
    }

    /// Server-side client certificate policy. Defaults to `NoClientCert`.
    pub fn client_auth(mut self, policy: ClientAuthType) -> Self {
        self.client_auth = policy;
        self
    }

    pub fn certificate(mut self, certificate: DtlsCertificate) -> Self {
        self.certificates.push(certificate);
        self
    }

    /// Accept any peer certificate. Testing only; man-in-the-middle becomes
    /// trivial otherwise.
    pub fn insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    pub fn verify_peer_certificate(mut self, verify: Arc<VerifyPeerCertificate>) -> Self {
        self.verify_peer_certificate = Some(verify);
        self
    }

    /// Sent in the server_name extension by clients.
    pub fn server_name(mut self, name: &str) -> Self {
        self.server_name = name.to_string();
        self
    }

    /// ALPN protocols, preference order.
    pub fn alpn_protocols(mut self, protocols: Vec<String>) -> Self {
        self.alpn_protocols = protocols;
        self
    }

    /// Server skips the HelloVerifyRequest round trip. Weakens DoS
    /// amplification resistance (RFC 6347 4.2.1).
    pub fn insecure_skip_hello_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_hello_verify = skip;
        self
    }

    /// Enable session resumption backed by external storage.
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn build(self) -> Result<Config, Error> {
        if let Some(ids) = &self.cipher_suites {
            if ids.is_empty() {
                return Err(Error::CipherSuiteNoIntersection);
            }
        }

        Ok(Config {
            mtu: self.mtu,
            replay_protection_window: self.replay_protection_window,
            retransmit_interval: self.retransmit_interval,
            flight_retries: self.flight_retries,
            handshake_timeout: self.handshake_timeout,
            cipher_suites: self.cipher_suites,
            custom_cipher_suites: self.custom_cipher_suites,
            signature_schemes: self.signature_schemes,
            psk: self.psk,
            psk_identity_hint: self.psk_identity_hint,
            extended_master_secret: self.extended_master_secret,
            srtp_protection_profiles: self.srtp_protection_profiles,
            client_auth: self.client_auth,
            certificates: self.certificates,
            insecure_skip_verify: self.insecure_skip_verify,
            verify_peer_certificate: self.verify_peer_certificate,
            server_name: self.server_name,
            alpn_protocols: self.alpn_protocols,
            insecure_skip_hello_verify: self.insecure_skip_hello_verify,
            session_store: self.session_store,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("default config always validates")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_suite_list_is_rejected() {
        let result = Config::builder().cipher_suites(Vec::new()).build();
        assert_eq!(result.err(), Some(Error::CipherSuiteNoIntersection));
    }

    #[test]
    fn default_suites_follow_credentials() {
        let config = Config::default();
        assert_eq!(config.local_cipher_suite_ids().len(), 2);

        let psk_config = Config::builder()
            .psk(Arc::new(|_| Ok(vec![1, 2, 3])), Some(b"id".to_vec()))
            .build()
            .unwrap();
        assert_eq!(
            psk_config.local_cipher_suite_ids(),
            vec![CipherSuiteId::PSK_AES128_GCM_SHA256]
        );
    }
}
