//! Signature generation and verification for ServerKeyExchange and
//! CertificateVerify, plus SPKI extraction from peer certificates.

use der::Decode;
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey, VerifyingKey};
use signature::{SignatureEncoding, Signer, Verifier};
use pkcs8::DecodePrivateKey;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::message::extensions::{
    HashAlgorithm, NamedCurve, SignatureAlgorithm, SignatureHashAlgorithm,
};
use crate::Error;

const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";

/// A parsed local private key.
pub enum PrivateKey {
    Ecdsa(P256SigningKey),
    Rsa(RsaPrivateKey),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrivateKey::Ecdsa(_) => f.write_str("PrivateKey::Ecdsa"),
            PrivateKey::Rsa(_) => f.write_str("PrivateKey::Rsa"),
        }
    }
}

impl PrivateKey {
    /// Parse a PKCS#8 DER private key (P-256 ECDSA or RSA).
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, Error> {
        if let Ok(key) = P256SigningKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::Ecdsa(key));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs8_der(der) {
            return Ok(PrivateKey::Rsa(key));
        }
        Err(Error::InvalidPrivateKey)
    }

    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            PrivateKey::Ecdsa(_) => SignatureAlgorithm::Ecdsa,
            PrivateKey::Rsa(_) => SignatureAlgorithm::Rsa,
        }
    }

    pub fn sign(&self, data: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>, Error> {
        if hash != HashAlgorithm::Sha256 {
            return Err(Error::Crypto("unsupported signing hash".into()));
        }
        match self {
            PrivateKey::Ecdsa(key) => {
                let signature: P256Signature = key.sign(data);
                Ok(signature.to_der().to_vec())
            }
            PrivateKey::Rsa(key) => {
                let digest = Sha256::digest(data);
                key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|e| Error::Crypto(format!("RSA signing failed: {e}")))
            }
        }
    }
}

/// A peer's leaf public key, extracted from its certificate.
pub enum PublicKey {
    Ecdsa(VerifyingKey),
    Rsa(RsaPublicKey),
}

/// Pull the SubjectPublicKeyInfo out of a DER certificate. Chain validation
/// is the caller's collaborator; only the leaf key is needed to check
/// handshake signatures.
pub fn leaf_public_key(cert_der: &[u8]) -> Result<PublicKey, Error> {
    let cert = x509_cert::Certificate::from_der(cert_der)
        .map_err(|e| Error::BadCertificate(format!("certificate parse failed: {e}")))?;

    let spki = &cert.tbs_certificate.subject_public_key_info;
    let raw = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| Error::BadCertificate("unaligned public key bits".into()))?;

    if spki.algorithm.oid == spki::ObjectIdentifier::new_unwrap(OID_EC_PUBLIC_KEY) {
        let key = VerifyingKey::from_sec1_bytes(raw)
            .map_err(|_| Error::BadCertificate("invalid EC public key".into()))?;
        Ok(PublicKey::Ecdsa(key))
    } else if spki.algorithm.oid == spki::ObjectIdentifier::new_unwrap(OID_RSA_ENCRYPTION) {
        let key = RsaPublicKey::from_pkcs1_der(raw)
            .map_err(|_| Error::BadCertificate("invalid RSA public key".into()))?;
        Ok(PublicKey::Rsa(key))
    } else {
        Err(Error::BadCertificate(format!(
            "unsupported public key algorithm {}",
            spki.algorithm.oid
        )))
    }
}

/// Verify a handshake signature with the peer's leaf key. The scheme must
/// already be checked against the locally advertised list.
pub fn verify_signature(
    public_key: &PublicKey,
    scheme: SignatureHashAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> Result<(), Error> {
    if scheme.hash != HashAlgorithm::Sha256 {
        return Err(Error::Crypto("unsupported signature hash".into()));
    }

    match (public_key, scheme.signature) {
        (PublicKey::Ecdsa(key), SignatureAlgorithm::Ecdsa) => {
            let signature = P256Signature::from_der(signature)
                .map_err(|_| Error::KeySignatureMismatch)?;
            key.verify(message, &signature)
                .map_err(|_| Error::KeySignatureMismatch)
        }
        (PublicKey::Rsa(key), SignatureAlgorithm::Rsa) => {
            let digest = Sha256::digest(message);
            key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
                .map_err(|_| Error::KeySignatureMismatch)
        }
        _ => Err(Error::KeySignatureMismatch),
    }
}

/// Pick the first locally advertised scheme compatible with `key`.
pub fn select_signature_scheme(
    local: &[SignatureHashAlgorithm],
    key: &PrivateKey,
) -> Result<SignatureHashAlgorithm, Error> {
    let algorithm = key.signature_algorithm();
    local
        .iter()
        .find(|scheme| scheme.signature == algorithm && scheme.hash == HashAlgorithm::Sha256)
        .copied()
        .ok_or(Error::NoAvailableSignatureSchemes)
}

/// The exact bytes a ServerKeyExchange signature covers
/// (RFC 8422 Section 5.4): both randoms plus the ECDH parameters.
pub fn value_key_message(
    client_random: &[u8],
    server_random: &[u8],
    public_key: &[u8],
    curve: NamedCurve,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(client_random.len() + server_random.len() + 4 + public_key.len());
    out.extend_from_slice(client_random);
    out.extend_from_slice(server_random);
    out.push(3); // named_curve
    out.extend_from_slice(&curve.as_u16().to_be_bytes());
    out.push(public_key.len() as u8);
    out.extend_from_slice(public_key);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn ecdsa_sign_verify_roundtrip() {
        let signing = P256SigningKey::random(&mut OsRng);
        let verifying = VerifyingKey::from(&signing);
        let key = PrivateKey::Ecdsa(signing);

        let message = value_key_message(&[1; 32], &[2; 32], &[4; 65], NamedCurve::Secp256r1);
        let signature = key.sign(&message, HashAlgorithm::Sha256).unwrap();

        let public = PublicKey::Ecdsa(verifying);
        verify_signature(
            &public,
            SignatureHashAlgorithm::ECDSA_SHA256,
            &message,
            &signature,
        )
        .unwrap();

        // A different message must not verify.
        let other = value_key_message(&[9; 32], &[2; 32], &[4; 65], NamedCurve::Secp256r1);
        assert_eq!(
            verify_signature(
                &public,
                SignatureHashAlgorithm::ECDSA_SHA256,
                &other,
                &signature
            ),
            Err(Error::KeySignatureMismatch)
        );
    }

    #[test]
    fn scheme_selection_matches_key_type() {
        let key = PrivateKey::Ecdsa(P256SigningKey::random(&mut OsRng));
        let local = [
            SignatureHashAlgorithm::RSA_SHA256,
            SignatureHashAlgorithm::ECDSA_SHA256,
        ];
        assert_eq!(
            select_signature_scheme(&local, &key).unwrap(),
            SignatureHashAlgorithm::ECDSA_SHA256
        );
        assert_eq!(
            select_signature_scheme(&[SignatureHashAlgorithm::RSA_SHA256], &key),
            Err(Error::NoAvailableSignatureSchemes)
        );
    }
}
