use elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::ecdh::EphemeralSecret as P256EphemeralSecret;
use p256::PublicKey as P256PublicKey;
use rand::rngs::OsRng;
use x25519_dalek::{EphemeralSecret as X25519EphemeralSecret, PublicKey as X25519PublicKey};

use crate::message::extensions::NamedCurve;
use crate::Error;

/// Ephemeral ECDH keypair for one handshake.
///
/// The public key is cached at generation so it survives the X25519 secret
/// being consumed by the Diffie-Hellman computation.
pub(crate) struct KeyExchange {
    curve: NamedCurve,
    inner: Inner,
    public_key: Vec<u8>,
}

enum Inner {
    X25519(Option<X25519EphemeralSecret>),
    P256(Option<P256EphemeralSecret>),
}

impl std::fmt::Debug for KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyExchange({:?})", self.curve)
    }
}

impl KeyExchange {
    pub fn generate(curve: NamedCurve) -> Self {
        match curve {
            NamedCurve::X25519 => {
                let secret = X25519EphemeralSecret::random_from_rng(OsRng);
                let public_key = X25519PublicKey::from(&secret).as_bytes().to_vec();
                KeyExchange {
                    curve,
                    inner: Inner::X25519(Some(secret)),
                    public_key,
                }
            }
            NamedCurve::Secp256r1 => {
                let secret = P256EphemeralSecret::random(&mut OsRng);
                let public_key = secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                KeyExchange {
                    curve,
                    inner: Inner::P256(Some(secret)),
                    public_key,
                }
            }
        }
    }

    pub fn curve(&self) -> NamedCurve {
        self.curve
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Compute the ECDH shared secret with the peer's public key. Consumes
    /// the private part; a second call is an internal error.
    pub fn shared_secret(&mut self, peer_public_key: &[u8]) -> Result<Vec<u8>, Error> {
        match &mut self.inner {
            Inner::X25519(secret) => {
                let secret = secret
                    .take()
                    .ok_or(Error::Internal("key exchange private key already used"))?;
                let bytes: [u8; 32] = peer_public_key
                    .try_into()
                    .map_err(|_| Error::Crypto("invalid X25519 public key length".into()))?;
                let shared = secret.diffie_hellman(&X25519PublicKey::from(bytes));
                Ok(shared.as_bytes().to_vec())
            }
            Inner::P256(secret) => {
                let secret = secret
                    .take()
                    .ok_or(Error::Internal("key exchange private key already used"))?;
                let point = p256::EncodedPoint::from_bytes(peer_public_key)
                    .map_err(|_| Error::Crypto("invalid P-256 public key".into()))?;
                let public: P256PublicKey = Option::from(P256PublicKey::from_encoded_point(&point))
                    .ok_or_else(|| Error::Crypto("invalid P-256 public key point".into()))?;
                let shared = secret.diffie_hellman(&public);
                Ok(shared.raw_secret_bytes().as_slice().to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x25519_agreement() {
        let mut a = KeyExchange::generate(NamedCurve::X25519);
        let mut b = KeyExchange::generate(NamedCurve::X25519);
        assert_eq!(a.public_key().len(), 32);

        let bp = b.public_key().to_vec();
        let ap = a.public_key().to_vec();
        let sa = a.shared_secret(&bp).unwrap();
        let sb = b.shared_secret(&ap).unwrap();
        assert_eq!(sa, sb);

        // The private part is single-use.
        assert!(a.shared_secret(&bp).is_err());
    }

    #[test]
    fn p256_agreement() {
        let mut a = KeyExchange::generate(NamedCurve::Secp256r1);
        let mut b = KeyExchange::generate(NamedCurve::Secp256r1);
        assert_eq!(a.public_key().len(), 65);
        assert_eq!(a.public_key()[0], 0x04); // uncompressed point

        let bp = b.public_key().to_vec();
        let ap = a.public_key().to_vec();
        assert_eq!(a.shared_secret(&bp).unwrap(), b.shared_secret(&ap).unwrap());
    }

    #[test]
    fn rejects_garbage_peer_key() {
        let mut a = KeyExchange::generate(NamedCurve::Secp256r1);
        assert!(a.shared_secret(&[0u8; 65]).is_err());
    }
}
