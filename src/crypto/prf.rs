//! TLS 1.2 PRF (RFC 5246 Section 5) and the derived handshake secrets.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384};

use crate::message::extensions::HashAlgorithm;
use crate::Error;

pub const MASTER_SECRET_LENGTH: usize = 48;
pub const VERIFY_DATA_LENGTH: usize = 12;

const LABEL_MASTER_SECRET: &[u8] = b"master secret";
const LABEL_EXTENDED_MASTER_SECRET: &[u8] = b"extended master secret";
const LABEL_KEY_EXPANSION: &[u8] = b"key expansion";
const LABEL_CLIENT_FINISHED: &[u8] = b"client finished";
const LABEL_SERVER_FINISHED: &[u8] = b"server finished";

fn hmac_hash(hash: HashAlgorithm, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, Error> {
    match hash {
        HashAlgorithm::Sha256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                .map_err(|_| Error::Crypto("invalid HMAC key".into()))?;
            for part in parts {
                mac.update(part);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }
        HashAlgorithm::Sha384 => {
            let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key)
                .map_err(|_| Error::Crypto("invalid HMAC key".into()))?;
            for part in parts {
                mac.update(part);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

/// P_hash(secret, seed): HMAC chain expanded to `output_len` bytes.
fn p_hash(
    hash: HashAlgorithm,
    secret: &[u8],
    full_seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, Error> {
    let mut result = Vec::with_capacity(output_len);

    // A(1) = HMAC_hash(secret, A(0)), A(0) = seed
    let mut a = hmac_hash(hash, secret, &[full_seed])?;

    while result.len() < output_len {
        let output = hmac_hash(hash, secret, &[a.as_slice(), full_seed])?;
        let remaining = output_len - result.len();
        let take = remaining.min(output.len());
        result.extend_from_slice(&output[..take]);

        if result.len() < output_len {
            a = hmac_hash(hash, secret, &[a.as_slice()])?;
        }
    }

    Ok(result)
}

/// PRF(secret, label, seed) = P_hash(secret, label + seed).
pub fn prf(
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    seed: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, Error> {
    let mut full_seed = Vec::with_capacity(label.len() + seed.len());
    full_seed.extend_from_slice(label);
    full_seed.extend_from_slice(seed);
    p_hash(hash, secret, &full_seed, output_len)
}

pub fn master_secret(
    hash: HashAlgorithm,
    pre_master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
) -> Result<Vec<u8>, Error> {
    let mut seed = Vec::with_capacity(client_random.len() + server_random.len());
    seed.extend_from_slice(client_random);
    seed.extend_from_slice(server_random);
    prf(
        hash,
        pre_master_secret,
        LABEL_MASTER_SECRET,
        &seed,
        MASTER_SECRET_LENGTH,
    )
}

/// RFC 7627: bind the master secret to the full transcript hash.
pub fn extended_master_secret(
    hash: HashAlgorithm,
    pre_master_secret: &[u8],
    session_hash: &[u8],
) -> Result<Vec<u8>, Error> {
    prf(
        hash,
        pre_master_secret,
        LABEL_EXTENDED_MASTER_SECRET,
        session_hash,
        MASTER_SECRET_LENGTH,
    )
}

/// RFC 5246 Section 6.3; note the seed order flips to server + client.
pub fn key_expansion(
    hash: HashAlgorithm,
    master_secret: &[u8],
    client_random: &[u8],
    server_random: &[u8],
    output_len: usize,
) -> Result<Vec<u8>, Error> {
    let mut seed = Vec::with_capacity(server_random.len() + client_random.len());
    seed.extend_from_slice(server_random);
    seed.extend_from_slice(client_random);
    prf(hash, master_secret, LABEL_KEY_EXPANSION, &seed, output_len)
}

fn transcript_hash(hash: HashAlgorithm, transcript: &[u8]) -> Vec<u8> {
    match hash {
        HashAlgorithm::Sha256 => Sha256::digest(transcript).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(transcript).to_vec(),
    }
}

pub fn verify_data_client(
    hash: HashAlgorithm,
    master_secret: &[u8],
    transcript: &[u8],
) -> Result<Vec<u8>, Error> {
    prf(
        hash,
        master_secret,
        LABEL_CLIENT_FINISHED,
        &transcript_hash(hash, transcript),
        VERIFY_DATA_LENGTH,
    )
}

pub fn verify_data_server(
    hash: HashAlgorithm,
    master_secret: &[u8],
    transcript: &[u8],
) -> Result<Vec<u8>, Error> {
    prf(
        hash,
        master_secret,
        LABEL_SERVER_FINISHED,
        &transcript_hash(hash, transcript),
        VERIFY_DATA_LENGTH,
    )
}

/// RFC 4279 Section 2: N zero octets then the PSK, both length-prefixed.
pub fn psk_pre_master_secret(psk: &[u8]) -> Vec<u8> {
    let n = psk.len();
    let mut out = Vec::with_capacity(4 + 2 * n);
    out.extend_from_slice(&(n as u16).to_be_bytes());
    out.extend_from_slice(&vec![0u8; n]);
    out.extend_from_slice(&(n as u16).to_be_bytes());
    out.extend_from_slice(psk);
    out
}

/// Constant-structure byte comparison for verify_data. Never early-exits on
/// a mismatching byte.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prf_is_deterministic_and_sized() {
        let a = prf(HashAlgorithm::Sha256, b"secret", b"test label", b"seed", 100).unwrap();
        let b = prf(HashAlgorithm::Sha256, b"secret", b"test label", b"seed", 100).unwrap();
        assert_eq!(a.len(), 100);
        assert_eq!(a, b);

        let c = prf(HashAlgorithm::Sha256, b"secret", b"test label", b"other", 100).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn master_secret_is_48_bytes() {
        let ms = master_secret(HashAlgorithm::Sha256, &[1; 32], &[2; 32], &[3; 32]).unwrap();
        assert_eq!(ms.len(), MASTER_SECRET_LENGTH);
    }

    #[test]
    fn verify_data_directions_differ() {
        let ms = [7u8; 48];
        let transcript = b"handshake bytes";
        let client = verify_data_client(HashAlgorithm::Sha256, &ms, transcript).unwrap();
        let server = verify_data_server(HashAlgorithm::Sha256, &ms, transcript).unwrap();
        assert_eq!(client.len(), VERIFY_DATA_LENGTH);
        assert_eq!(server.len(), VERIFY_DATA_LENGTH);
        assert_ne!(client, server);
    }

    #[test]
    fn psk_premaster_layout() {
        let pms = psk_pre_master_secret(&[0xAA, 0xBB]);
        assert_eq!(pms, [0, 2, 0, 0, 0, 2, 0xAA, 0xBB]);
    }

    #[test]
    fn constant_time_eq() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"ab"));
    }
}
