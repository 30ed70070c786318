//! AES-128-GCM record protection (RFC 5288).

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::message::{RecordHeader, RECORD_HEADER_SIZE};
use crate::Error;

const EXPLICIT_NONCE_LENGTH: usize = 8;
const TAG_LENGTH: usize = 16;
pub(crate) const WRITE_KEY_LENGTH: usize = 16;
pub(crate) const WRITE_IV_LENGTH: usize = 4;

/// One direction pair of GCM contexts plus the implicit IVs from key
/// expansion. The 8-byte explicit nonce travels in the record fragment.
pub(crate) struct RecordGcm {
    local: Aes128Gcm,
    local_write_iv: [u8; WRITE_IV_LENGTH],
    remote: Aes128Gcm,
    remote_write_iv: [u8; WRITE_IV_LENGTH],
}

impl std::fmt::Debug for RecordGcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of debug output.
        f.write_str("RecordGcm")
    }
}

impl RecordGcm {
    pub fn new(
        local_key: &[u8],
        local_write_iv: &[u8],
        remote_key: &[u8],
        remote_write_iv: &[u8],
    ) -> Result<Self, Error> {
        let local = Aes128Gcm::new_from_slice(local_key)
            .map_err(|_| Error::Crypto("invalid AES-128-GCM key".into()))?;
        let remote = Aes128Gcm::new_from_slice(remote_key)
            .map_err(|_| Error::Crypto("invalid AES-128-GCM key".into()))?;

        let mut liv = [0u8; WRITE_IV_LENGTH];
        let mut riv = [0u8; WRITE_IV_LENGTH];
        if local_write_iv.len() != WRITE_IV_LENGTH || remote_write_iv.len() != WRITE_IV_LENGTH {
            return Err(Error::Crypto("invalid GCM write IV length".into()));
        }
        liv.copy_from_slice(local_write_iv);
        riv.copy_from_slice(remote_write_iv);

        Ok(RecordGcm {
            local,
            local_write_iv: liv,
            remote,
            remote_write_iv: riv,
        })
    }

    /// Encrypt a marshaled plaintext record. The returned record carries the
    /// explicit nonce, ciphertext and tag, with the header length rewritten.
    pub fn encrypt(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        let header = RecordHeader::unmarshal(raw)?;
        let payload = &raw[RECORD_HEADER_SIZE..];

        let mut nonce = [0u8; 12];
        nonce[..WRITE_IV_LENGTH].copy_from_slice(&self.local_write_iv);
        OsRng.fill_bytes(&mut nonce[WRITE_IV_LENGTH..]);

        let aad = additional_data(&header, payload.len());
        let ciphertext = self
            .local
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: payload,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::Crypto("record encryption failed".into()))?;

        let body_len = EXPLICIT_NONCE_LENGTH + ciphertext.len();
        let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + body_len);
        let mut out_header = header;
        out_header.length = body_len as u16;
        out_header.serialize(&mut out);
        out.extend_from_slice(&nonce[WRITE_IV_LENGTH..]);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a ciphertext record back to a marshaled plaintext record.
    pub fn decrypt(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        let header = RecordHeader::unmarshal(raw)?;
        let body = &raw[RECORD_HEADER_SIZE..];
        if body.len() < EXPLICIT_NONCE_LENGTH + TAG_LENGTH {
            return Err(Error::BufferTooSmall);
        }

        let mut nonce = [0u8; 12];
        nonce[..WRITE_IV_LENGTH].copy_from_slice(&self.remote_write_iv);
        nonce[WRITE_IV_LENGTH..].copy_from_slice(&body[..EXPLICIT_NONCE_LENGTH]);

        let ciphertext = &body[EXPLICIT_NONCE_LENGTH..];
        let aad = additional_data(&header, ciphertext.len() - TAG_LENGTH);
        let plaintext = self
            .remote
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::Crypto("record decryption failed".into()))?;

        let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + plaintext.len());
        let mut out_header = header;
        out_header.length = plaintext.len() as u16;
        out_header.serialize(&mut out);
        out.extend_from_slice(&plaintext);
        Ok(out)
    }
}

/// RFC 5246 Section 6.2.3.3: seq_num(8) + type + version + length, where the
/// 8-byte sequence is the DTLS epoch + 48-bit sequence number.
fn additional_data(header: &RecordHeader, payload_len: usize) -> [u8; 13] {
    let mut aad = [0u8; 13];
    aad[..2].copy_from_slice(&header.epoch.to_be_bytes());
    aad[2..8].copy_from_slice(&header.sequence_number.to_be_bytes()[2..]);
    aad[8] = header.content_type.as_u8();
    aad[9..11].copy_from_slice(&header.version.bytes());
    aad[11..13].copy_from_slice(&(payload_len as u16).to_be_bytes());
    aad
}
