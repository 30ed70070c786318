use std::sync::Arc;

use zeroize::Zeroizing;

use crate::crypto::key_exchange::KeyExchange;
use crate::crypto::{CipherSuite, CipherSuiteId};
use crate::message::extensions::{NamedCurve, SrtpProfile};
use crate::message::{Random, MAX_SEQUENCE_NUMBER, RANDOM_LENGTH};
use crate::window::ReplayWindow;
use crate::Error;

/// All mutable per-connection handshake and record-layer state.
///
/// Single-writer discipline: the handshake driver mutates handshake fields;
/// the read loop only advances the remote epoch, replay windows and the
/// receive-side bookkeeping. Both go through the connection's state mutex.
///
/// No Debug impl: master/pre-master secrets must not reach log output.
#[derive(Default)]
pub(crate) struct State {
    pub is_client: bool,

    pub local_random: Random,
    pub remote_random: Random,

    /// Selected by ServerHello; keys published exactly once via `init`.
    pub cipher_suite: Option<Arc<dyn CipherSuite>>,

    pub master_secret: Zeroizing<Vec<u8>>,
    pub pre_master_secret: Zeroizing<Vec<u8>>,

    pub local_epoch: u16,
    pub remote_epoch: u16,

    /// One 48-bit send counter per epoch.
    local_sequence_number: Vec<u64>,

    /// One replay window per receive epoch.
    replay_detectors: Vec<ReplayWindow>,

    pub handshake_send_sequence: u16,
    pub handshake_recv_sequence: u16,

    pub cookie: Vec<u8>,

    pub extended_master_secret: bool,
    pub srtp_protection_profile: Option<SrtpProfile>,
    pub negotiated_protocol: Option<String>,
    pub peer_supported_protocols: Vec<String>,

    pub peer_certificates: Vec<Vec<u8>>,
    pub peer_certificates_verified: bool,
    pub remote_requested_certificate: bool,

    pub named_curve: NamedCurve,
    pub key_exchange: Option<KeyExchange>,

    pub local_verify_data: Vec<u8>,
    pub session_id: Vec<u8>,
    pub identity_hint: Option<Vec<u8>>,
    pub server_name: String,
}

impl State {
    pub fn new(is_client: bool) -> Self {
        State {
            is_client,
            ..Default::default()
        }
    }

    pub fn ensure_local_random(&mut self) {
        if self.local_random.is_empty() {
            self.local_random = Random::generate();
        }
    }

    /// Allocate the next send sequence number for `epoch`. Overflow past
    /// 2^48-1 is fatal: nonce uniqueness would be gone (RFC 6347 4.1).
    pub fn next_sequence_number(&mut self, epoch: u16) -> Result<u64, Error> {
        let epoch = epoch as usize;
        while self.local_sequence_number.len() <= epoch {
            self.local_sequence_number.push(0);
        }
        let seq = self.local_sequence_number[epoch];
        if seq > MAX_SEQUENCE_NUMBER {
            return Err(Error::SequenceNumberOverflow);
        }
        self.local_sequence_number[epoch] = seq + 1;
        Ok(seq)
    }

    /// Test/backdoor-free way for snapshots to restore send counters.
    pub fn set_sequence_numbers(&mut self, counters: Vec<u64>) {
        self.local_sequence_number = counters;
    }

    pub fn sequence_numbers(&self) -> &[u64] {
        &self.local_sequence_number
    }

    pub fn replay_detector(&mut self, epoch: u16, window_size: usize) -> &mut ReplayWindow {
        let epoch = epoch as usize;
        while self.replay_detectors.len() <= epoch {
            self.replay_detectors.push(ReplayWindow::new(window_size));
        }
        &mut self.replay_detectors[epoch]
    }

    pub fn cipher_suite(&self) -> Result<Arc<dyn CipherSuite>, Error> {
        self.cipher_suite.clone().ok_or(Error::InvalidCipherSuite)
    }

    /// Re-derive record keys from the master secret (session resumption and
    /// snapshot import paths).
    pub fn init_cipher_suite(&mut self) -> Result<(), Error> {
        let suite = self.cipher_suite()?;
        if suite.is_initialized() {
            return Ok(());
        }
        let (client_random, server_random) = if self.is_client {
            (self.local_random.0, self.remote_random.0)
        } else {
            (self.remote_random.0, self.local_random.0)
        };
        suite.init(
            &self.master_secret,
            &client_random,
            &server_random,
            self.is_client,
        )
    }

    pub fn export(&self) -> Result<SessionSnapshot, Error> {
        let suite = self.cipher_suite()?;
        Ok(SessionSnapshot {
            is_client: self.is_client,
            local_epoch: self.local_epoch,
            remote_epoch: self.remote_epoch,
            local_sequence_numbers: self.local_sequence_number.clone(),
            local_random: self.local_random.0,
            remote_random: self.remote_random.0,
            master_secret: self.master_secret.to_vec(),
            cipher_suite_id: suite.id(),
            extended_master_secret: self.extended_master_secret,
            srtp_protection_profile: self.srtp_protection_profile,
            peer_certificates: self.peer_certificates.clone(),
            session_id: self.session_id.clone(),
        })
    }
}

/// Serializable snapshot of a completed connection, sufficient to resume
/// without re-running the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub is_client: bool,
    pub local_epoch: u16,
    pub remote_epoch: u16,
    pub local_sequence_numbers: Vec<u64>,
    pub local_random: [u8; RANDOM_LENGTH],
    pub remote_random: [u8; RANDOM_LENGTH],
    pub master_secret: Vec<u8>,
    pub cipher_suite_id: CipherSuiteId,
    pub extended_master_secret: bool,
    pub srtp_protection_profile: Option<SrtpProfile>,
    pub peer_certificates: Vec<Vec<u8>>,
    pub session_id: Vec<u8>,
}

const SNAPSHOT_VERSION: u8 = 1;

impl SessionSnapshot {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(SNAPSHOT_VERSION);

        let mut flags = 0u8;
        if self.is_client {
            flags |= 0x01;
        }
        if self.extended_master_secret {
            flags |= 0x02;
        }
        out.push(flags);

        out.extend_from_slice(&self.local_epoch.to_be_bytes());
        out.extend_from_slice(&self.remote_epoch.to_be_bytes());

        out.push(self.local_sequence_numbers.len() as u8);
        for seq in &self.local_sequence_numbers {
            out.extend_from_slice(&seq.to_be_bytes());
        }

        out.extend_from_slice(&self.local_random);
        out.extend_from_slice(&self.remote_random);

        out.push(self.master_secret.len() as u8);
        out.extend_from_slice(&self.master_secret);

        out.extend_from_slice(&self.cipher_suite_id.as_u16().to_be_bytes());
        out.extend_from_slice(
            &self
                .srtp_protection_profile
                .map(|p| p.as_u16())
                .unwrap_or(0)
                .to_be_bytes(),
        );

        out.push(self.peer_certificates.len() as u8);
        for cert in &self.peer_certificates {
            out.extend_from_slice(&(cert.len() as u32).to_be_bytes());
            out.extend_from_slice(cert);
        }

        out.push(self.session_id.len() as u8);
        out.extend_from_slice(&self.session_id);

        out
    }

    pub fn from_bytes(input: &[u8]) -> Result<SessionSnapshot, Error> {
        let mut r = Reader(input);
        if r.u8()? != SNAPSHOT_VERSION {
            return Err(Error::ParseFailed);
        }

        let flags = r.u8()?;
        let local_epoch = r.u16()?;
        let remote_epoch = r.u16()?;

        let count = r.u8()? as usize;
        let mut local_sequence_numbers = Vec::with_capacity(count);
        for _ in 0..count {
            local_sequence_numbers.push(r.u64()?);
        }

        let mut local_random = [0u8; RANDOM_LENGTH];
        local_random.copy_from_slice(r.bytes(RANDOM_LENGTH)?);
        let mut remote_random = [0u8; RANDOM_LENGTH];
        remote_random.copy_from_slice(r.bytes(RANDOM_LENGTH)?);

        let secret_len = r.u8()? as usize;
        let master_secret = r.bytes(secret_len)?.to_vec();

        let cipher_suite_id =
            CipherSuiteId::from_u16(r.u16()?).ok_or(Error::InvalidCipherSuite)?;
        let srtp = r.u16()?;
        let srtp_protection_profile = SrtpProfile::from_u16(srtp);

        let cert_count = r.u8()? as usize;
        let mut peer_certificates = Vec::with_capacity(cert_count);
        for _ in 0..cert_count {
            let len = r.u32()? as usize;
            peer_certificates.push(r.bytes(len)?.to_vec());
        }

        let id_len = r.u8()? as usize;
        let session_id = r.bytes(id_len)?.to_vec();

        Ok(SessionSnapshot {
            is_client: flags & 0x01 != 0,
            local_epoch,
            remote_epoch,
            local_sequence_numbers,
            local_random,
            remote_random,
            master_secret,
            cipher_suite_id,
            extended_master_secret: flags & 0x02 != 0,
            srtp_protection_profile,
            peer_certificates,
            session_id,
        })
    }
}

struct Reader<'a>(&'a [u8]);

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.0.len() < n {
            return Err(Error::BufferTooSmall);
        }
        let (head, tail) = self.0.split_at(n);
        self.0 = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        let b = self.bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_overflow_is_fatal() {
        let mut state = State::new(true);
        state.set_sequence_numbers(vec![0, MAX_SEQUENCE_NUMBER]);

        // The final valid sequence number is handed out once...
        assert_eq!(state.next_sequence_number(1), Ok(MAX_SEQUENCE_NUMBER));
        // ...and the counter never wraps silently.
        assert_eq!(
            state.next_sequence_number(1),
            Err(Error::SequenceNumberOverflow)
        );
        assert_eq!(
            state.next_sequence_number(1),
            Err(Error::SequenceNumberOverflow)
        );

        // Epoch 0 is unaffected.
        assert_eq!(state.next_sequence_number(0), Ok(0));
    }

    #[test]
    fn snapshot_roundtrip() {
        let snapshot = SessionSnapshot {
            is_client: true,
            local_epoch: 1,
            remote_epoch: 1,
            local_sequence_numbers: vec![6, 3],
            local_random: [0xAB; 32],
            remote_random: [0xCD; 32],
            master_secret: vec![7; 48],
            cipher_suite_id: CipherSuiteId::ECDHE_ECDSA_AES128_GCM_SHA256,
            extended_master_secret: true,
            srtp_protection_profile: Some(SrtpProfile::AeadAes128Gcm),
            peer_certificates: vec![vec![0x30, 0x82], vec![0x30]],
            session_id: vec![1, 2, 3],
        };

        let bytes = snapshot.to_bytes();
        let parsed = SessionSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn snapshot_rejects_truncation() {
        let snapshot = SessionSnapshot {
            is_client: false,
            local_epoch: 1,
            remote_epoch: 1,
            local_sequence_numbers: vec![1],
            local_random: [0; 32],
            remote_random: [0; 32],
            master_secret: vec![7; 48],
            cipher_suite_id: CipherSuiteId::PSK_AES128_GCM_SHA256,
            extended_master_secret: false,
            srtp_protection_profile: None,
            peer_certificates: vec![],
            session_id: vec![],
        };
        let bytes = snapshot.to_bytes();
        assert!(SessionSnapshot::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
