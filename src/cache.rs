use std::collections::HashMap;
use std::sync::Mutex;

use sha2::{Digest, Sha256, Sha384};

use crate::message::extensions::HashAlgorithm;
use crate::message::MessageType;

/// Query pattern for cached handshake messages.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PullRule {
    pub msg_type: MessageType,
    pub epoch: u16,
    pub is_client: bool,
    pub optional: bool,
}

impl PullRule {
    pub fn required(msg_type: MessageType, epoch: u16, is_client: bool) -> Self {
        PullRule {
            msg_type,
            epoch,
            is_client,
            optional: false,
        }
    }

    pub fn optional(msg_type: MessageType, epoch: u16, is_client: bool) -> Self {
        PullRule {
            msg_type,
            epoch,
            is_client,
            optional: true,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheItem {
    msg_type: MessageType,
    is_client: bool,
    epoch: u16,
    message_sequence: u16,
    data: Vec<u8>,
}

/// Append-only store of every handshake message sent and received.
///
/// Serves two purposes: duplicate deliveries of a retransmitted flight are
/// detected here (push is idempotent), and transcript hashes (Finished,
/// CertificateVerify, extended master secret) are computed over the exact
/// wire bytes pulled back out.
///
/// Internally locked; both the read loop and the handshake driver touch it.
#[derive(Debug, Default)]
pub(crate) struct HandshakeCache {
    cache: Mutex<Vec<CacheItem>>,
}

impl HandshakeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message. Returns false (and stores nothing) if an entry with
    /// the same (message_sequence, direction) already exists.
    pub fn push(
        &self,
        data: Vec<u8>,
        epoch: u16,
        message_sequence: u16,
        msg_type: MessageType,
        is_client: bool,
    ) -> bool {
        let mut cache = self.cache.lock().unwrap();

        let duplicate = cache
            .iter()
            .any(|item| item.message_sequence == message_sequence && item.is_client == is_client);
        if duplicate {
            return false;
        }

        cache.push(CacheItem {
            msg_type,
            is_client,
            epoch,
            message_sequence,
            data,
        });
        true
    }

    /// Per rule, the raw bytes of the highest-sequence matching entry. A
    /// ClientHello sent twice with different cookies resolves to the latest.
    pub fn pull(&self, rules: &[PullRule]) -> Vec<Option<Vec<u8>>> {
        let cache = self.cache.lock().unwrap();
        rules
            .iter()
            .map(|rule| best_match(&cache, rule).map(|item| item.data.clone()))
            .collect()
    }

    /// The primary flight-parser query: all non-optional rules must be
    /// present and the matched entries must occupy a contiguous message
    /// sequence run starting at `start_seq`. A gap means the peer's flight is
    /// still incomplete and the caller must keep waiting.
    pub fn full_pull_map(
        &self,
        start_seq: u16,
        rules: &[PullRule],
    ) -> Option<(u16, HashMap<MessageType, Vec<u8>>)> {
        let cache = self.cache.lock().unwrap();

        let mut matched: Vec<&CacheItem> = Vec::with_capacity(rules.len());
        for rule in rules {
            match best_match(&cache, rule) {
                Some(item) => matched.push(item),
                None if rule.optional => {}
                None => return None,
            }
        }

        matched.sort_by_key(|item| item.message_sequence);
        let mut expected = start_seq;
        for item in &matched {
            if item.message_sequence != expected {
                return None;
            }
            expected = expected.wrapping_add(1);
        }

        let mut out = HashMap::with_capacity(matched.len());
        for item in matched {
            out.insert(item.msg_type, item.data.clone());
        }
        Some((expected, out))
    }

    /// Concatenate matching entries in rule order; absent rules contribute
    /// nothing. Transcript verification operates over these exact bytes.
    pub fn pull_and_merge(&self, rules: &[PullRule]) -> Vec<u8> {
        let cache = self.cache.lock().unwrap();
        let mut merged = Vec::new();
        for rule in rules {
            if let Some(item) = best_match(&cache, rule) {
                merged.extend_from_slice(&item.data);
            }
        }
        merged
    }

    /// Session hash for the extended master secret (RFC 7627): digest of the
    /// full-handshake transcript plus `additional` bytes the caller is about
    /// to send but has not cached yet.
    pub fn session_hash(&self, hash: HashAlgorithm, epoch: u16, additional: &[u8]) -> Vec<u8> {
        let mut merged = self.pull_and_merge(&[
            PullRule::required(MessageType::ClientHello, epoch, true),
            PullRule::required(MessageType::ServerHello, epoch, false),
            PullRule::required(MessageType::Certificate, epoch, false),
            PullRule::required(MessageType::ServerKeyExchange, epoch, false),
            PullRule::required(MessageType::CertificateRequest, epoch, false),
            PullRule::required(MessageType::ServerHelloDone, epoch, false),
            PullRule::required(MessageType::Certificate, epoch, true),
            PullRule::required(MessageType::ClientKeyExchange, epoch, true),
        ]);
        merged.extend_from_slice(additional);

        match hash {
            HashAlgorithm::Sha256 => Sha256::digest(&merged).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(&merged).to_vec(),
        }
    }
}

fn best_match<'a>(cache: &'a [CacheItem], rule: &PullRule) -> Option<&'a CacheItem> {
    cache
        .iter()
        .filter(|item| {
            item.msg_type == rule.msg_type
                && item.epoch == rule.epoch
                && item.is_client == rule.is_client
        })
        .max_by_key(|item| item.message_sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_is_idempotent() {
        let cache = HandshakeCache::new();
        assert!(cache.push(vec![1, 2, 3], 0, 0, MessageType::ClientHello, true));
        assert!(!cache.push(vec![9, 9, 9], 0, 0, MessageType::ClientHello, true));

        // Same sequence from the other direction is a distinct entry.
        assert!(cache.push(vec![4, 5], 0, 0, MessageType::HelloVerifyRequest, false));

        let pulled = cache.pull(&[PullRule::required(MessageType::ClientHello, 0, true)]);
        assert_eq!(pulled[0].as_deref(), Some(&[1, 2, 3][..]));
    }

    #[test]
    fn pull_returns_highest_sequence() {
        let cache = HandshakeCache::new();
        cache.push(vec![0xAA], 0, 0, MessageType::ClientHello, true);
        cache.push(vec![0xBB], 0, 1, MessageType::ClientHello, true);

        let pulled = cache.pull(&[PullRule::required(MessageType::ClientHello, 0, true)]);
        assert_eq!(pulled[0].as_deref(), Some(&[0xBB][..]));
    }

    #[test]
    fn full_pull_map_rejects_gaps() {
        let cache = HandshakeCache::new();
        cache.push(vec![0xAA], 0, 0, MessageType::Certificate, true);
        cache.push(vec![0xBB], 0, 2, MessageType::ClientKeyExchange, true);

        // Both messages exist but seq 1 is missing: not ok.
        let rules = [
            PullRule::required(MessageType::Certificate, 0, true),
            PullRule::required(MessageType::ClientKeyExchange, 0, true),
        ];
        assert!(cache.full_pull_map(0, &rules).is_none());

        cache.push(vec![0xCC], 0, 1, MessageType::CertificateVerify, true);
        let rules = [
            PullRule::required(MessageType::Certificate, 0, true),
            PullRule::required(MessageType::CertificateVerify, 0, true),
            PullRule::required(MessageType::ClientKeyExchange, 0, true),
        ];
        let (next, msgs) = cache.full_pull_map(0, &rules).unwrap();
        assert_eq!(next, 3);
        assert_eq!(msgs.len(), 3);
    }

    #[test]
    fn full_pull_map_missing_required() {
        let cache = HandshakeCache::new();
        cache.push(vec![0xAA], 0, 0, MessageType::ClientHello, true);

        let rules = [
            PullRule::required(MessageType::ClientHello, 0, true),
            PullRule::required(MessageType::ClientKeyExchange, 0, true),
        ];
        assert!(cache.full_pull_map(0, &rules).is_none());

        // The same query with the missing rule optional succeeds.
        let rules = [
            PullRule::required(MessageType::ClientHello, 0, true),
            PullRule::optional(MessageType::ClientKeyExchange, 0, true),
        ];
        let (next, msgs) = cache.full_pull_map(0, &rules).unwrap();
        assert_eq!(next, 1);
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn pull_and_merge_preserves_rule_order() {
        let cache = HandshakeCache::new();
        cache.push(vec![2, 2], 0, 1, MessageType::ServerHello, false);
        cache.push(vec![1, 1], 0, 0, MessageType::ClientHello, true);

        let merged = cache.pull_and_merge(&[
            PullRule::required(MessageType::ClientHello, 0, true),
            PullRule::required(MessageType::ServerHello, 0, false),
            PullRule::required(MessageType::Finished, 1, false),
        ]);
        assert_eq!(merged, [1, 1, 2, 2]);
    }
}
