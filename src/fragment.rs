use std::collections::HashMap;

use crate::message::{ContentType, Header, RecordHeader, RECORD_HEADER_SIZE};
use crate::Error;

/// Upper bound on buffered fragment bytes. An adversary spraying fragments
/// for messages that never complete must not grow memory without bound.
const FRAGMENT_BUFFER_MAX_SIZE: usize = 1_000_000;

#[derive(Debug)]
struct Fragment {
    header: Header,
    epoch: u16,
    data: Vec<u8>,
}

/// Reassembles handshake messages from DTLS fragments.
///
/// Fragments may arrive out of order, duplicated, and interleaved across
/// messages; complete messages are only released in message-sequence order
/// because flight parsers expect contiguous sequence ranges.
#[derive(Debug, Default)]
pub(crate) struct FragmentBuffer {
    cache: HashMap<u16, Vec<Fragment>>,
    current_message_sequence: u16,
    size: usize,
}

impl FragmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one plaintext record. Returns whether it was a handshake record;
    /// anything else bypasses reassembly untouched.
    pub fn push(&mut self, record: &[u8]) -> Result<bool, Error> {
        let header = RecordHeader::unmarshal(record)?;
        if header.content_type != ContentType::Handshake {
            return Ok(false);
        }

        if self.size + record.len() > FRAGMENT_BUFFER_MAX_SIZE {
            return Err(Error::FragmentBufferOverflow);
        }

        // One record may carry several handshake fragments back to back.
        let mut data = &record[RECORD_HEADER_SIZE..];
        while !data.is_empty() {
            let (rest, fragment_header) = Header::parse(data)?;
            let fragment_length = fragment_header.fragment_length as usize;
            if rest.len() < fragment_length {
                return Err(Error::ParseFailed);
            }

            let fragment = Fragment {
                header: fragment_header,
                epoch: header.epoch,
                data: rest[..fragment_length].to_vec(),
            };
            self.size += fragment.data.len();
            self.cache
                .entry(fragment_header.message_seq)
                .or_default()
                .push(fragment);

            data = &rest[fragment_length..];
        }

        Ok(true)
    }

    /// Try to assemble the message at the current sequence cursor. Complete
    /// messages at later sequences are held back until the cursor reaches them.
    pub fn pop(&mut self) -> Option<(Vec<u8>, u16)> {
        let frags = self.cache.get(&self.current_message_sequence)?;
        let total = frags.first()?.header.length;

        let mut body = Vec::with_capacity(total as usize);
        if !assemble(frags, 0, total, &mut body) {
            return None;
        }

        let mut header = frags[0].header;
        header.fragment_offset = 0;
        header.fragment_length = header.length;
        let epoch = frags[0].epoch;

        let mut message = Vec::with_capacity(body.len() + 12);
        header.serialize(&mut message);
        message.extend_from_slice(&body);

        let removed = self.cache.remove(&self.current_message_sequence);
        if let Some(removed) = removed {
            for f in &removed {
                self.size -= f.data.len();
            }
        }
        self.current_message_sequence += 1;

        Some((message, epoch))
    }
}

/// Depth-first search for a fragment chain covering `target..total`.
/// Backtracks so overlapping retransmissions with different split points
/// cannot wedge reassembly.
fn assemble(frags: &[Fragment], target: u32, total: u32, out: &mut Vec<u8>) -> bool {
    for f in frags {
        if f.header.fragment_offset != target {
            continue;
        }
        let end = f.header.fragment_offset + f.header.fragment_length;
        if end > total {
            continue;
        }

        out.extend_from_slice(&f.data);
        if end == total || assemble(frags, end, total, out) {
            return true;
        }
        out.truncate(out.len() - f.data.len());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::util::put_u24;

    /// Build a handshake record holding one fragment of a message.
    fn record(message_seq: u16, total: &[u8], offset: usize, len: usize) -> Vec<u8> {
        let mut fragment = Vec::new();
        fragment.push(1); // ClientHello
        put_u24(&mut fragment, total.len() as u32);
        fragment.extend_from_slice(&message_seq.to_be_bytes());
        put_u24(&mut fragment, offset as u32);
        put_u24(&mut fragment, len as u32);
        fragment.extend_from_slice(&total[offset..offset + len]);

        let mut out = vec![0x16, 0xFE, 0xFD, 0, 0, 0, 0, 0, 0, 0, 0];
        out.extend_from_slice(&(fragment.len() as u16).to_be_bytes());
        out.extend_from_slice(&fragment);
        out
    }

    #[test]
    fn non_handshake_bypasses() {
        let mut buf = FragmentBuffer::new();
        let ccs = [0x14, 0xFE, 0xFD, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0x01];
        assert!(!buf.push(&ccs).unwrap());
        assert!(buf.pop().is_none());
    }

    #[test]
    fn out_of_order_reassembly() {
        let body: Vec<u8> = (0..100u8).collect();
        let mut buf = FragmentBuffer::new();

        // Deliver the tail first, then a duplicate of it, then the head.
        assert!(buf.push(&record(0, &body, 60, 40)).unwrap());
        assert!(buf.pop().is_none());
        assert!(buf.push(&record(0, &body, 60, 40)).unwrap());
        assert!(buf.push(&record(0, &body, 0, 60)).unwrap());

        let (message, epoch) = buf.pop().unwrap();
        assert_eq!(epoch, 0);
        assert_eq!(&message[12..], &body[..]);
        // Header now describes the whole message.
        assert_eq!(&message[6..9], &[0, 0, 0]);
        assert_eq!(&message[9..12], &[0, 0, 100]);
    }

    #[test]
    fn overlapping_splits() {
        let body: Vec<u8> = (0..90u8).collect();
        let mut buf = FragmentBuffer::new();

        // Two retransmissions fragmented at different points.
        buf.push(&record(0, &body, 0, 30)).unwrap();
        buf.push(&record(0, &body, 45, 45)).unwrap();
        assert!(buf.pop().is_none());
        buf.push(&record(0, &body, 30, 15)).unwrap();

        let (message, _) = buf.pop().unwrap();
        assert_eq!(&message[12..], &body[..]);
    }

    #[test]
    fn holds_out_of_sequence_messages() {
        let body: Vec<u8> = (0..10u8).collect();
        let mut buf = FragmentBuffer::new();

        // A complete message at seq 1 must wait for seq 0.
        buf.push(&record(1, &body, 0, 10)).unwrap();
        assert!(buf.pop().is_none());

        buf.push(&record(0, &body, 0, 10)).unwrap();
        let (first, _) = buf.pop().unwrap();
        assert_eq!(u16::from_be_bytes([first[4], first[5]]), 0);
        let (second, _) = buf.pop().unwrap();
        assert_eq!(u16::from_be_bytes([second[4], second[5]]), 1);
        assert!(buf.pop().is_none());
    }

    #[test]
    fn overflow_guard() {
        let body = vec![0u8; 1000];
        let mut buf = FragmentBuffer::new();
        let mut pushed = 0usize;
        // Never completes: always offset 0 of a message claiming to be longer.
        loop {
            let mut r = record(9999, &body, 0, 1000);
            // Claim total length beyond what we deliver.
            r[14] = 0xFF;
            match buf.push(&r) {
                Ok(_) => pushed += 1,
                Err(Error::FragmentBufferOverflow) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert!(pushed < 2000, "overflow guard never fired");
        }
    }
}
