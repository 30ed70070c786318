#![no_main]

//! Fuzz target for DTLS record layer parsing.
//!
//! Exercises datagram unpacking and record header decoding with arbitrary
//! bytes, then with inputs dressed up as plausible records. None of these
//! paths may panic; malformed input must come back as an error.

use libfuzzer_sys::fuzz_target;

use dtgram::message::{unpack_datagram, DtlsRecord, RecordHeader};

const DTLS_HEADER_LEN: usize = 13;
const MAX_FRAGMENT_SIZE: usize = 16384;

fuzz_target!(|data: &[u8]| {
    let _ = RecordHeader::unmarshal(data);
    let _ = DtlsRecord::unmarshal(data);

    if let Ok(records) = unpack_datagram(data) {
        for record in records {
            let _ = DtlsRecord::unmarshal(record);
        }
    }

    // Also test with a well-formed record header in front.
    if !data.is_empty() {
        let frag_len = data.len().min(MAX_FRAGMENT_SIZE);

        let mut record = Vec::with_capacity(DTLS_HEADER_LEN + frag_len);
        record.push(22u8); // ContentType::Handshake
        record.extend_from_slice(&[0xFE, 0xFD]); // DTLS 1.2
        record.extend_from_slice(&[0, 0]); // epoch 0
        record.extend_from_slice(&[0, 0, 0, 0, 0, 1]); // sequence 1
        record.extend_from_slice(&(frag_len as u16).to_be_bytes());
        record.extend_from_slice(&data[..frag_len]);

        let _ = DtlsRecord::unmarshal(&record);
        let _ = unpack_datagram(&record);
    }
});
