#![no_main]

//! Fuzz target for handshake message parsing: the closed body enum over the
//! RFC message set, fed with raw bytes under every message type prefix.

use libfuzzer_sys::fuzz_target;

use dtgram::crypto::KeyExchangeAlgorithm;
use dtgram::message::Handshake;

fuzz_target!(|data: &[u8]| {
    let _ = Handshake::parse(data, None);
    let _ = Handshake::parse(data, Some(KeyExchangeAlgorithm::Ecdhe));
    let _ = Handshake::parse(data, Some(KeyExchangeAlgorithm::Psk));
});
