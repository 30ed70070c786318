//! Cookie exchange (RFC 6347 4.2.1) driven by a hand-rolled client so the
//! exact wire behavior is observable: HelloVerifyRequest round trip, flight
//! progression on a correct cookie, and a fatal access_denied on a wrong
//! one.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dtgram::message::{
    Body, ClientHello, ContentType, DtlsRecord, Handshake, ProtocolVersion, Random, RecordHeader,
};
use dtgram::{Conn, DatagramTransport, Error};

use common::{parse_handshake_types, pipe, server_config, Pipe, CERTIFICATE, SERVER_HELLO, SERVER_HELLO_DONE};

/// Frame one handshake message as a single-record datagram.
fn handshake_datagram(body: Body, message_seq: u16, record_seq: u64) -> Vec<u8> {
    let handshake = Handshake::new(body, message_seq);
    let fragment = handshake.marshal();

    let mut out = Vec::new();
    RecordHeader {
        content_type: ContentType::Handshake,
        version: ProtocolVersion::DTLS1_2,
        epoch: 0,
        sequence_number: record_seq,
        length: fragment.len() as u16,
    }
    .serialize(&mut out);
    out.extend_from_slice(&fragment);
    out
}

fn client_hello(random: Random, cookie: Vec<u8>) -> ClientHello {
    let mut hello = ClientHello {
        version: ProtocolVersion::DTLS1_2,
        random,
        session_id: Vec::new(),
        cookie,
        cipher_suites: Default::default(),
        compression_methods: Default::default(),
        extensions: Vec::new(),
    };
    hello.cipher_suites.push(0xC02B); // ECDHE-ECDSA-AES128-GCM-SHA256
    hello.compression_methods.push(0);
    hello
}

fn recv_datagram(transport: &Pipe) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    transport
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let n = transport.recv(&mut buf).expect("datagram from server");
    buf.truncate(n);
    buf
}

/// Pull the HelloVerifyRequest cookie out of the server's flight 2.
fn receive_cookie(transport: &Pipe) -> Vec<u8> {
    let datagram = recv_datagram(transport);
    let record = DtlsRecord::unmarshal(&datagram).expect("record");
    assert_eq!(record.header.content_type, ContentType::Handshake);

    let (_, handshake) = Handshake::parse(&record.fragment, None).expect("handshake");
    match handshake.body {
        Body::HelloVerifyRequest(hvr) => hvr.cookie,
        other => panic!("expected HelloVerifyRequest, got {other:?}"),
    }
}

#[test]
fn cookie_round_trip_reaches_flight4() {
    let (client_end, server_end) = pipe();
    let server_cfg = Arc::new(
        server_config()
            .handshake_timeout(Duration::from_secs(2))
            .build()
            .unwrap(),
    );
    let server = thread::spawn(move || Conn::server(Arc::new(server_end), server_cfg));

    let random = Random::generate();

    // Flight 1: ClientHello without a cookie.
    client_end
        .send(&handshake_datagram(
            Body::ClientHello(client_hello(random, Vec::new())),
            0,
            0,
        ))
        .unwrap();

    // Flight 2: a 20-byte stateless cookie comes back.
    let cookie = receive_cookie(&client_end);
    assert_eq!(cookie.len(), 20);

    // Flight 3: identical ClientHello, now echoing the cookie.
    client_end
        .send(&handshake_datagram(
            Body::ClientHello(client_hello(random, cookie)),
            1,
            1,
        ))
        .unwrap();

    // Flight 4: the server commits and sends its parameter flight.
    let datagram = recv_datagram(&client_end);
    let types = parse_handshake_types(&datagram);
    assert!(types.contains(&SERVER_HELLO), "flight 4 carries ServerHello");
    assert!(types.contains(&CERTIFICATE));
    assert!(types.contains(&SERVER_HELLO_DONE));

    // This synthetic client stops here; the server times out waiting for
    // flight 5.
    assert!(server.join().unwrap().is_err());
}

#[test]
fn wrong_cookie_is_access_denied() {
    let (client_end, server_end) = pipe();
    let server_cfg = Arc::new(
        server_config()
            .handshake_timeout(Duration::from_secs(5))
            .build()
            .unwrap(),
    );
    let server = thread::spawn(move || Conn::server(Arc::new(server_end), server_cfg));

    let random = Random::generate();
    client_end
        .send(&handshake_datagram(
            Body::ClientHello(client_hello(random, Vec::new())),
            0,
            0,
        ))
        .unwrap();

    let mut cookie = receive_cookie(&client_end);
    cookie[0] ^= 0xFF; // corrupt it

    client_end
        .send(&handshake_datagram(
            Body::ClientHello(client_hello(random, cookie)),
            1,
            1,
        ))
        .unwrap();

    // A wrong cookie is a fatal access_denied, not a silent drop.
    let datagram = recv_datagram(&client_end);
    let record = DtlsRecord::unmarshal(&datagram).expect("alert record");
    assert_eq!(record.header.content_type, ContentType::Alert);
    assert_eq!(record.fragment, [2 /* fatal */, 49 /* access_denied */]);

    assert_eq!(server.join().unwrap().err(), Some(Error::CookieMismatch));
}
