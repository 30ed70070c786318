//! Loss, duplication, garbage and replay tolerance: handshakes must
//! converge through retransmission, and expensive operations must run
//! exactly once no matter how often flights are redelivered.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dtgram::{Conn, DatagramTransport};

use common::{
    client_config, contains_ccs, counting_suite_factory, parse_records, pipe, server_config,
    Recorder, SendHook,
};

#[test]
fn handshake_survives_packet_loss() {
    let (client_end, server_end) = pipe();

    // Drop the first datagram in each direction; retransmission recovers.
    let client_drops = AtomicUsize::new(1);
    let client_transport = SendHook::new(Arc::new(client_end), move |datagram| {
        if client_drops.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Vec::new();
        }
        vec![datagram.to_vec()]
    });
    let server_drops = AtomicUsize::new(1);
    let server_transport = SendHook::new(Arc::new(server_end), move |datagram| {
        if server_drops.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Vec::new();
        }
        vec![datagram.to_vec()]
    });

    let server_cfg = Arc::new(server_config().build().unwrap());
    let client_cfg = Arc::new(client_config().build().unwrap());

    let server =
        thread::spawn(move || Conn::server(Arc::new(server_transport), server_cfg));
    let client = Conn::client(Arc::new(client_transport), client_cfg).expect("client handshake");
    let server = server.join().unwrap().expect("server handshake");

    client.write(b"after loss").unwrap();
    let mut buf = [0u8; 64];
    let n = server.read(&mut buf, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(&buf[..n], b"after loss");
}

#[test]
fn handshake_survives_duplication_with_single_key_derivation() {
    let (client_end, server_end) = pipe();

    // Every datagram is delivered twice in both directions.
    let client_transport =
        SendHook::new(Arc::new(client_end), |d| vec![d.to_vec(), d.to_vec()]);
    let server_transport =
        SendHook::new(Arc::new(server_end), |d| vec![d.to_vec(), d.to_vec()]);

    let (server_factory, server_inits) = counting_suite_factory();
    let (client_factory, client_inits) = counting_suite_factory();

    let server_cfg = Arc::new(
        server_config()
            .custom_cipher_suites(server_factory)
            .build()
            .unwrap(),
    );
    let client_cfg = Arc::new(
        client_config()
            .custom_cipher_suites(client_factory)
            .build()
            .unwrap(),
    );

    let server =
        thread::spawn(move || Conn::server(Arc::new(server_transport), server_cfg));
    let client = Conn::client(Arc::new(client_transport), client_cfg).expect("client handshake");
    let server = server.join().unwrap().expect("server handshake");

    assert_eq!(client_inits.load(Ordering::SeqCst), 1);
    assert_eq!(server_inits.load(Ordering::SeqCst), 1);

    client.write(b"dup").unwrap();
    let mut buf = [0u8; 64];
    let n = server.read(&mut buf, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(&buf[..n], b"dup");
}

#[test]
fn garbage_records_do_not_poison_the_batch() {
    let (client_end, server_end) = pipe();

    // Prefix every client datagram with a well-framed record carrying an
    // invalid content type, and also send a truncated 12-byte header as its
    // own datagram. Both must be discarded without hurting the real records.
    let client_transport = SendHook::new(Arc::new(client_end), |datagram| {
        let garbage_record = vec![
            99, 0xFE, 0xFD, 0, 0, 0, 0, 0, 0, 0, 99, 0x00, 0x02, 0xAB, 0xCD,
        ];
        let truncated_header = vec![0x16, 0xFE, 0xFD, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut poisoned = garbage_record;
        poisoned.extend_from_slice(datagram);
        vec![truncated_header, poisoned]
    });

    let server_cfg = Arc::new(server_config().build().unwrap());
    let client_cfg = Arc::new(client_config().build().unwrap());

    let server = thread::spawn(move || Conn::server(Arc::new(server_end), server_cfg));
    let client = Conn::client(Arc::new(client_transport), client_cfg).expect("client handshake");
    let server = server.join().unwrap().expect("server handshake");

    client.write(b"still fine").unwrap();
    let mut buf = [0u8; 64];
    let n = server.read(&mut buf, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(&buf[..n], b"still fine");
}

#[test]
fn server_resends_final_flight_for_retransmitted_client_flight() {
    let (client_end, server_end) = pipe();

    // Swallow the server's first three flight-6 transmissions (the
    // datagrams carrying a ChangeCipherSpec). The client keeps
    // retransmitting its final flight; the server must answer each one from
    // its Finished state and derive keys exactly once. The recorder sits
    // outside the hook so swallowed transmissions are still observed.
    let ccs_drops = AtomicUsize::new(3);
    let lossy = SendHook::new(Arc::new(server_end), move |datagram| {
        if contains_ccs(datagram)
            && ccs_drops
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Vec::new();
        }
        vec![datagram.to_vec()]
    });
    let server_transport = Recorder::new(Arc::new(lossy));
    let server_sent = Arc::clone(&server_transport.sent);

    let (server_factory, server_inits) = counting_suite_factory();
    let server_cfg = Arc::new(
        server_config()
            .custom_cipher_suites(server_factory)
            .build()
            .unwrap(),
    );
    let client_cfg = Arc::new(client_config().build().unwrap());

    let server =
        thread::spawn(move || Conn::server(Arc::new(server_transport), server_cfg));
    let client = Conn::client(Arc::new(client_end), client_cfg).expect("client handshake");
    let server = server.join().unwrap().expect("server handshake");

    // Key derivation ran once despite at least three redeliveries of the
    // client's ClientKeyExchange+Finished flight.
    assert_eq!(server_inits.load(Ordering::SeqCst), 1);

    // The server produced its flight 6 at least four times (three swallowed
    // plus the one that got through), identical in content each time.
    let sent = server_sent.lock().unwrap();
    let flight6: Vec<&Vec<u8>> = sent.iter().filter(|d| contains_ccs(d)).collect();
    assert!(
        flight6.len() >= 4,
        "expected >= 4 flight-6 transmissions, got {}",
        flight6.len()
    );
    // Record sequence numbers move forward between transmissions, the
    // payload structure does not change.
    let first = parse_records(flight6[0]);
    let last = parse_records(flight6[flight6.len() - 1]);
    assert_eq!(first.len(), last.len());
    for (a, b) in first.iter().zip(last.iter()) {
        assert_eq!(a.ctype, b.ctype);
        assert_eq!(a.epoch, b.epoch);
        assert!(b.seq > a.seq, "sequence must increase on resend");
    }

    client.write(b"recovered").unwrap();
    let mut buf = [0u8; 64];
    let n = server.read(&mut buf, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(&buf[..n], b"recovered");
}

#[test]
fn verbatim_replay_is_ignored() {
    let (client_end, server_end) = pipe();

    let client_recorder = Recorder::new(Arc::new(client_end));
    let client_sent = Arc::clone(&client_recorder.sent);
    let client_transport = Arc::new(client_recorder);

    let server_recorder = Recorder::new(Arc::new(server_end));
    let server_sent = Arc::clone(&server_recorder.sent);

    let server_cfg = Arc::new(server_config().build().unwrap());
    let client_cfg = Arc::new(client_config().build().unwrap());

    let server =
        thread::spawn(move || Conn::server(Arc::new(server_recorder), server_cfg));
    let client_dyn: Arc<dyn dtgram::DatagramTransport> = client_transport.clone();
    let client = Conn::client(client_dyn, client_cfg).expect("client handshake");
    let server = server.join().unwrap().expect("server handshake");

    thread::sleep(Duration::from_millis(200));
    let sends_before = server_sent.lock().unwrap().len();

    // Replay the client's recorded final flight byte-for-byte. Old record
    // sequence numbers fall inside the replay window and are dropped, so
    // the server must not react at all.
    let final_flight = {
        let sent = client_sent.lock().unwrap();
        sent.iter()
            .find(|d| contains_ccs(d))
            .expect("client final flight")
            .clone()
    };
    for _ in 0..3 {
        client_transport.send(&final_flight).unwrap();
        thread::sleep(Duration::from_millis(100));
    }

    let sends_after = server_sent.lock().unwrap().len();
    assert_eq!(
        sends_before, sends_after,
        "server reacted to a verbatim replay"
    );

    // The connection is still healthy.
    client.write(b"alive").unwrap();
    let mut buf = [0u8; 64];
    let n = server.read(&mut buf, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(&buf[..n], b"alive");
}
