//! Session resumption: the abbreviated handshake through a session store,
//! and rebuilding a connection from an exported snapshot.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use dtgram::{Config, Conn};

use common::{
    client_config, parse_handshake_types, pipe, server_config, MemorySessionStore, Recorder,
    CERTIFICATE,
};

#[test]
fn session_store_resumption_skips_certificate_flight() {
    let client_store = Arc::new(MemorySessionStore::default());
    let server_store = Arc::new(MemorySessionStore::default());

    let client_cfg = Arc::new(
        client_config()
            .server_name("resume.example")
            .session_store(Arc::clone(&client_store) as Arc<dyn dtgram::SessionStore>)
            .build()
            .unwrap(),
    );
    let server_cfg = Arc::new(
        server_config()
            .session_store(Arc::clone(&server_store) as Arc<dyn dtgram::SessionStore>)
            .build()
            .unwrap(),
    );

    // First connection: full handshake, sessions stored on both sides.
    {
        let (client_end, server_end) = pipe();
        let server_cfg = Arc::clone(&server_cfg);
        let server = thread::spawn(move || Conn::server(Arc::new(server_end), server_cfg));
        let client =
            Conn::client(Arc::new(client_end), Arc::clone(&client_cfg)).expect("first client");
        let server = server.join().unwrap().expect("first server");

        client.write(b"full").unwrap();
        let mut buf = [0u8; 16];
        let n = server.read(&mut buf, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(&buf[..n], b"full");
    }

    // Second connection with the same stores: abbreviated handshake. The
    // server's flight must not contain a Certificate message.
    let (client_end, server_end) = pipe();
    let server_transport = Recorder::new(Arc::new(server_end));
    let server_sent = Arc::clone(&server_transport.sent);

    let server = {
        let server_cfg = Arc::clone(&server_cfg);
        thread::spawn(move || Conn::server(Arc::new(server_transport), server_cfg))
    };
    let client = Conn::client(Arc::new(client_end), client_cfg).expect("resumed client");
    let server = server.join().unwrap().expect("resumed server");

    assert!(client_store.hits.load(Ordering::SeqCst) >= 1);
    assert!(server_store.hits.load(Ordering::SeqCst) >= 1);

    let sent = server_sent.lock().unwrap();
    let sent_certificate = sent
        .iter()
        .any(|d| parse_handshake_types(d).contains(&CERTIFICATE));
    assert!(
        !sent_certificate,
        "resumed handshake must not send a Certificate"
    );

    client.write(b"resumed").unwrap();
    let mut buf = [0u8; 16];
    let n = server.read(&mut buf, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(&buf[..n], b"resumed");

    server.write(b"welcome back").unwrap();
    let n = client.read(&mut buf, Some(Duration::from_secs(5))).unwrap();
    assert_eq!(&buf[..n], b"welcome back");
}

#[test]
fn snapshot_resume_restores_the_record_layer() {
    let client_cfg = Arc::new(client_config().build().unwrap());
    let server_cfg = Arc::new(server_config().build().unwrap());

    let (client_snapshot, server_snapshot) = {
        let (client_end, server_end) = pipe();
        let server_cfg = Arc::clone(&server_cfg);
        let server = thread::spawn(move || Conn::server(Arc::new(server_end), server_cfg));
        let client =
            Conn::client(Arc::new(client_end), Arc::clone(&client_cfg)).expect("client");
        let server = server.join().unwrap().expect("server");

        client.write(b"before export").unwrap();
        let mut buf = [0u8; 32];
        let n = server.read(&mut buf, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(&buf[..n], b"before export");

        (
            client.export_session().expect("client snapshot"),
            server.export_session().expect("server snapshot"),
        )
    };

    // The snapshot round-trips through its binary form.
    let client_snapshot =
        dtgram::SessionSnapshot::from_bytes(&client_snapshot.to_bytes()).unwrap();
    assert!(client_snapshot.is_client);
    assert_eq!(client_snapshot.master_secret.len(), 48);

    // Fresh transports, no handshake: both sides resume from their
    // snapshots and the record layer picks up where it left off.
    let (client_end, server_end) = pipe();
    let resumed_server = Conn::resume(
        Arc::new(server_end),
        Arc::new(Config::default()),
        server_snapshot,
    )
    .expect("server resume");
    let resumed_client = Conn::resume(
        Arc::new(client_end),
        Arc::new(Config::default()),
        client_snapshot,
    )
    .expect("client resume");

    resumed_client.write(b"after resume").unwrap();
    let mut buf = [0u8; 32];
    let n = resumed_server
        .read(&mut buf, Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(&buf[..n], b"after resume");

    resumed_server.write(b"ack").unwrap();
    let n = resumed_client
        .read(&mut buf, Some(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(&buf[..n], b"ack");
}
