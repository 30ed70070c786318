use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::cache::HandshakeCache;
use crate::config::{ClientAuthType, Config};
use crate::flights::{Flight, FlightConn, HandshakeConfig, Packet, RecordContent};
use crate::fragment::FragmentBuffer;
use crate::fsm::{HandshakeFsm, HandshakeState};
use crate::mailbox::Mailbox;
use crate::message::extensions::SrtpProfile;
use crate::message::{
    unpack_datagram, Alert, AlertDescription, ChangeCipherSpec, ContentType, DtlsRecord, Header,
    ProtocolVersion, Random, RecordHeader, HANDSHAKE_HEADER_SIZE, RECORD_HEADER_SIZE,
};
use crate::state::{SessionSnapshot, State};
use crate::transport::DatagramTransport;
use crate::Error;

/// How often the read loop wakes up to observe shutdown.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);

const INBOUND_BUFFER_SIZE: usize = 8192;

/// A DTLS 1.2 connection over an unreliable datagram transport.
///
/// Two loops run per connection: a read loop that demultiplexes records and
/// feeds the handshake cache, and a driver that runs the flight state
/// machine (and keeps servicing retransmitted final flights after
/// completion). `Conn::client`/`Conn::server` return once the handshake is
/// complete.
pub struct Conn {
    inner: Arc<ConnInner>,
    reader: Option<JoinHandle<()>>,
    driver: Option<JoinHandle<()>>,
}

impl Conn {
    /// Connect as a client and run the handshake to completion.
    pub fn client(
        transport: Arc<dyn DatagramTransport>,
        config: Arc<Config>,
    ) -> Result<Conn, Error> {
        Conn::create(transport, config, true, None)
    }

    /// Accept as a server and run the handshake to completion.
    pub fn server(
        transport: Arc<dyn DatagramTransport>,
        config: Arc<Config>,
    ) -> Result<Conn, Error> {
        Conn::create(transport, config, false, None)
    }

    /// Rebuild a connection from an exported snapshot without re-running
    /// the handshake.
    pub fn resume(
        transport: Arc<dyn DatagramTransport>,
        config: Arc<Config>,
        snapshot: SessionSnapshot,
    ) -> Result<Conn, Error> {
        let is_client = snapshot.is_client;
        Conn::create(transport, config, is_client, Some(snapshot))
    }

    fn create(
        transport: Arc<dyn DatagramTransport>,
        config: Arc<Config>,
        is_client: bool,
        initial: Option<SessionSnapshot>,
    ) -> Result<Conn, Error> {
        // Credential requirements only apply when a handshake will run; a
        // snapshot already carries the negotiated secrets.
        if initial.is_none() {
            validate_role(&config, is_client)?;
        }

        let mut state = State::new(is_client);
        let (initial_flight, initial_fsm_state) = match initial {
            Some(snapshot) => {
                apply_snapshot(&mut state, &config, snapshot)?;
                let flight = if is_client {
                    Flight::Flight5
                } else {
                    Flight::Flight6
                };
                (flight, HandshakeState::Finished)
            }
            None => {
                if is_client {
                    seed_client_session(&mut state, &config);
                }
                let flight = if is_client {
                    Flight::Flight1
                } else {
                    Flight::Flight0
                };
                (flight, HandshakeState::Preparing)
            }
        };

        transport.set_read_timeout(Some(READ_POLL_INTERVAL))?;

        let handshake_timeout = config.handshake_timeout();
        let inner = Arc::new(ConnInner {
            transport,
            cfg: HandshakeConfig::new(config),
            state: Mutex::new(state),
            cache: HandshakeCache::new(),
            fragment: Mutex::new(FragmentBuffer::new()),
            queued: Mutex::new(Vec::new()),
            decrypted: Mutex::new(VecDeque::new()),
            decrypted_cv: Condvar::new(),
            mailbox: Mailbox::new(),
            closed: AtomicBool::new(false),
            closed_mutex: Mutex::new(()),
            closed_cv: Condvar::new(),
            handshake_completed: AtomicBool::new(false),
            done: Mutex::new(None),
            done_cv: Condvar::new(),
        });

        let reader = {
            let inner = Arc::clone(&inner);
            std::thread::spawn(move || read_loop(inner))
        };
        let driver = {
            let inner = Arc::clone(&inner);
            std::thread::spawn(move || {
                let mut fsm = HandshakeFsm::new(initial_flight, &inner);
                let error = fsm.run(&inner, initial_fsm_state);
                // Plain cancellation after completion is a clean exit.
                if !matches!(error, Error::ConnectionClosed) {
                    inner.post_error(error);
                }
            })
        };

        let conn = Conn {
            inner,
            reader: Some(reader),
            driver: Some(driver),
        };

        match conn.inner.wait_done(handshake_timeout) {
            Some(Ok(())) => Ok(conn),
            Some(Err(e)) => {
                conn.inner.close();
                Err(e)
            }
            None => {
                conn.inner.close();
                Err(Error::HandshakeTimeout)
            }
        }
    }

    /// Receive one application-data payload. `timeout` of `None` blocks
    /// until data, an error, or close.
    pub fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, Error> {
        if !self.inner.is_handshake_completed() {
            return Err(Error::HandshakeInProgress);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut queue = self.inner.decrypted.lock().unwrap();
        loop {
            if let Some(item) = queue.pop_front() {
                return match item {
                    Ok(data) => {
                        if buf.len() < data.len() {
                            return Err(Error::BufferTooSmall);
                        }
                        buf[..data.len()].copy_from_slice(&data);
                        Ok(data.len())
                    }
                    Err(e) => Err(e),
                };
            }
            if self.inner.is_closed() {
                return Err(Error::ConnectionClosed);
            }

            queue = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::DeadlineExceeded);
                    }
                    let (guard, _) = self
                        .inner
                        .decrypted_cv
                        .wait_timeout(queue, deadline - now)
                        .unwrap();
                    guard
                }
                None => self.inner.decrypted_cv.wait(queue).unwrap(),
            };
        }
    }

    /// Send one application-data payload.
    pub fn write(&self, data: &[u8]) -> Result<usize, Error> {
        if self.inner.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        if !self.inner.is_handshake_completed() {
            return Err(Error::HandshakeInProgress);
        }

        let mut state = self.inner.state();
        let packet = Packet {
            epoch: state.local_epoch,
            content: RecordContent::ApplicationData(data.to_vec()),
            should_encrypt: true,
        };
        self.inner.write_packets(&mut state, &[packet])?;
        Ok(data.len())
    }

    /// Close the connection, sending close_notify when the handshake
    /// completed.
    pub fn close(&self) {
        if self.inner.is_handshake_completed() && !self.inner.is_closed() {
            self.inner
                .notify(Alert::warning(AlertDescription::CloseNotify));
        }
        self.inner.close();
    }

    /// Serializable snapshot for session resumption.
    pub fn export_session(&self) -> Result<SessionSnapshot, Error> {
        self.inner.state().export()
    }

    pub fn selected_srtp_profile(&self) -> Option<SrtpProfile> {
        self.inner.state().srtp_protection_profile
    }

    pub fn negotiated_protocol(&self) -> Option<String> {
        self.inner.state().negotiated_protocol.clone()
    }

    pub fn peer_certificates(&self) -> Vec<Vec<u8>> {
        self.inner.state().peer_certificates.clone()
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.close();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
    }
}

fn validate_role(config: &Config, is_client: bool) -> Result<(), Error> {
    if is_client {
        if config.psk().is_some() {
            if config.psk_identity_hint().is_none() {
                return Err(Error::PskAndIdentityMustBeSet);
            }
        } else if !config.insecure_skip_verify() && config.verify_peer_certificate().is_none() {
            // Chain verification is an external collaborator; a client that
            // cannot verify anything must say so explicitly.
            return Err(Error::NoPeerVerifier);
        }
    } else {
        if config.psk().is_none() && config.certificates().is_empty() {
            return Err(Error::InvalidCertificate);
        }
        if config.client_auth() >= ClientAuthType::VerifyClientCertIfGiven
            && config.verify_peer_certificate().is_none()
            && !config.insecure_skip_verify()
        {
            return Err(Error::NoPeerVerifier);
        }
    }
    Ok(())
}

fn apply_snapshot(
    state: &mut State,
    config: &Config,
    snapshot: SessionSnapshot,
) -> Result<(), Error> {
    state.local_epoch = snapshot.local_epoch;
    state.remote_epoch = snapshot.remote_epoch;
    state.set_sequence_numbers(snapshot.local_sequence_numbers);
    state.local_random = Random(snapshot.local_random);
    state.remote_random = Random(snapshot.remote_random);
    *state.master_secret = snapshot.master_secret;
    state.extended_master_secret = snapshot.extended_master_secret;
    state.srtp_protection_profile = snapshot.srtp_protection_profile;
    state.peer_certificates = snapshot.peer_certificates;
    state.session_id = snapshot.session_id;
    state.cipher_suite = Some(config.create_cipher_suite(snapshot.cipher_suite_id));
    state.init_cipher_suite()
}

/// Offer a previously stored session id for this server, if any.
fn seed_client_session(state: &mut State, config: &Config) {
    let Some(store) = config.session_store() else {
        return;
    };
    match store.get(config.server_name().as_bytes()) {
        Ok(Some(session)) if !session.id.is_empty() => {
            trace!("offering stored session {:02x?}", &session.id);
            state.session_id = session.id;
            *state.master_secret = session.secret;
        }
        Ok(_) => {}
        Err(e) => debug!("session store lookup failed: {e}"),
    }
}

/// A record that could not be handled quietly: the alert to send back (if
/// any) and the error to surface.
struct RecordError {
    reply: Option<Alert>,
    error: Error,
}

pub(crate) struct ConnInner {
    transport: Arc<dyn DatagramTransport>,
    pub(crate) cfg: HandshakeConfig,
    state: Mutex<State>,
    pub(crate) cache: HandshakeCache,
    fragment: Mutex<FragmentBuffer>,
    /// Records for an epoch whose keys are not derived yet; replayed in
    /// arrival order once the cipher suite initializes.
    queued: Mutex<Vec<Vec<u8>>>,
    decrypted: Mutex<VecDeque<Result<Vec<u8>, Error>>>,
    decrypted_cv: Condvar,
    pub(crate) mailbox: Mailbox,
    closed: AtomicBool,
    closed_mutex: Mutex<()>,
    closed_cv: Condvar,
    handshake_completed: AtomicBool,
    done: Mutex<Option<Result<(), Error>>>,
    done_cv: Condvar,
}

impl ConnInner {
    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn is_client(&self) -> bool {
        self.state().is_client
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_handshake_completed(&self) -> bool {
        self.handshake_completed.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.mailbox.close();
        // Each notify happens under its own mutex so a waiter between its
        // closed-check and its wait cannot miss the wakeup.
        {
            let _guard = self.closed_mutex.lock().unwrap();
            self.closed_cv.notify_all();
        }
        {
            let _guard = self.decrypted.lock().unwrap();
            self.decrypted_cv.notify_all();
        }
        {
            let _guard = self.done.lock().unwrap();
            self.done_cv.notify_all();
        }
    }

    /// Sleep that wakes early on close; returns whether we are closed.
    pub fn sleep_or_closed(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.closed_mutex.lock().unwrap();
        loop {
            if self.is_closed() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (g, _) = self.closed_cv.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
        }
    }

    /// Invoked by the state machine on every transition; the first entry
    /// into Finished is handshake completion.
    pub fn on_flight_state(&self, _flight: Flight, state: HandshakeState) {
        if state == HandshakeState::Finished
            && !self.handshake_completed.swap(true, Ordering::SeqCst)
        {
            trace!("handshake completed");
            let mut done = self.done.lock().unwrap();
            if done.is_none() {
                *done = Some(Ok(()));
            }
            self.done_cv.notify_all();
        }
    }

    /// Record the first terminal outcome (before completion) or surface the
    /// error to readers (after completion), then tear down.
    pub fn post_error(&self, error: Error) {
        if self.is_handshake_completed() {
            let mut queue = self.decrypted.lock().unwrap();
            queue.push_back(Err(error));
            self.decrypted_cv.notify_all();
        } else {
            let mut done = self.done.lock().unwrap();
            if done.is_none() {
                *done = Some(Err(error));
            }
            self.done_cv.notify_all();
        }
        self.close();
    }

    fn wait_done(&self, timeout: Duration) -> Option<Result<(), Error>> {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock().unwrap();
        loop {
            if let Some(result) = done.clone() {
                return Some(result);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self.done_cv.wait_timeout(done, deadline - now).unwrap();
            done = guard;
        }
    }

    /// Best-effort alert to the peer.
    pub fn notify(&self, alert: Alert) {
        let mut state = self.state();
        let packet = Packet {
            epoch: state.local_epoch,
            content: RecordContent::Alert(alert),
            should_encrypt: self.is_handshake_completed(),
        };
        if let Err(e) = self.write_packets(&mut state, &[packet]) {
            debug!("failed to send alert: {e}");
        }
    }

    /// Marshal, sequence, cache, fragment, encrypt and send a record batch,
    /// coalescing records into MTU-sized datagrams.
    pub fn write_packets(&self, state: &mut State, packets: &[Packet]) -> Result<(), Error> {
        let mut raw_records: Vec<Vec<u8>> = Vec::new();

        for packet in packets {
            match &packet.content {
                RecordContent::Handshake(handshake) => {
                    // The cache holds the unfragmented message; duplicate
                    // pushes on retransmission are no-ops.
                    trace!(
                        "[handshake:{}] -> {:?} (epoch: {}, msg_seq: {})",
                        if state.is_client { "client" } else { "server" },
                        handshake.header.msg_type,
                        packet.epoch,
                        handshake.header.message_seq
                    );
                    self.cache.push(
                        handshake.marshal(),
                        packet.epoch,
                        handshake.header.message_seq,
                        handshake.header.msg_type,
                        state.is_client,
                    );
                    self.frame_handshake(state, packet, handshake, &mut raw_records)?;
                }
                RecordContent::ChangeCipherSpec => {
                    let mut body = Vec::new();
                    ChangeCipherSpec.serialize(&mut body);
                    raw_records.push(self.frame_record(
                        state,
                        packet,
                        ContentType::ChangeCipherSpec,
                        &body,
                    )?);
                }
                RecordContent::Alert(alert) => {
                    let mut body = Vec::new();
                    alert.serialize(&mut body);
                    raw_records.push(self.frame_record(
                        state,
                        packet,
                        ContentType::Alert,
                        &body,
                    )?);
                }
                RecordContent::ApplicationData(data) => {
                    raw_records.push(self.frame_record(
                        state,
                        packet,
                        ContentType::ApplicationData,
                        data,
                    )?);
                }
            }
        }

        for datagram in compact_records(raw_records, self.cfg.config.mtu()) {
            self.transport.send(&datagram)?;
        }
        Ok(())
    }

    /// Split one handshake message into MTU-sized fragments, each in its own
    /// record with a fresh sequence number.
    fn frame_handshake(
        &self,
        state: &mut State,
        packet: &Packet,
        handshake: &crate::message::Handshake,
        out: &mut Vec<Vec<u8>>,
    ) -> Result<(), Error> {
        let mut body = Vec::new();
        handshake.body.serialize(&mut body);

        let overhead = RECORD_HEADER_SIZE + HANDSHAKE_HEADER_SIZE + 64;
        let max_fragment = self.cfg.config.mtu().saturating_sub(overhead).max(32);

        let total = body.len() as u32;
        let mut offset = 0usize;
        loop {
            let chunk_len = max_fragment.min(body.len() - offset);
            let chunk = &body[offset..offset + chunk_len];

            let mut fragment = Vec::with_capacity(HANDSHAKE_HEADER_SIZE + chunk.len());
            Header {
                msg_type: handshake.header.msg_type,
                length: total,
                message_seq: handshake.header.message_seq,
                fragment_offset: offset as u32,
                fragment_length: chunk.len() as u32,
            }
            .serialize(&mut fragment);
            fragment.extend_from_slice(chunk);

            out.push(self.frame_record(state, packet, ContentType::Handshake, &fragment)?);

            offset += chunk_len;
            if offset >= body.len() {
                break;
            }
        }
        Ok(())
    }

    fn frame_record(
        &self,
        state: &mut State,
        packet: &Packet,
        content_type: ContentType,
        body: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let sequence_number = state.next_sequence_number(packet.epoch)?;
        let header = RecordHeader {
            content_type,
            version: ProtocolVersion::DTLS1_2,
            epoch: packet.epoch,
            sequence_number,
            length: body.len() as u16,
        };

        let mut raw = Vec::with_capacity(RECORD_HEADER_SIZE + body.len());
        header.serialize(&mut raw);
        raw.extend_from_slice(body);

        if packet.should_encrypt {
            let suite = state.cipher_suite()?;
            raw = suite.encrypt(&raw)?;
        }
        Ok(raw)
    }

    /// Process one datagram: split, demultiplex, reassemble, cache, and
    /// wake the driver if any handshake data arrived.
    fn handle_datagram(&self, data: &[u8]) -> Result<(), Error> {
        let records = match unpack_datagram(data) {
            Ok(records) => records,
            Err(e) => {
                // Broken framing is silently discarded (RFC 6347 4.1.2.7).
                debug!("discarded datagram with broken framing: {e}");
                return Ok(());
            }
        };

        let mut has_handshake = false;
        let mut failure: Option<Error> = None;

        {
            let mut state = self.state();
            for record in records {
                match self.handle_incoming_record(&mut state, record, true) {
                    Ok(true) => has_handshake = true,
                    Ok(false) => {}
                    Err(record_error) => {
                        if let Some(reply) = record_error.reply {
                            let packet = Packet {
                                epoch: state.local_epoch,
                                content: RecordContent::Alert(reply),
                                should_encrypt: self.is_handshake_completed(),
                            };
                            if let Err(e) = self.write_packets(&mut state, &[packet]) {
                                debug!("failed to send alert: {e}");
                            }
                        }
                        failure = Some(record_error.error);
                        break;
                    }
                }
            }
        }

        if has_handshake {
            self.mailbox.signal();
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// The per-record demux path. Returns whether the record carried
    /// handshake data. `enqueue` is false when replaying previously queued
    /// records so nothing is queued twice.
    fn handle_incoming_record(
        &self,
        state: &mut State,
        buf: &[u8],
        enqueue: bool,
    ) -> Result<bool, RecordError> {
        let header = match RecordHeader::unmarshal(buf) {
            Ok(header) => header,
            Err(e) => {
                // Decode errors are silently discarded (RFC 6347 4.1.2.7).
                debug!("discarded broken record: {e}");
                return Ok(false);
            }
        };

        let remote_epoch = state.remote_epoch;
        if header.epoch > remote_epoch {
            if header.epoch > remote_epoch + 1 {
                debug!(
                    "discarded far-future record (epoch: {}, seq: {})",
                    header.epoch, header.sequence_number
                );
                return Ok(false);
            }
            if enqueue {
                debug!("received record of next epoch, queuing");
                self.queued.lock().unwrap().push(buf.to_vec());
            }
            return Ok(false);
        }

        let window = self.cfg.config.replay_protection_window();
        if !state
            .replay_detector(header.epoch, window)
            .check(header.sequence_number)
        {
            debug!(
                "discarded duplicate record (epoch: {}, seq: {})",
                header.epoch, header.sequence_number
            );
            return Ok(false);
        }

        // Decrypt; acceptance into the replay window is deferred until the
        // record proves authentic, so forgeries cannot burn sequence slots.
        let plaintext: Vec<u8>;
        let record_bytes: &[u8] = if header.epoch != 0 {
            let Some(suite) = state
                .cipher_suite
                .clone()
                .filter(|suite| suite.is_initialized())
            else {
                if enqueue {
                    debug!("keys not ready for epoch {}, queuing", header.epoch);
                    self.queued.lock().unwrap().push(buf.to_vec());
                }
                return Ok(false);
            };
            match suite.decrypt(buf) {
                Ok(p) => {
                    plaintext = p;
                    &plaintext
                }
                Err(e) => {
                    debug!(
                        "decrypt failed (epoch: {}, seq: {}): {e}",
                        header.epoch, header.sequence_number
                    );
                    return Ok(false);
                }
            }
        } else {
            buf
        };

        let pushed = self.fragment.lock().unwrap().push(record_bytes);
        match pushed {
            Err(e) => {
                debug!("defragment failed: {e}");
                return Ok(false);
            }
            Ok(true) => {
                state
                    .replay_detector(header.epoch, window)
                    .accept(header.sequence_number);
                self.drain_reassembled(state);
                return Ok(true);
            }
            Ok(false) => {}
        }

        let record = match DtlsRecord::unmarshal(record_bytes) {
            Ok(record) => record,
            Err(e) => {
                debug!("discarded undecodable record: {e}");
                return Ok(false);
            }
        };

        match record.header.content_type {
            ContentType::ChangeCipherSpec => {
                let ready = state
                    .cipher_suite
                    .as_ref()
                    .map(|s| s.is_initialized())
                    .unwrap_or(false);
                if !ready {
                    if enqueue {
                        debug!("keys not ready for ChangeCipherSpec, queuing");
                        self.queued.lock().unwrap().push(buf.to_vec());
                    }
                    return Ok(false);
                }
                if ChangeCipherSpec::unmarshal(&record.fragment).is_none() {
                    debug!("discarded malformed ChangeCipherSpec");
                    return Ok(false);
                }

                // Epoch transitions are one-directional: only the immediate
                // successor is accepted, anything else is silently ignored.
                let new_remote_epoch = record.header.epoch + 1;
                if state.remote_epoch + 1 == new_remote_epoch {
                    trace!("<- ChangeCipherSpec (epoch: {new_remote_epoch})");
                    state.remote_epoch = new_remote_epoch;
                    state
                        .replay_detector(header.epoch, window)
                        .accept(header.sequence_number);
                } else {
                    debug!("dropped out-of-order ChangeCipherSpec");
                }
                Ok(false)
            }
            ContentType::Alert => {
                let alert = match Alert::parse(&record.fragment) {
                    Ok((_, alert)) => alert,
                    Err(_) => {
                        debug!("discarded malformed alert");
                        return Ok(false);
                    }
                };
                state
                    .replay_detector(header.epoch, window)
                    .accept(header.sequence_number);
                trace!("<- alert {:?} {:?}", alert.level, alert.description);

                let reply = if alert.description == AlertDescription::CloseNotify {
                    // Answer close_notify with close_notify (RFC 5246 7.2.1).
                    Some(Alert::warning(AlertDescription::CloseNotify))
                } else {
                    None
                };
                Err(RecordError {
                    reply,
                    error: Error::PeerAlert {
                        level: alert.level,
                        description: alert.description,
                    },
                })
            }
            ContentType::ApplicationData => {
                if record.header.epoch == 0 {
                    return Err(RecordError {
                        reply: Some(Alert::fatal(AlertDescription::UnexpectedMessage)),
                        error: Error::ApplicationDataEpochZero,
                    });
                }
                state
                    .replay_detector(header.epoch, window)
                    .accept(header.sequence_number);

                let mut queue = self.decrypted.lock().unwrap();
                queue.push_back(Ok(record.fragment));
                self.decrypted_cv.notify_all();
                Ok(false)
            }
            ContentType::Handshake => {
                // Handshake records are consumed by the reassembler above.
                Ok(false)
            }
        }
    }

    /// Move completed messages from the reassembler into the cache.
    fn drain_reassembled(&self, state: &mut State) {
        let mut fragment = self.fragment.lock().unwrap();
        while let Some((message, epoch)) = fragment.pop() {
            let header = match Header::parse(&message) {
                Ok((_, header)) => header,
                Err(_) => {
                    debug!("dropped reassembled message with broken header");
                    continue;
                }
            };
            trace!(
                "[handshake:{}] <- {:?} (epoch: {}, msg_seq: {})",
                if state.is_client { "client" } else { "server" },
                header.msg_type,
                epoch,
                header.message_seq
            );
            self.cache.push(
                message,
                epoch,
                header.message_seq,
                header.msg_type,
                !state.is_client,
            );
        }
    }
}

impl FlightConn for ConnInner {
    fn handle_queued_packets(&self, state: &mut State) -> Result<(), Error> {
        let queued: Vec<Vec<u8>> = std::mem::take(&mut *self.queued.lock().unwrap());
        for record in queued {
            match self.handle_incoming_record(state, &record, false) {
                Ok(_) => {}
                Err(record_error) => {
                    if record_error.error.is_fatal() || record_error.error.is_fatal_or_close_notify()
                    {
                        return Err(record_error.error);
                    }
                }
            }
        }
        Ok(())
    }
}

fn compact_records(raw_records: Vec<Vec<u8>>, mtu: usize) -> Vec<Vec<u8>> {
    let mut datagrams: Vec<Vec<u8>> = Vec::new();
    let mut current: Vec<u8> = Vec::new();

    for record in raw_records {
        if !current.is_empty() && current.len() + record.len() >= mtu {
            datagrams.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(&record);
    }
    if !current.is_empty() {
        datagrams.push(current);
    }
    datagrams
}

fn read_loop(inner: Arc<ConnInner>) {
    let mut buf = vec![0u8; INBOUND_BUFFER_SIZE];
    loop {
        if inner.is_closed() {
            break;
        }
        let n = match inner.transport.recv(&mut buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(e) => {
                if !inner.is_closed() {
                    warn!("transport receive failed: {e}");
                    inner.post_error(Error::Transport(e.to_string()));
                }
                break;
            }
        };

        if let Err(error) = inner.handle_datagram(&buf[..n]) {
            if error.is_fatal_or_close_notify() || error.is_fatal() {
                inner.post_error(error);
                break;
            }
            // Warning-level alerts are surfaced to readers but the
            // connection keeps running.
            if inner.is_handshake_completed() {
                let mut queue = inner.decrypted.lock().unwrap();
                queue.push_back(Err(error));
                inner.decrypted_cv.notify_all();
            }
        }
    }
}
