//! Shared helpers for integration tests: an in-memory datagram pipe, fault
//! injection wrappers, record-level inspection and config builders.

#![allow(unused)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use dtgram::crypto::{create_cipher_suite, CipherSuite, CipherSuiteId};
use dtgram::{Config, DatagramTransport, DtlsCertificate, Error, Session, SessionStore};

/// Parsed DTLS record header, enough for assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecHdr {
    pub ctype: u8,
    pub epoch: u16,
    pub seq: u64,
}

/// Handshake message types (RFC 5246 / 6347).
pub const CLIENT_HELLO: u8 = 1;
pub const SERVER_HELLO: u8 = 2;
pub const HELLO_VERIFY_REQUEST: u8 = 3;
pub const CERTIFICATE: u8 = 11;
pub const SERVER_KEY_EXCHANGE: u8 = 12;
pub const SERVER_HELLO_DONE: u8 = 14;
pub const FINISHED: u8 = 20;

pub const CONTENT_CCS: u8 = 20;
pub const CONTENT_ALERT: u8 = 21;
pub const CONTENT_HANDSHAKE: u8 = 22;

/// Parse DTLS record headers from a datagram.
pub fn parse_records(datagram: &[u8]) -> Vec<RecHdr> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
        let seq_bytes = [
            0u8,
            0u8,
            datagram[i + 5],
            datagram[i + 6],
            datagram[i + 7],
            datagram[i + 8],
            datagram[i + 9],
            datagram[i + 10],
        ];
        let seq = u64::from_be_bytes(seq_bytes);
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        out.push(RecHdr { ctype, epoch, seq });
        i += 13 + len;
    }
    out
}

/// Plaintext handshake message types inside a datagram (content type 22).
pub fn parse_handshake_types(datagram: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        if ctype == CONTENT_HANDSHAKE && i + 14 <= datagram.len() {
            out.push(datagram[i + 13]);
        }
        i += 13 + len;
    }
    out
}

pub fn contains_ccs(datagram: &[u8]) -> bool {
    parse_records(datagram).iter().any(|r| r.ctype == CONTENT_CCS)
}

// ---------------------------------------------------------------------------
// In-memory datagram pipe
// ---------------------------------------------------------------------------

struct PipeCore {
    queues: [Mutex<VecDeque<Vec<u8>>>; 2],
    cvs: [Condvar; 2],
}

pub struct Pipe {
    core: Arc<PipeCore>,
    tx: usize,
    rx: usize,
    read_timeout: Mutex<Option<Duration>>,
}

/// Two connected datagram endpoints, loss-free and order-preserving.
/// Also the central place every test passes through, so logging gets wired
/// up here (RUST_LOG=trace shows the flight transitions).
pub fn pipe() -> (Pipe, Pipe) {
    let _ = env_logger::builder().is_test(true).try_init();
    let core = Arc::new(PipeCore {
        queues: [Mutex::new(VecDeque::new()), Mutex::new(VecDeque::new())],
        cvs: [Condvar::new(), Condvar::new()],
    });
    let a = Pipe {
        core: Arc::clone(&core),
        tx: 0,
        rx: 1,
        read_timeout: Mutex::new(None),
    };
    let b = Pipe {
        core,
        tx: 1,
        rx: 0,
        read_timeout: Mutex::new(None),
    };
    (a, b)
}

impl DatagramTransport for Pipe {
    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let mut queue = self.core.queues[self.tx].lock().unwrap();
        queue.push_back(buf.to_vec());
        self.core.cvs[self.tx].notify_all();
        Ok(buf.len())
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = *self.read_timeout.lock().unwrap();
        let mut queue = self.core.queues[self.rx].lock().unwrap();
        loop {
            if let Some(datagram) = queue.pop_front() {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                return Ok(n);
            }
            queue = match timeout {
                Some(timeout) => {
                    let (guard, result) = self.core.cvs[self.rx]
                        .wait_timeout(queue, timeout)
                        .unwrap();
                    if result.timed_out() && guard.is_empty() {
                        return Err(io::Error::new(io::ErrorKind::TimedOut, "recv timeout"));
                    }
                    guard
                }
                None => self.core.cvs[self.rx].wait(queue).unwrap(),
            };
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        *self.read_timeout.lock().unwrap() = timeout;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fault injection and observation
// ---------------------------------------------------------------------------

type SendHookFn = dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send;

/// Transform every outbound datagram: drop (empty vec), duplicate, corrupt
/// or prefix it. Receives pass through untouched.
pub struct SendHook {
    inner: Arc<dyn DatagramTransport>,
    hook: Mutex<Box<SendHookFn>>,
}

impl SendHook {
    pub fn new(
        inner: Arc<dyn DatagramTransport>,
        hook: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    ) -> Self {
        SendHook {
            inner,
            hook: Mutex::new(Box::new(hook)),
        }
    }
}

impl DatagramTransport for SendHook {
    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let outputs = (self.hook.lock().unwrap())(buf);
        for datagram in outputs {
            self.inner.send(&datagram)?;
        }
        Ok(buf.len())
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)
    }
}

/// Record every datagram passing through `send`.
pub struct Recorder {
    inner: Arc<dyn DatagramTransport>,
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Recorder {
    pub fn new(inner: Arc<dyn DatagramTransport>) -> Self {
        Recorder {
            inner,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl DatagramTransport for Recorder {
    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.sent.lock().unwrap().push(buf.to_vec());
        self.inner.send(buf)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.recv(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)
    }
}

// ---------------------------------------------------------------------------
// Counting cipher suites
// ---------------------------------------------------------------------------

/// Wraps a real suite and counts `init` invocations.
#[derive(Debug)]
pub struct CountingSuite {
    inner: Arc<dyn CipherSuite>,
    init_calls: Arc<AtomicUsize>,
}

impl CipherSuite for CountingSuite {
    fn id(&self) -> CipherSuiteId {
        self.inner.id()
    }

    fn certificate_type(&self) -> Option<dtgram::crypto::CertificateType> {
        self.inner.certificate_type()
    }

    fn authentication_type(&self) -> dtgram::crypto::AuthenticationType {
        self.inner.authentication_type()
    }

    fn key_exchange_algorithm(&self) -> dtgram::crypto::KeyExchangeAlgorithm {
        self.inner.key_exchange_algorithm()
    }

    fn hash_algorithm(&self) -> dtgram::message::extensions::HashAlgorithm {
        self.inner.hash_algorithm()
    }

    fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    fn init(
        &self,
        master_secret: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
        is_client: bool,
    ) -> Result<(), Error> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .init(master_secret, client_random, server_random, is_client)
    }

    fn encrypt(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        self.inner.encrypt(raw)
    }

    fn decrypt(&self, raw: &[u8]) -> Result<Vec<u8>, Error> {
        self.inner.decrypt(raw)
    }
}

/// A suite factory that counts every `init` across the suites it built.
pub fn counting_suite_factory() -> (
    Arc<dyn Fn(CipherSuiteId) -> Option<Arc<dyn CipherSuite>> + Send + Sync>,
    Arc<AtomicUsize>,
) {
    let init_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&init_calls);
    let factory = Arc::new(move |id: CipherSuiteId| -> Option<Arc<dyn CipherSuite>> {
        Some(Arc::new(CountingSuite {
            inner: create_cipher_suite(id),
            init_calls: Arc::clone(&counter),
        }) as Arc<dyn CipherSuite>)
    });
    (factory, init_calls)
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Vec<u8>, Session>>,
    pub hits: AtomicUsize,
}

impl SessionStore for MemorySessionStore {
    fn set(&self, id: &[u8], session: Session) -> Result<(), String> {
        self.sessions.lock().unwrap().insert(id.to_vec(), session);
        Ok(())
    }

    fn get(&self, id: &[u8]) -> Result<Option<Session>, String> {
        let found = self.sessions.lock().unwrap().get(id).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(found)
    }

    fn del(&self, id: &[u8]) -> Result<(), String> {
        self.sessions.lock().unwrap().remove(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Certificates and configs
// ---------------------------------------------------------------------------

pub fn self_signed_certificate(name: &str) -> DtlsCertificate {
    let cert = rcgen::generate_simple_self_signed(vec![name.to_string()])
        .expect("certificate generation");
    let der = cert.serialize_der().expect("certificate DER");
    let key = cert.serialize_private_key_der();
    DtlsCertificate::new(vec![der], &key).expect("DtlsCertificate")
}

/// Fast-paced server config with a fresh self-signed certificate.
pub fn server_config() -> dtgram::ConfigBuilder {
    Config::builder()
        .certificate(self_signed_certificate("localhost"))
        .retransmit_interval(Duration::from_millis(50))
        .flight_retries(12)
        .handshake_timeout(Duration::from_secs(10))
}

/// Fast-paced client config that skips chain verification (tests pin no CA).
pub fn client_config() -> dtgram::ConfigBuilder {
    Config::builder()
        .insecure_skip_verify(true)
        .retransmit_interval(Duration::from_millis(50))
        .flight_retries(12)
        .handshake_timeout(Duration::from_secs(10))
}
