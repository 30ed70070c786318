//! The DTLS handshake flights: per-flight *generate* (build the outgoing
//! message batch) and *parse* (validate the peer's response and pick the
//! next flight) steps, as pure functions over (state, cache, config).
//!
//! Flight numbering follows RFC 6347: even flights belong to the server,
//! odd flights to the client; 4b/5b are the abbreviated resumption variants.

mod flight0;
mod flight1;
mod flight2;
mod flight3;
mod flight4;
mod flight4b;
mod flight5;
mod flight5b;
mod flight6;

use std::sync::Arc;

use crate::cache::{HandshakeCache, PullRule};
use crate::config::Config;
use crate::crypto::{CipherSuiteId, KeyExchangeAlgorithm};
use crate::message::extensions::SignatureHashAlgorithm;
use crate::message::{Alert, AlertDescription, Body, Handshake, MessageType};
use crate::state::State;
use crate::Error;

/// Strictly ordered flight positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Flight {
    Flight0,
    Flight1,
    Flight2,
    Flight3,
    Flight4,
    Flight4b,
    Flight5,
    Flight5b,
    Flight6,
}

impl Flight {
    /// The last flight a side sends: after this, Sending goes straight to
    /// Finished.
    pub fn is_last_send_flight(&self) -> bool {
        matches!(self, Flight::Flight6 | Flight::Flight5b)
    }

    /// The last flight a side expects to receive; a parse returning the
    /// current flight here completes the handshake.
    pub fn is_last_recv_flight(&self) -> bool {
        matches!(self, Flight::Flight5 | Flight::Flight4b)
    }

    /// Whether the flight is retransmitted on timeout. HelloVerifyRequest
    /// (and the empty flight 0) must stay stateless, so they are not.
    pub fn has_retransmit(&self) -> bool {
        !matches!(self, Flight::Flight0 | Flight::Flight2)
    }

    pub fn generate(
        &self,
        conn: &dyn FlightConn,
        state: &mut State,
        cache: &HandshakeCache,
        cfg: &HandshakeConfig,
    ) -> GenerateResult {
        match self {
            Flight::Flight0 => flight0::generate(conn, state, cache, cfg),
            Flight::Flight1 => flight1::generate(conn, state, cache, cfg),
            Flight::Flight2 => flight2::generate(conn, state, cache, cfg),
            Flight::Flight3 => flight3::generate(conn, state, cache, cfg),
            Flight::Flight4 => flight4::generate(conn, state, cache, cfg),
            Flight::Flight4b => flight4b::generate(conn, state, cache, cfg),
            Flight::Flight5 => flight5::generate(conn, state, cache, cfg),
            Flight::Flight5b => flight5b::generate(conn, state, cache, cfg),
            Flight::Flight6 => flight6::generate(conn, state, cache, cfg),
        }
    }

    pub fn parse(
        &self,
        conn: &dyn FlightConn,
        state: &mut State,
        cache: &HandshakeCache,
        cfg: &HandshakeConfig,
    ) -> ParseResult {
        match self {
            Flight::Flight0 => flight0::parse(conn, state, cache, cfg),
            Flight::Flight1 => flight1::parse(conn, state, cache, cfg),
            Flight::Flight2 => flight2::parse(conn, state, cache, cfg),
            Flight::Flight3 => flight3::parse(conn, state, cache, cfg),
            Flight::Flight4 => flight4::parse(conn, state, cache, cfg),
            Flight::Flight4b => flight4b::parse(conn, state, cache, cfg),
            Flight::Flight5 => flight5::parse(conn, state, cache, cfg),
            Flight::Flight5b => flight5b::parse(conn, state, cache, cfg),
            Flight::Flight6 => flight6::parse(conn, state, cache, cfg),
        }
    }
}

/// What a flight needs from the connection besides state/cache: replaying
/// records that were queued while their epoch's keys did not exist yet.
pub(crate) trait FlightConn {
    fn handle_queued_packets(&self, state: &mut State) -> Result<(), Error>;
}

/// Shared, immutable handshake configuration derived from [`Config`].
pub(crate) struct HandshakeConfig {
    pub config: Arc<Config>,
    pub initial_epoch: u16,
    pub local_cipher_suite_ids: Vec<CipherSuiteId>,
}

impl HandshakeConfig {
    pub fn new(config: Arc<Config>) -> Self {
        let local_cipher_suite_ids = config.local_cipher_suite_ids();
        HandshakeConfig {
            config,
            initial_epoch: 0,
            local_cipher_suite_ids,
        }
    }

    pub fn local_signature_schemes(&self) -> &[SignatureHashAlgorithm] {
        self.config.signature_schemes()
    }
}

/// A fatal flight failure: the alert to notify the peer with (best effort)
/// and the error to surface locally.
#[derive(Debug)]
pub(crate) struct FlightError {
    pub alert: Option<Alert>,
    pub error: Error,
}

impl FlightError {
    pub fn fatal(description: AlertDescription, error: Error) -> Self {
        FlightError {
            alert: Some(Alert::fatal(description)),
            error,
        }
    }

    pub fn internal(error: Error) -> Self {
        FlightError {
            alert: Some(Alert::fatal(AlertDescription::InternalError)),
            error,
        }
    }
}

/// `Ok(None)` means "no complete flight from the peer yet, keep waiting".
pub(crate) type ParseResult = Result<Option<Flight>, FlightError>;
pub(crate) type GenerateResult = Result<Vec<Packet>, FlightError>;

/// One outgoing record, before sequence assignment and encryption.
#[derive(Debug, Clone)]
pub(crate) struct Packet {
    pub epoch: u16,
    pub content: RecordContent,
    pub should_encrypt: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum RecordContent {
    Handshake(Handshake),
    ChangeCipherSpec,
    Alert(Alert),
    ApplicationData(Vec<u8>),
}

impl Packet {
    pub fn handshake(body: Body) -> Packet {
        Packet {
            epoch: 0,
            content: RecordContent::Handshake(Handshake::new(body, 0)),
            should_encrypt: false,
        }
    }

    pub fn encrypted_handshake(epoch: u16, body: Body) -> Packet {
        Packet {
            epoch,
            content: RecordContent::Handshake(Handshake::new(body, 0)),
            should_encrypt: true,
        }
    }

    pub fn change_cipher_spec() -> Packet {
        Packet {
            epoch: 0,
            content: RecordContent::ChangeCipherSpec,
            should_encrypt: false,
        }
    }
}

/// Parse a cached raw handshake message back into a typed body.
pub(crate) fn parse_cached(
    raw: &[u8],
    kx: Option<KeyExchangeAlgorithm>,
) -> Result<Body, FlightError> {
    Handshake::parse(raw, kx)
        .map(|(_, handshake)| handshake.body)
        .map_err(|_| FlightError::internal(Error::ParseFailed))
}

/// The canonical full-handshake transcript rules, CH through CKE. Rules for
/// messages not in the cache contribute nothing, which is what makes the
/// same list usable on both sides and at every phase.
pub(crate) fn full_handshake_rules(epoch: u16) -> Vec<PullRule> {
    vec![
        PullRule::required(MessageType::ClientHello, epoch, true),
        PullRule::required(MessageType::ServerHello, epoch, false),
        PullRule::required(MessageType::Certificate, epoch, false),
        PullRule::required(MessageType::ServerKeyExchange, epoch, false),
        PullRule::required(MessageType::CertificateRequest, epoch, false),
        PullRule::required(MessageType::ServerHelloDone, epoch, false),
        PullRule::required(MessageType::Certificate, epoch, true),
        PullRule::required(MessageType::ClientKeyExchange, epoch, true),
    ]
}

/// Transcript rules through the client CertificateVerify (what the client
/// Finished verify_data covers).
pub(crate) fn rules_through_certificate_verify(epoch: u16) -> Vec<PullRule> {
    let mut rules = full_handshake_rules(epoch);
    rules.push(PullRule::required(
        MessageType::CertificateVerify,
        epoch,
        true,
    ));
    rules
}

/// Transcript rules through the client Finished (what the server Finished
/// verify_data covers).
pub(crate) fn rules_through_client_finished(epoch: u16) -> Vec<PullRule> {
    let mut rules = rules_through_certificate_verify(epoch);
    rules.push(PullRule::required(MessageType::Finished, epoch + 1, true));
    rules
}
