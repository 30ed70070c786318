//! Flight 2: the server answers the first ClientHello with a stateless
//! cookie (HelloVerifyRequest, RFC 6347 4.2.1). Not retransmitted on
//! timeout: the client re-sends its ClientHello instead.

use super::{
    parse_cached, Flight, FlightConn, FlightError, GenerateResult, HandshakeConfig, Packet,
    ParseResult,
};
use crate::cache::{HandshakeCache, PullRule};
use crate::message::{
    AlertDescription, Body, HelloVerifyRequest, MessageType, ProtocolVersion,
};
use crate::state::State;
use crate::Error;

pub(super) fn generate(
    _conn: &dyn FlightConn,
    state: &mut State,
    _cache: &HandshakeCache,
    _cfg: &HandshakeConfig,
) -> GenerateResult {
    Ok(vec![Packet::handshake(Body::HelloVerifyRequest(
        HelloVerifyRequest {
            version: ProtocolVersion::DTLS1_2,
            cookie: state.cookie.clone(),
        },
    ))])
}

pub(super) fn parse(
    _conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> ParseResult {
    let Some((seq, msgs)) = cache.full_pull_map(
        state.handshake_recv_sequence,
        &[PullRule::required(
            MessageType::ClientHello,
            cfg.initial_epoch,
            true,
        )],
    ) else {
        // Handshake data arrived but the cookie-bearing hello is not here:
        // the client is retransmitting its first ClientHello because our
        // HelloVerifyRequest was lost. Echo the identical HelloVerifyRequest
        // (same message sequence) rather than retransmitting on a timer
        // (RFC 6347 4.2.4.1).
        return Ok(Some(Flight::Flight2));
    };

    let raw = msgs
        .get(&MessageType::ClientHello)
        .ok_or_else(|| FlightError::internal(Error::Internal("pull map missing ClientHello")))?;
    let Body::ClientHello(client_hello) = parse_cached(raw, None)? else {
        return Err(FlightError::internal(Error::ParseFailed));
    };

    if client_hello.cookie != state.cookie {
        return Err(FlightError::fatal(
            AlertDescription::AccessDenied,
            Error::CookieMismatch,
        ));
    }

    state.handshake_recv_sequence = seq;
    Ok(Some(Flight::Flight4))
}
