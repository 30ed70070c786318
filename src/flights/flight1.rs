//! Flight 1: the client's opening ClientHello, sent without a cookie.

use super::flight3::{self, build_client_hello};
use super::{
    parse_cached, Flight, FlightConn, FlightError, GenerateResult, HandshakeConfig, ParseResult,
};
use crate::cache::{HandshakeCache, PullRule};
use crate::message::{Body, MessageType};
use crate::state::State;
use crate::Error;

pub(super) fn generate(
    _conn: &dyn FlightConn,
    state: &mut State,
    _cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> GenerateResult {
    Ok(vec![build_client_hello(state, cfg)])
}

pub(super) fn parse(
    conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> ParseResult {
    // The server may skip hello verification (RFC 6347 4.2.1 makes the
    // cookie exchange optional), so either message can arrive here.
    let Some((seq, msgs)) = cache.full_pull_map(
        state.handshake_recv_sequence,
        &[
            PullRule::optional(MessageType::HelloVerifyRequest, cfg.initial_epoch, false),
            PullRule::optional(MessageType::ServerHello, cfg.initial_epoch, false),
        ],
    ) else {
        return Ok(None);
    };

    if msgs.contains_key(&MessageType::ServerHello) {
        // Flights 1 and 2 were skipped; the ClientHello already sent stands
        // and the server's parameter flight is parsed as flight 3.
        return flight3::parse(conn, state, cache, cfg);
    }

    if let Some(raw) = msgs.get(&MessageType::HelloVerifyRequest) {
        let Body::HelloVerifyRequest(hvr) = parse_cached(raw, None)? else {
            return Err(FlightError::internal(Error::ParseFailed));
        };
        state.cookie = hvr.cookie;
        state.handshake_recv_sequence = seq;
        return Ok(Some(Flight::Flight3));
    }

    Ok(None)
}
