//! Flight 6: the server's ChangeCipherSpec + Finished. After this the
//! server is done; its parse step only services retransmitted final client
//! flights.

use super::{
    parse_cached, rules_through_client_finished, Flight, FlightConn, FlightError, GenerateResult,
    HandshakeConfig, Packet, ParseResult,
};
use crate::cache::{HandshakeCache, PullRule};
use crate::crypto::prf;
use crate::message::{Body, Finished, MessageType};
use crate::state::State;
use crate::Error;

pub(super) fn generate(
    _conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> GenerateResult {
    if state.local_verify_data.is_empty() {
        let suite = state.cipher_suite().map_err(FlightError::internal)?;
        // The server Finished covers the whole transcript including the
        // client's Finished; everything is in the cache by now.
        let transcript = cache.pull_and_merge(&rules_through_client_finished(cfg.initial_epoch));
        state.local_verify_data = prf::verify_data_server(
            suite.hash_algorithm(),
            &state.master_secret,
            &transcript,
        )
        .map_err(FlightError::internal)?;
    }

    Ok(vec![
        Packet::change_cipher_spec(),
        Packet::encrypted_handshake(
            1,
            Body::Finished(Finished {
                verify_data: state.local_verify_data.clone(),
            }),
        ),
    ])
}

pub(super) fn parse(
    _conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> ParseResult {
    // The receive cursor is already past the client Finished; look one step
    // back for it. Finding it again means the client retransmitted its last
    // flight and our flight 6 must be resent.
    let Some((_, msgs)) = cache.full_pull_map(
        state.handshake_recv_sequence.wrapping_sub(1),
        &[PullRule::required(
            MessageType::Finished,
            cfg.initial_epoch + 1,
            true,
        )],
    ) else {
        return Ok(None);
    };

    let raw = msgs
        .get(&MessageType::Finished)
        .ok_or_else(|| FlightError::internal(Error::Internal("pull map missing Finished")))?;
    let Body::Finished(_) = parse_cached(raw, None)? else {
        return Err(FlightError::internal(Error::ParseFailed));
    };

    Ok(Some(Flight::Flight6))
}
