//! Flight 5b: the client's abbreviated-handshake reply, just
//! ChangeCipherSpec + Finished.

use super::{
    parse_cached, Flight, FlightConn, FlightError, GenerateResult, HandshakeConfig, Packet,
    ParseResult,
};
use crate::cache::{HandshakeCache, PullRule};
use crate::crypto::prf;
use crate::message::{AlertDescription, Body, Finished, MessageType};
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
        let transcript = cache.pull_and_merge(&[
            PullRule::required(MessageType::ClientHello, cfg.initial_epoch, true),
            PullRule::required(MessageType::ServerHello, cfg.initial_epoch, false),
            PullRule::required(MessageType::Finished, cfg.initial_epoch + 1, false),
        ]);
        state.local_verify_data = prf::verify_data_client(
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
    // Only reached when the server retransmits its flight 4b: re-verify and
    // let the state machine resend our final flight.
    let Some((_, msgs)) = cache.full_pull_map(
        state.handshake_recv_sequence + 1,
        &[PullRule::required(
            MessageType::Finished,
            cfg.initial_epoch + 1,
            false,
        )],
    ) else {
        return Ok(None);
    };

    let raw = msgs
        .get(&MessageType::Finished)
        .ok_or_else(|| FlightError::internal(Error::Internal("pull map missing Finished")))?;
    let Body::Finished(finished) = parse_cached(raw, None)? else {
        return Err(FlightError::internal(Error::ParseFailed));
    };

    let suite = state.cipher_suite().map_err(FlightError::internal)?;
    let transcript = cache.pull_and_merge(&[
        PullRule::required(MessageType::ClientHello, cfg.initial_epoch, true),
        PullRule::required(MessageType::ServerHello, cfg.initial_epoch, false),
    ]);
    let expected =
        prf::verify_data_server(suite.hash_algorithm(), &state.master_secret, &transcript)
            .map_err(FlightError::internal)?;
    if !prf::ct_eq(&expected, &finished.verify_data) {
        return Err(FlightError::fatal(
            AlertDescription::HandshakeFailure,
            Error::VerifyDataMismatch,
        ));
    }

    Ok(Some(Flight::Flight5b))
}
