//! Flight 4b: the server's abbreviated-handshake flight for session
//! resumption (ServerHello + ChangeCipherSpec + Finished in one batch).

use super::{
    parse_cached, Flight, FlightConn, FlightError, GenerateResult, HandshakeConfig, Packet,
    ParseResult, RecordContent,
};
use crate::cache::{HandshakeCache, PullRule};
use crate::config::ExtendedMasterSecretType;
use crate::crypto::prf;
use crate::message::extension::Extension;
use crate::message::extensions::{alpn_protocol_selection, AlpnExt, UseSrtpExt};
use crate::message::{
    AlertDescription, Body, Finished, MessageType, ProtocolVersion, ServerHello,
};
use crate::state::State;
use crate::Error;

pub(super) fn generate(
    _conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> GenerateResult {
    state.ensure_local_random();
    let suite = state.cipher_suite().map_err(FlightError::internal)?;

    // The stored master secret drives key derivation directly.
    state.init_cipher_suite().map_err(FlightError::internal)?;

    let mut extensions = vec![Extension::RenegotiationInfo];
    if matches!(
        cfg.config.extended_master_secret(),
        ExtendedMasterSecretType::Request | ExtendedMasterSecretType::Require
    ) && state.extended_master_secret
    {
        extensions.push(Extension::ExtendedMasterSecret);
    }
    if let Some(profile) = state.srtp_protection_profile {
        extensions.push(Extension::UseSrtp(UseSrtpExt::new(&[profile])));
    }
    match alpn_protocol_selection(cfg.config.alpn_protocols(), &state.peer_supported_protocols) {
        Ok(Some(protocol)) => {
            extensions.push(Extension::Alpn(AlpnExt::new(&[protocol.clone()])));
            state.negotiated_protocol = Some(protocol);
        }
        Ok(None) => {}
        Err(()) => {
            return Err(FlightError::fatal(
                AlertDescription::NoApplicationProtocol,
                Error::NoApplicationProtocol,
            ));
        }
    }

    let server_hello = Packet::handshake(Body::ServerHello(ServerHello {
        version: ProtocolVersion::DTLS1_2,
        random: state.local_random,
        session_id: state.session_id.clone(),
        cipher_suite: suite.id().as_u16(),
        compression_method: 0,
        extensions,
    }));

    if state.local_verify_data.is_empty() {
        // The ServerHello is not cached yet; include its predicted wire
        // bytes in the transcript.
        let mut transcript = cache.pull_and_merge(&[PullRule::required(
            MessageType::ClientHello,
            cfg.initial_epoch,
            true,
        )]);
        if let RecordContent::Handshake(handshake) = &server_hello.content {
            let mut predicted = handshake.clone();
            predicted.header.message_seq = state.handshake_send_sequence;
            transcript.extend_from_slice(&predicted.marshal());
        }
        state.local_verify_data = prf::verify_data_server(
            suite.hash_algorithm(),
            &state.master_secret,
            &transcript,
        )
        .map_err(FlightError::internal)?;
    }

    Ok(vec![
        server_hello,
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
    conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> ParseResult {
    conn.handle_queued_packets(state)
        .map_err(FlightError::internal)?;

    let Some((seq, msgs)) = cache.full_pull_map(
        state.handshake_recv_sequence,
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
    let Body::Finished(finished) = parse_cached(raw, None)? else {
        return Err(FlightError::internal(Error::ParseFailed));
    };

    // Client Finished in the abbreviated handshake covers ClientHello,
    // ServerHello and the server Finished.
    let suite = state.cipher_suite().map_err(FlightError::internal)?;
    let transcript = cache.pull_and_merge(&[
        PullRule::required(MessageType::ClientHello, cfg.initial_epoch, true),
        PullRule::required(MessageType::ServerHello, cfg.initial_epoch, false),
        PullRule::required(MessageType::Finished, cfg.initial_epoch + 1, false),
    ]);
    let expected =
        prf::verify_data_client(suite.hash_algorithm(), &state.master_secret, &transcript)
            .map_err(FlightError::internal)?;
    if !prf::ct_eq(&expected, &finished.verify_data) {
        return Err(FlightError::fatal(
            AlertDescription::HandshakeFailure,
            Error::VerifyDataMismatch,
        ));
    }

    state.handshake_recv_sequence = seq;
    Ok(Some(Flight::Flight4b))
}
