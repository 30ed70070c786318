//! Flight 5: the client's second flight (Certificate?, ClientKeyExchange,
//! CertificateVerify?, ChangeCipherSpec, Finished). Key derivation and
//! cipher suite initialization happen here, exactly once.

use log::{debug, trace};

use super::flight3::handle_server_key_exchange;
use super::{
    full_handshake_rules, parse_cached, rules_through_client_finished, Flight, FlightConn,
    FlightError, GenerateResult, HandshakeConfig, Packet, ParseResult, RecordContent,
};
use crate::cache::{HandshakeCache, PullRule};
use crate::config::Session;
use crate::crypto::signing::{
    leaf_public_key, select_signature_scheme, value_key_message, verify_signature,
};
use crate::crypto::{prf, AuthenticationType};
use crate::message::{
    AlertDescription, Body, Certificate, CertificateVerify, ClientKeyExchange, Finished,
    Handshake, MessageType, ServerKeyExchange,
};
use crate::state::State;
use crate::Error;

fn marshal_with_seq(handshake: &Handshake, message_seq: u16) -> Vec<u8> {
    let mut clone = handshake.clone();
    clone.header.message_seq = message_seq;
    clone.marshal()
}

pub(super) fn generate(
    _conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> GenerateResult {
    let suite = state.cipher_suite().map_err(FlightError::internal)?;
    let local_certificate = cfg.config.certificates().first().cloned();

    let mut packets = Vec::new();

    if state.remote_requested_certificate {
        // An empty chain is the honest reply when we have nothing to offer;
        // the server's policy decides whether that is acceptable.
        let chain = local_certificate
            .as_ref()
            .map(|c| c.certificate_chain.clone())
            .unwrap_or_default();
        packets.push(Packet::handshake(Body::Certificate(Certificate {
            certificates: chain,
        })));
    }

    let client_key_exchange = if cfg.config.psk().is_some() {
        let Some(hint) = cfg.config.psk_identity_hint() else {
            return Err(FlightError::internal(Error::PskAndIdentityMustBeSet));
        };
        ClientKeyExchange {
            public_key: Vec::new(),
            identity: Some(hint.to_vec()),
        }
    } else {
        let Some(key_exchange) = state.key_exchange.as_ref() else {
            return Err(FlightError::internal(Error::Internal(
                "no ephemeral keypair before ClientKeyExchange",
            )));
        };
        ClientKeyExchange {
            public_key: key_exchange.public_key().to_vec(),
            identity: None,
        }
    };
    packets.push(Packet::handshake(Body::ClientKeyExchange(
        client_key_exchange,
    )));

    // ServerKeyExchange is optional for PSK. If the server never sent one,
    // the premaster secret has not been derived yet; do it now with an
    // empty hint.
    let cached_ske = cache
        .pull(&[PullRule::required(
            MessageType::ServerKeyExchange,
            cfg.initial_epoch,
            false,
        )])
        .pop()
        .flatten();
    let server_key_exchange = match &cached_ske {
        Some(raw) => {
            let Body::ServerKeyExchange(ske) =
                parse_cached(raw, Some(suite.key_exchange_algorithm()))?
            else {
                return Err(FlightError::internal(Error::ParseFailed));
            };
            Some(ske)
        }
        None => {
            handle_server_key_exchange(state, cfg, &ServerKeyExchange::default())?;
            None
        }
    };

    // Wire bytes of the messages built above, with the sequence numbers the
    // send path will assign. Transcript hashes must include them before
    // they reach the cache.
    let mut seq_pred = state.handshake_send_sequence;
    let mut merged = Vec::new();
    for packet in &packets {
        if let RecordContent::Handshake(handshake) = &packet.content {
            merged.extend_from_slice(&marshal_with_seq(handshake, seq_pred));
            seq_pred = seq_pred.wrapping_add(1);
        }
    }

    initialize_cipher_suite(state, cache, cfg, server_key_exchange.as_ref(), &merged)?;

    // Prove possession of the certificate key over everything sent so far.
    if state.remote_requested_certificate {
        if let Some(certificate) = &local_certificate {
            let mut plaintext = cache.pull_and_merge(&full_handshake_rules(cfg.initial_epoch));
            plaintext.extend_from_slice(&merged);

            let scheme =
                select_signature_scheme(cfg.local_signature_schemes(), &certificate.private_key)
                    .map_err(|e| FlightError::fatal(AlertDescription::InsufficientSecurity, e))?;
            let signature = certificate
                .private_key
                .sign(&plaintext, scheme.hash)
                .map_err(FlightError::internal)?;

            let packet = Packet::handshake(Body::CertificateVerify(CertificateVerify {
                scheme,
                signature,
            }));
            if let RecordContent::Handshake(handshake) = &packet.content {
                merged.extend_from_slice(&marshal_with_seq(handshake, seq_pred));
            }
            packets.push(packet);
        }
    }

    packets.push(Packet::change_cipher_spec());

    if state.local_verify_data.is_empty() {
        let mut transcript =
            cache.pull_and_merge(&rules_through_client_finished(cfg.initial_epoch));
        transcript.extend_from_slice(&merged);
        state.local_verify_data = prf::verify_data_client(
            suite.hash_algorithm(),
            &state.master_secret,
            &transcript,
        )
        .map_err(FlightError::internal)?;
    }

    packets.push(Packet::encrypted_handshake(
        1,
        Body::Finished(Finished {
            verify_data: state.local_verify_data.clone(),
        }),
    ));

    Ok(packets)
}

/// Derive the master secret, check the server's key exchange signature and
/// publish the record keys. Guarded by `is_initialized`, so redelivered
/// flights never re-run key derivation.
fn initialize_cipher_suite(
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
    server_key_exchange: Option<&ServerKeyExchange>,
    sending_plaintext: &[u8],
) -> Result<(), FlightError> {
    let suite = state.cipher_suite().map_err(FlightError::internal)?;
    if suite.is_initialized() {
        return Ok(());
    }

    let client_random = state.local_random.0;
    let server_random = state.remote_random.0;

    let master = if state.extended_master_secret {
        let session_hash =
            cache.session_hash(suite.hash_algorithm(), cfg.initial_epoch, sending_plaintext);
        prf::extended_master_secret(
            suite.hash_algorithm(),
            &state.pre_master_secret,
            &session_hash,
        )
        .map_err(|e| FlightError::fatal(AlertDescription::IllegalParameter, e))?
    } else {
        prf::master_secret(
            suite.hash_algorithm(),
            &state.pre_master_secret,
            &client_random,
            &server_random,
        )
        .map_err(FlightError::internal)?
    };
    *state.master_secret = master;

    if suite.authentication_type() == AuthenticationType::Certificate {
        let Some(ske) = server_key_exchange else {
            return Err(FlightError::internal(Error::Internal(
                "certificate suite without ServerKeyExchange",
            )));
        };
        let Some(scheme) = ske.signature_scheme else {
            return Err(FlightError::fatal(
                AlertDescription::IllegalParameter,
                Error::NoAvailableSignatureSchemes,
            ));
        };
        if !cfg.local_signature_schemes().contains(&scheme) {
            return Err(FlightError::fatal(
                AlertDescription::InsufficientSecurity,
                Error::NoAvailableSignatureSchemes,
            ));
        }
        let Some(curve) = ske.named_curve else {
            return Err(FlightError::fatal(
                AlertDescription::IllegalParameter,
                Error::Crypto("missing named curve".into()),
            ));
        };
        if state.peer_certificates.is_empty() {
            return Err(FlightError::fatal(
                AlertDescription::CertificateUnknown,
                Error::InvalidCertificate,
            ));
        }

        let signed_params =
            value_key_message(&client_random, &server_random, &ske.public_key, curve);
        let public_key = leaf_public_key(&state.peer_certificates[0])
            .map_err(|e| FlightError::fatal(AlertDescription::BadCertificate, e))?;
        verify_signature(&public_key, scheme, &signed_params, &ske.signature)
            .map_err(|e| FlightError::fatal(AlertDescription::BadCertificate, e))?;

        // Chain and hostname validation is the configured collaborator's
        // job; `Conn` refuses configs that leave both unset.
        if let Some(verify) = cfg.config.verify_peer_certificate() {
            verify(&state.peer_certificates).map_err(|e| {
                FlightError::fatal(AlertDescription::BadCertificate, Error::BadCertificate(e))
            })?;
        } else if !cfg.config.insecure_skip_verify() {
            return Err(FlightError::fatal(
                AlertDescription::BadCertificate,
                Error::NoPeerVerifier,
            ));
        }
    }

    suite
        .init(&state.master_secret, &client_random, &server_random, true)
        .map_err(FlightError::internal)?;
    trace!("client cipher suite initialized");
    Ok(())
}

pub(super) fn parse(
    conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> ParseResult {
    // The server Finished may have been queued if it outran our keys or its
    // ChangeCipherSpec; give it a chance to land in the cache now.
    conn.handle_queued_packets(state)
        .map_err(FlightError::internal)?;

    let Some((_, msgs)) = cache.full_pull_map(
        state.handshake_recv_sequence,
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
    let transcript = cache.pull_and_merge(&rules_through_client_finished(cfg.initial_epoch));
    let expected =
        prf::verify_data_server(suite.hash_algorithm(), &state.master_secret, &transcript)
            .map_err(FlightError::internal)?;
    if !prf::ct_eq(&expected, &finished.verify_data) {
        return Err(FlightError::fatal(
            AlertDescription::HandshakeFailure,
            Error::VerifyDataMismatch,
        ));
    }

    if !state.session_id.is_empty() {
        if let Some(store) = cfg.config.session_store() {
            let session = Session {
                id: state.session_id.clone(),
                secret: state.master_secret.to_vec(),
            };
            // Keyed by server name: that is what a future dial knows.
            if let Err(e) = store.set(cfg.config.server_name().as_bytes(), session) {
                debug!("failed to store session: {e}");
            }
        }
    }

    Ok(Some(Flight::Flight5))
}
