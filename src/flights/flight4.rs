//! Flight 4: the server's parameter flight (ServerHello through
//! ServerHelloDone), and the parse step that consumes the client's second
//! flight, derives keys exactly once and verifies the client Finished.

use log::trace;
use rand::rngs::OsRng;
use rand::RngCore;
use tinyvec::array_vec;

use super::{
    full_handshake_rules, parse_cached, rules_through_certificate_verify, Flight, FlightConn,
    FlightError, GenerateResult, HandshakeConfig, Packet, ParseResult,
};
use crate::cache::{HandshakeCache, PullRule};
use crate::config::{ClientAuthType, ExtendedMasterSecretType, Session};
use crate::crypto::key_exchange::KeyExchange;
use crate::crypto::signing::{
    leaf_public_key, select_signature_scheme, value_key_message, verify_signature,
};
use crate::crypto::{prf, AuthenticationType, KeyExchangeAlgorithm};
use crate::message::extension::Extension;
use crate::message::extensions::{alpn_protocol_selection, AlpnExt, UseSrtpExt};
use crate::message::{
    AlertDescription, Body, Certificate, CertificateRequest, ClientCertificateType, MessageType,
    ProtocolVersion, ServerHello, ServerKeyExchange,
};
use crate::state::State;
use crate::Error;

const SESSION_ID_LENGTH: usize = 32;

pub(super) fn generate(
    _conn: &dyn FlightConn,
    state: &mut State,
    _cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> GenerateResult {
    state.ensure_local_random();
    let suite = state.cipher_suite().map_err(FlightError::internal)?;

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
    if suite.authentication_type() == AuthenticationType::Certificate {
        extensions.push(Extension::EcPointFormats);
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

    if cfg.config.session_store().is_some() && state.session_id.is_empty() {
        let mut session_id = vec![0u8; SESSION_ID_LENGTH];
        OsRng.fill_bytes(&mut session_id);
        state.session_id = session_id;
    }

    let mut packets = vec![Packet::handshake(Body::ServerHello(ServerHello {
        version: ProtocolVersion::DTLS1_2,
        random: state.local_random,
        session_id: state.session_id.clone(),
        cipher_suite: suite.id().as_u16(),
        compression_method: 0,
        extensions,
    }))];

    match suite.authentication_type() {
        AuthenticationType::Certificate => {
            let Some(wanted) = suite.certificate_type() else {
                return Err(FlightError::internal(Error::InvalidCipherSuite));
            };
            let Some(certificate) = cfg.config.certificate_for(wanted) else {
                return Err(FlightError::fatal(
                    AlertDescription::HandshakeFailure,
                    Error::InvalidCertificate,
                ));
            };

            packets.push(Packet::handshake(Body::Certificate(Certificate {
                certificates: certificate.certificate_chain.clone(),
            })));

            let named_curve = state.named_curve;
            let key_exchange = state
                .key_exchange
                .get_or_insert_with(|| KeyExchange::generate(named_curve));
            let (curve, public_key) = (key_exchange.curve(), key_exchange.public_key().to_vec());

            let scheme =
                select_signature_scheme(cfg.local_signature_schemes(), &certificate.private_key)
                    .map_err(|e| {
                        FlightError::fatal(AlertDescription::InsufficientSecurity, e)
                    })?;

            let signed_params = value_key_message(
                &state.remote_random.0,
                &state.local_random.0,
                &public_key,
                curve,
            );
            let signature = certificate
                .private_key
                .sign(&signed_params, scheme.hash)
                .map_err(FlightError::internal)?;

            packets.push(Packet::handshake(Body::ServerKeyExchange(
                ServerKeyExchange {
                    identity_hint: None,
                    named_curve: Some(curve),
                    public_key,
                    signature_scheme: Some(scheme),
                    signature,
                },
            )));

            if cfg.config.client_auth() > ClientAuthType::NoClientCert {
                let mut schemes = tinyvec::ArrayVec::default();
                schemes.extend_from_slice(cfg.local_signature_schemes());
                packets.push(Packet::handshake(Body::CertificateRequest(
                    CertificateRequest {
                        certificate_types: array_vec![
                            ClientCertificateType::RsaSign,
                            ClientCertificateType::EcdsaSign
                        ],
                        signature_schemes: schemes,
                        certificate_authorities: Vec::new(),
                    },
                )));
            }
        }
        AuthenticationType::PreSharedKey => {
            // A ServerKeyExchange only goes out when there is a hint to give
            // (RFC 4279 Section 2).
            if let Some(hint) = cfg.config.psk_identity_hint() {
                packets.push(Packet::handshake(Body::ServerKeyExchange(
                    ServerKeyExchange {
                        identity_hint: Some(hint.to_vec()),
                        ..Default::default()
                    },
                )));
            }
        }
    }

    packets.push(Packet::handshake(Body::ServerHelloDone));

    Ok(packets)
}

pub(super) fn parse(
    conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> ParseResult {
    let Some((seq, msgs)) = cache.full_pull_map(
        state.handshake_recv_sequence,
        &[
            PullRule::optional(MessageType::Certificate, cfg.initial_epoch, true),
            PullRule::required(MessageType::ClientKeyExchange, cfg.initial_epoch, true),
            PullRule::optional(MessageType::CertificateVerify, cfg.initial_epoch, true),
        ],
    ) else {
        return Ok(None);
    };

    let suite = state.cipher_suite().map_err(FlightError::internal)?;

    let raw = msgs
        .get(&MessageType::ClientKeyExchange)
        .ok_or_else(|| FlightError::internal(Error::Internal("pull map missing ClientKeyExchange")))?;
    let Body::ClientKeyExchange(client_key_exchange) =
        parse_cached(raw, Some(suite.key_exchange_algorithm()))?
    else {
        return Err(FlightError::internal(Error::ParseFailed));
    };

    if let Some(raw) = msgs.get(&MessageType::Certificate) {
        let Body::Certificate(certificate) = parse_cached(raw, None)? else {
            return Err(FlightError::internal(Error::ParseFailed));
        };
        if !certificate.certificates.is_empty() {
            state.peer_certificates = certificate.certificates;
            // A client certificate invalidates any resumable session: we
            // would have to track its identity and expiry to reuse it.
            state.session_id = Vec::new();
        }
    }

    if let Some(raw) = msgs.get(&MessageType::CertificateVerify) {
        if state.peer_certificates.is_empty() {
            return Err(FlightError::fatal(
                AlertDescription::CertificateUnknown,
                Error::CertificateVerifyNoCertificate,
            ));
        }
        let Body::CertificateVerify(certificate_verify) = parse_cached(raw, None)? else {
            return Err(FlightError::internal(Error::ParseFailed));
        };

        if !cfg
            .local_signature_schemes()
            .contains(&certificate_verify.scheme)
        {
            return Err(FlightError::fatal(
                AlertDescription::InsufficientSecurity,
                Error::NoAvailableSignatureSchemes,
            ));
        }

        let transcript = cache.pull_and_merge(&full_handshake_rules(cfg.initial_epoch));
        let public_key = leaf_public_key(&state.peer_certificates[0])
            .map_err(|e| FlightError::fatal(AlertDescription::BadCertificate, e))?;
        verify_signature(
            &public_key,
            certificate_verify.scheme,
            &transcript,
            &certificate_verify.signature,
        )
        .map_err(|e| FlightError::fatal(AlertDescription::BadCertificate, e))?;

        let mut verified = cfg.config.insecure_skip_verify();
        if cfg.config.client_auth() >= ClientAuthType::VerifyClientCertIfGiven {
            if let Some(verify) = cfg.config.verify_peer_certificate() {
                verify(&state.peer_certificates).map_err(|e| {
                    FlightError::fatal(AlertDescription::BadCertificate, Error::BadCertificate(e))
                })?;
                verified = true;
            }
        } else if let Some(verify) = cfg.config.verify_peer_certificate() {
            verify(&state.peer_certificates).map_err(|e| {
                FlightError::fatal(AlertDescription::BadCertificate, Error::BadCertificate(e))
            })?;
        }
        state.peer_certificates_verified = verified;
    } else if !state.peer_certificates.is_empty() {
        // A certificate arrived but its CertificateVerify has not; wait.
        return Ok(None);
    }

    if !suite.is_initialized() {
        let client_random = state.remote_random.0;
        let server_random = state.local_random.0;

        let pre_master_secret = match suite.authentication_type() {
            AuthenticationType::PreSharedKey => {
                let Some(psk_callback) = cfg.config.psk() else {
                    return Err(FlightError::internal(Error::IdentityNoPsk));
                };
                let psk = psk_callback(client_key_exchange.identity.as_deref())
                    .map_err(|e| FlightError::internal(Error::PskCallback(e)))?;
                state.identity_hint = client_key_exchange.identity.clone();
                prf::psk_pre_master_secret(&psk)
            }
            AuthenticationType::Certificate => {
                if suite.key_exchange_algorithm() != KeyExchangeAlgorithm::Ecdhe {
                    return Err(FlightError::internal(Error::InvalidCipherSuite));
                }
                let Some(key_exchange) = state.key_exchange.as_mut() else {
                    return Err(FlightError::internal(Error::Internal(
                        "missing local keypair at key derivation",
                    )));
                };
                key_exchange
                    .shared_secret(&client_key_exchange.public_key)
                    .map_err(|e| {
                        FlightError::fatal(AlertDescription::IllegalParameter, e)
                    })?
            }
        };

        let master = if state.extended_master_secret {
            let session_hash =
                cache.session_hash(suite.hash_algorithm(), cfg.initial_epoch, &[]);
            prf::extended_master_secret(suite.hash_algorithm(), &pre_master_secret, &session_hash)
                .map_err(FlightError::internal)?
        } else {
            prf::master_secret(
                suite.hash_algorithm(),
                &pre_master_secret,
                &client_random,
                &server_random,
            )
            .map_err(FlightError::internal)?
        };
        *state.master_secret = master;

        suite
            .init(&state.master_secret, &client_random, &server_random, false)
            .map_err(FlightError::internal)?;
        trace!("server cipher suite initialized");

        if !state.session_id.is_empty() {
            if let Some(store) = cfg.config.session_store() {
                let session = Session {
                    id: state.session_id.clone(),
                    secret: state.master_secret.to_vec(),
                };
                store.set(&state.session_id, session).map_err(|e| {
                    FlightError::internal(Error::Transport(e))
                })?;
            }
        }
    }

    // Keys exist now; records that raced ahead of them can be replayed.
    conn.handle_queued_packets(state)
        .map_err(FlightError::internal)?;

    let Some((seq, msgs)) = cache.full_pull_map(
        seq,
        &[PullRule::required(
            MessageType::Finished,
            cfg.initial_epoch + 1,
            true,
        )],
    ) else {
        return Ok(None);
    };
    state.handshake_recv_sequence = seq;

    let raw = msgs
        .get(&MessageType::Finished)
        .ok_or_else(|| FlightError::internal(Error::Internal("pull map missing Finished")))?;
    let Body::Finished(finished) = parse_cached(raw, None)? else {
        return Err(FlightError::internal(Error::ParseFailed));
    };

    // Verify the client's verify_data over the exact transcript bytes; the
    // record MAC alone does not prove transcript agreement.
    let transcript = cache.pull_and_merge(&rules_through_certificate_verify(cfg.initial_epoch));
    let expected =
        prf::verify_data_client(suite.hash_algorithm(), &state.master_secret, &transcript)
            .map_err(FlightError::internal)?;
    if !prf::ct_eq(&expected, &finished.verify_data) {
        return Err(FlightError::fatal(
            AlertDescription::HandshakeFailure,
            Error::VerifyDataMismatch,
        ));
    }

    match cfg.config.client_auth() {
        ClientAuthType::RequireAnyClientCert => {
            if state.peer_certificates.is_empty() {
                return Err(FlightError::fatal(
                    AlertDescription::CertificateUnknown,
                    Error::ClientCertificateRequired,
                ));
            }
        }
        ClientAuthType::VerifyClientCertIfGiven => {
            if !state.peer_certificates.is_empty() && !state.peer_certificates_verified {
                return Err(FlightError::fatal(
                    AlertDescription::BadCertificate,
                    Error::ClientCertificateNotVerified,
                ));
            }
        }
        ClientAuthType::RequireAndVerifyClientCert => {
            if state.peer_certificates.is_empty() {
                return Err(FlightError::fatal(
                    AlertDescription::CertificateUnknown,
                    Error::ClientCertificateRequired,
                ));
            }
            if !state.peer_certificates_verified {
                return Err(FlightError::fatal(
                    AlertDescription::BadCertificate,
                    Error::ClientCertificateNotVerified,
                ));
            }
        }
        ClientAuthType::NoClientCert | ClientAuthType::RequestClientCert => {}
    }

    Ok(Some(Flight::Flight6))
}
