//! Flight 3: the client re-sends its ClientHello (now carrying the server's
//! cookie) and parses the server's parameter flight.

use log::trace;

use super::{
    parse_cached, Flight, FlightConn, FlightError, GenerateResult, HandshakeConfig, Packet,
    ParseResult,
};
use crate::cache::{HandshakeCache, PullRule};
use crate::config::ExtendedMasterSecretType;
use crate::crypto::key_exchange::KeyExchange;
use crate::crypto::{prf, CipherSuiteId, KeyExchangeAlgorithm};
use crate::message::extension::Extension;
use crate::message::extensions::{
    default_curves, find_matching_srtp_profile, AlpnExt, ServerNameExt, SignatureAlgorithmsExt,
    SupportedGroupsExt, UseSrtpExt,
};
use crate::message::{
    AlertDescription, Body, ClientHello, MessageType, ProtocolVersion, ServerHello,
    ServerKeyExchange,
};
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

/// The ClientHello both flight 1 and flight 3 send; only the cookie differs
/// (RFC 6347 requires the retried hello to be otherwise identical).
pub(super) fn build_client_hello(state: &mut State, cfg: &HandshakeConfig) -> Packet {
    state.ensure_local_random();

    let mut extensions = vec![
        Extension::SignatureAlgorithms(SignatureAlgorithmsExt::new(cfg.local_signature_schemes())),
        Extension::RenegotiationInfo,
        Extension::SupportedGroups(SupportedGroupsExt::new(&default_curves())),
        Extension::EcPointFormats,
    ];

    if !cfg.config.srtp_protection_profiles().is_empty() {
        extensions.push(Extension::UseSrtp(UseSrtpExt::new(
            cfg.config.srtp_protection_profiles(),
        )));
    }
    if cfg.config.extended_master_secret() != ExtendedMasterSecretType::Disable {
        extensions.push(Extension::ExtendedMasterSecret);
    }
    if !cfg.config.server_name().is_empty() {
        extensions.push(Extension::ServerName(ServerNameExt::new(
            cfg.config.server_name(),
        )));
    }
    if !cfg.config.alpn_protocols().is_empty() {
        extensions.push(Extension::Alpn(AlpnExt::new(cfg.config.alpn_protocols())));
    }

    let mut cipher_suites = tinyvec::ArrayVec::default();
    for id in &cfg.local_cipher_suite_ids {
        cipher_suites.push(id.as_u16());
    }
    let mut compression_methods = tinyvec::ArrayVec::default();
    compression_methods.push(0u8);

    Packet::handshake(Body::ClientHello(ClientHello {
        version: ProtocolVersion::DTLS1_2,
        random: state.local_random,
        session_id: state.session_id.clone(),
        cookie: state.cookie.clone(),
        cipher_suites,
        compression_methods,
        extensions,
    }))
}

pub(super) fn parse(
    conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> ParseResult {
    // The server may answer with yet another HelloVerifyRequest carrying a
    // fresh cookie; respond with a new ClientHello (RFC 6347 4.2.1).
    if let Some((seq, msgs)) = cache.full_pull_map(
        state.handshake_recv_sequence,
        &[PullRule::optional(
            MessageType::HelloVerifyRequest,
            cfg.initial_epoch,
            false,
        )],
    ) {
        if let Some(raw) = msgs.get(&MessageType::HelloVerifyRequest) {
            let Body::HelloVerifyRequest(hvr) = parse_cached(raw, None)? else {
                return Err(FlightError::internal(Error::ParseFailed));
            };
            state.cookie = hvr.cookie;
            state.handshake_recv_sequence = seq;
            return Ok(Some(Flight::Flight3));
        }
    }

    let Some((_, msgs)) = cache.full_pull_map(
        state.handshake_recv_sequence,
        &[PullRule::required(
            MessageType::ServerHello,
            cfg.initial_epoch,
            false,
        )],
    ) else {
        return Ok(None);
    };

    let raw = msgs
        .get(&MessageType::ServerHello)
        .ok_or_else(|| FlightError::internal(Error::Internal("pull map missing ServerHello")))?;
    let Body::ServerHello(server_hello) = parse_cached(raw, None)? else {
        return Err(FlightError::internal(Error::ParseFailed));
    };

    if let Some(next) = handle_server_hello(conn, state, cache, cfg, &server_hello)? {
        return Ok(Some(next));
    }

    // Pull the rest of the server's flight. The rule set depends on the key
    // exchange: PSK servers send at most an identity hint, certificate
    // servers send their chain and signed parameters.
    let (seq, msgs) = if cfg.config.psk().is_some() {
        match cache.full_pull_map(
            state.handshake_recv_sequence + 1,
            &[
                PullRule::optional(MessageType::ServerKeyExchange, cfg.initial_epoch, false),
                PullRule::required(MessageType::ServerHelloDone, cfg.initial_epoch, false),
            ],
        ) {
            Some(found) => found,
            None => return Ok(None),
        }
    } else {
        match cache.full_pull_map(
            state.handshake_recv_sequence + 1,
            &[
                PullRule::optional(MessageType::Certificate, cfg.initial_epoch, false),
                PullRule::required(MessageType::ServerKeyExchange, cfg.initial_epoch, false),
                PullRule::optional(MessageType::CertificateRequest, cfg.initial_epoch, false),
                PullRule::required(MessageType::ServerHelloDone, cfg.initial_epoch, false),
            ],
        ) {
            Some(found) => found,
            None => return Ok(None),
        }
    };
    state.handshake_recv_sequence = seq;

    if let Some(raw) = msgs.get(&MessageType::Certificate) {
        let Body::Certificate(certificate) = parse_cached(raw, None)? else {
            return Err(FlightError::internal(Error::ParseFailed));
        };
        state.peer_certificates = certificate.certificates;
    } else if state
        .cipher_suite
        .as_ref()
        .map(|s| s.authentication_type() == crate::crypto::AuthenticationType::Certificate)
        .unwrap_or(false)
    {
        return Err(FlightError::fatal(
            AlertDescription::CertificateUnknown,
            Error::InvalidCertificate,
        ));
    }

    if let Some(raw) = msgs.get(&MessageType::ServerKeyExchange) {
        let kx = state
            .cipher_suite()
            .map_err(|e| FlightError::internal(e))?
            .key_exchange_algorithm();
        let Body::ServerKeyExchange(ske) = parse_cached(raw, Some(kx))? else {
            return Err(FlightError::internal(Error::ParseFailed));
        };
        handle_server_key_exchange(state, cfg, &ske)?;
    }

    if msgs.contains_key(&MessageType::CertificateRequest) {
        state.remote_requested_certificate = true;
    }

    Ok(Some(Flight::Flight5))
}

fn handle_server_hello(
    conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
    server_hello: &ServerHello,
) -> Result<Option<Flight>, FlightError> {
    if server_hello.version != ProtocolVersion::DTLS1_2 {
        return Err(FlightError::fatal(
            AlertDescription::ProtocolVersion,
            Error::UnsupportedVersion(
                server_hello.version.bytes()[0],
                server_hello.version.bytes()[1],
            ),
        ));
    }

    for extension in &server_hello.extensions {
        match extension {
            Extension::UseSrtp(use_srtp) => {
                let Some(profile) = find_matching_srtp_profile(
                    &use_srtp.profiles,
                    cfg.config.srtp_protection_profiles(),
                ) else {
                    return Err(FlightError::fatal(
                        AlertDescription::IllegalParameter,
                        Error::NoMatchingSrtpProfile,
                    ));
                };
                state.srtp_protection_profile = Some(profile);
            }
            Extension::ExtendedMasterSecret => {
                if cfg.config.extended_master_secret() != ExtendedMasterSecretType::Disable {
                    state.extended_master_secret = true;
                }
            }
            Extension::Alpn(alpn) => {
                // The server must select exactly one protocol.
                if alpn.protocols.len() != 1 {
                    return Err(FlightError::internal(Error::NoApplicationProtocol));
                }
                state.negotiated_protocol = Some(alpn.protocols[0].clone());
            }
            _ => {}
        }
    }

    if cfg.config.extended_master_secret() == ExtendedMasterSecretType::Require
        && !state.extended_master_secret
    {
        return Err(FlightError::fatal(
            AlertDescription::InsufficientSecurity,
            Error::ExtendedMasterSecretRequired,
        ));
    }
    if !cfg.config.srtp_protection_profiles().is_empty()
        && state.srtp_protection_profile.is_none()
    {
        return Err(FlightError::fatal(
            AlertDescription::InsufficientSecurity,
            Error::RequestedButNoSrtpExtension,
        ));
    }

    // The offered suite must be one we advertised.
    let Some(id) = CipherSuiteId::from_u16(server_hello.cipher_suite) else {
        return Err(FlightError::fatal(
            AlertDescription::InsufficientSecurity,
            Error::CipherSuiteNoIntersection,
        ));
    };
    if !cfg.local_cipher_suite_ids.contains(&id) {
        return Err(FlightError::fatal(
            AlertDescription::InsufficientSecurity,
            Error::InvalidCipherSuite,
        ));
    }
    trace!("client negotiated cipher suite {id}");
    state.cipher_suite = Some(cfg.config.create_cipher_suite(id));
    state.remote_random = server_hello.random;

    // Session resumption: the server echoed the id we offered.
    if !server_hello.session_id.is_empty() && server_hello.session_id == state.session_id {
        return handle_resumption(conn, state, cache, cfg);
    }

    if cfg.config.session_store().is_some() {
        state.session_id = server_hello.session_id.clone();
    } else {
        state.session_id = Vec::new();
    }
    state.master_secret.clear();

    Ok(None)
}

fn handle_resumption(
    conn: &dyn FlightConn,
    state: &mut State,
    cache: &HandshakeCache,
    cfg: &HandshakeConfig,
) -> Result<Option<Flight>, FlightError> {
    state
        .init_cipher_suite()
        .map_err(FlightError::internal)?;

    // Encrypted records queued while the keys were missing can now flow.
    conn.handle_queued_packets(state)
        .map_err(FlightError::internal)?;

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

    let transcript = cache.pull_and_merge(&[
        PullRule::required(MessageType::ClientHello, cfg.initial_epoch, true),
        PullRule::required(MessageType::ServerHello, cfg.initial_epoch, false),
    ]);
    let suite = state.cipher_suite().map_err(FlightError::internal)?;
    let expected =
        prf::verify_data_server(suite.hash_algorithm(), &state.master_secret, &transcript)
            .map_err(FlightError::internal)?;
    if !prf::ct_eq(&expected, &finished.verify_data) {
        return Err(FlightError::fatal(
            AlertDescription::HandshakeFailure,
            Error::VerifyDataMismatch,
        ));
    }

    trace!("session resumed");
    Ok(Some(Flight::Flight5b))
}

/// Derive the premaster secret from the server's key exchange parameters:
/// via the PSK callback for PSK suites, via ephemeral ECDH otherwise.
pub(super) fn handle_server_key_exchange(
    state: &mut State,
    cfg: &HandshakeConfig,
    ske: &ServerKeyExchange,
) -> Result<(), FlightError> {
    let suite = state.cipher_suite.clone().ok_or_else(|| {
        FlightError::fatal(
            AlertDescription::InsufficientSecurity,
            Error::InvalidCipherSuite,
        )
    })?;

    if let Some(psk_callback) = cfg.config.psk() {
        if suite.key_exchange_algorithm() != KeyExchangeAlgorithm::Psk {
            return Err(FlightError::fatal(
                AlertDescription::InsufficientSecurity,
                Error::InvalidCipherSuite,
            ));
        }
        let psk = psk_callback(ske.identity_hint.as_deref())
            .map_err(|e| FlightError::internal(Error::PskCallback(e)))?;
        state.identity_hint = ske.identity_hint.clone();
        *state.pre_master_secret = prf::psk_pre_master_secret(&psk);
    } else {
        let Some(curve) = ske.named_curve else {
            return Err(FlightError::fatal(
                AlertDescription::IllegalParameter,
                Error::Crypto("missing key exchange parameters".into()),
            ));
        };
        let mut key_exchange = KeyExchange::generate(curve);
        let shared = key_exchange
            .shared_secret(&ske.public_key)
            .map_err(|e| FlightError::fatal(AlertDescription::IllegalParameter, e))?;
        *state.pre_master_secret = shared;
        state.named_curve = curve;
        state.key_exchange = Some(key_exchange);
    }

    Ok(())
}
