//! Flight 0: the server waiting for the first ClientHello.

use log::{debug, trace};
use rand::rngs::OsRng;
use rand::RngCore;

use super::{
    parse_cached, Flight, FlightConn, FlightError, GenerateResult, HandshakeConfig, ParseResult,
};
use crate::cache::{HandshakeCache, PullRule};
use crate::config::ExtendedMasterSecretType;
use crate::crypto::find_matching_cipher_suite;
use crate::message::extensions::find_matching_srtp_profile;
use crate::message::{AlertDescription, Body, ClientHello, Extension, MessageType, ProtocolVersion};
use crate::state::State;
use crate::Error;

const COOKIE_LENGTH: usize = 20;

pub(super) fn generate(
    _conn: &dyn FlightConn,
    state: &mut State,
    _cache: &HandshakeCache,
    _cfg: &HandshakeConfig,
) -> GenerateResult {
    // Nothing goes on the wire; this flight initializes the server side.
    state.ensure_local_random();
    if state.cookie.is_empty() {
        let mut cookie = vec![0u8; COOKIE_LENGTH];
        OsRng.fill_bytes(&mut cookie);
        state.cookie = cookie;
    }
    Ok(Vec::new())
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
        return Ok(None);
    };

    let raw = msgs
        .get(&MessageType::ClientHello)
        .ok_or_else(|| FlightError::internal(Error::Internal("pull map missing ClientHello")))?;
    let Body::ClientHello(client_hello) = parse_cached(raw, None)? else {
        return Err(FlightError::internal(Error::ParseFailed));
    };

    handle_client_hello(&client_hello, state, cfg)?;
    state.handshake_recv_sequence = seq;

    // Abbreviated handshake when the client resumes a stored session. The
    // session id proves prior contact, so the cookie round trip is skipped.
    if !client_hello.session_id.is_empty() {
        if let Some(store) = cfg.config.session_store() {
            match store.get(&client_hello.session_id) {
                Ok(Some(session)) if !session.secret.is_empty() => {
                    trace!("resuming session {:02x?}", &client_hello.session_id);
                    state.session_id = client_hello.session_id.clone();
                    *state.master_secret = session.secret;
                    return Ok(Some(Flight::Flight4b));
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("session store lookup failed: {e}");
                }
            }
        }
    }

    if cfg.config.insecure_skip_hello_verify() {
        return Ok(Some(Flight::Flight4));
    }
    Ok(Some(Flight::Flight2))
}

/// Validate the ClientHello and fold its parameters into the connection
/// state: cipher suite selection, curve, SRTP profile, extended master
/// secret, SNI and ALPN offers.
pub(super) fn handle_client_hello(
    client_hello: &ClientHello,
    state: &mut State,
    cfg: &HandshakeConfig,
) -> Result<(), FlightError> {
    if client_hello.version != ProtocolVersion::DTLS1_2 {
        return Err(FlightError::fatal(
            AlertDescription::ProtocolVersion,
            Error::UnsupportedVersion(
                client_hello.version.bytes()[0],
                client_hello.version.bytes()[1],
            ),
        ));
    }

    state.remote_random = client_hello.random;

    let Some(id) =
        find_matching_cipher_suite(&client_hello.cipher_suites, &cfg.local_cipher_suite_ids)
    else {
        return Err(FlightError::fatal(
            AlertDescription::InsufficientSecurity,
            Error::CipherSuiteNoIntersection,
        ));
    };
    trace!("server selected cipher suite {id}");
    state.cipher_suite = Some(cfg.config.create_cipher_suite(id));

    for extension in &client_hello.extensions {
        match extension {
            Extension::SupportedGroups(groups) => {
                let Some(curve) = groups.curves.first() else {
                    return Err(FlightError::fatal(
                        AlertDescription::InsufficientSecurity,
                        Error::Crypto("no supported elliptic curve in common".into()),
                    ));
                };
                state.named_curve = *curve;
            }
            Extension::UseSrtp(use_srtp) => {
                let Some(profile) = find_matching_srtp_profile(
                    &use_srtp.profiles,
                    cfg.config.srtp_protection_profiles(),
                ) else {
                    return Err(FlightError::fatal(
                        AlertDescription::InsufficientSecurity,
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
            Extension::ServerName(server_name) => {
                state.server_name = server_name.server_name.clone();
            }
            Extension::Alpn(alpn) => {
                state.peer_supported_protocols = alpn.protocols.clone();
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

    Ok(())
}
