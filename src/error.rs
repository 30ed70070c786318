use thiserror::Error;

use crate::message::{AlertDescription, AlertLevel};

/// Recoverability class of an [`Error`].
///
/// Mirrors RFC 6347's distinction between conditions that must tear the
/// connection down and conditions the connection survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Configuration or protocol violation. The connection must close.
    Fatal,
    /// Implementation bug or unimplemented feature. The connection must close.
    Internal,
    /// The connection remains usable.
    Temporary,
    /// A deadline was exceeded.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Fatal errors.
    #[error("unsupported protocol version {0:#04x} {1:#04x}")]
    UnsupportedVersion(u8, u8),

    #[error("client and server have no cipher suite in common")]
    CipherSuiteNoIntersection,

    #[error("invalid or unknown cipher suite")]
    InvalidCipherSuite,

    #[error("client and server cookie do not match")]
    CookieMismatch,

    #[error("expected and actual verify data do not match")]
    VerifyDataMismatch,

    #[error("expected and actual key signature do not match")]
    KeySignatureMismatch,

    #[error("peer used a signature scheme we did not advertise")]
    NoAvailableSignatureSchemes,

    #[error("no certificate provided")]
    InvalidCertificate,

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("client sent certificate verify but no certificate to verify against")]
    CertificateVerifyNoCertificate,

    #[error("server required client verification, but got none")]
    ClientCertificateRequired,

    #[error("client sent certificate but did not verify it")]
    ClientCertificateNotVerified,

    #[error("peer certificate rejected: {0}")]
    BadCertificate(String),

    #[error("certificate suites configured without a verifier; set a peer verify callback or insecure_skip_verify")]
    NoPeerVerifier,

    #[error("peer responded with an SRTP profile we do not support")]
    NoMatchingSrtpProfile,

    #[error("SRTP support was requested but peer did not respond with use_srtp")]
    RequestedButNoSrtpExtension,

    #[error("we require the extended master secret extension, but the peer does not support it")]
    ExtendedMasterSecretRequired,

    #[error("no application protocol in common")]
    NoApplicationProtocol,

    #[error("PSK identity hint provided but no PSK callback")]
    IdentityNoPsk,

    #[error("PSK and PSK identity hint must both be set for a client")]
    PskAndIdentityMustBeSet,

    #[error("PSK callback failed: {0}")]
    PskCallback(String),

    #[error("crypto operation failed: {0}")]
    Crypto(String),

    #[error("peer alert: {level:?} {description:?}")]
    PeerAlert {
        level: AlertLevel,
        description: AlertDescription,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection is closed")]
    ConnectionClosed,

    // Internal errors.
    #[error("sequence number overflow")]
    SequenceNumberOverflow,

    #[error("fragment buffer overflow")]
    FragmentBufferOverflow,

    #[error("cipher suite used before initialization")]
    CipherSuiteNotInitialized,

    #[error("internal error: {0}")]
    Internal(&'static str),

    // Temporary errors.
    #[error("buffer is too small")]
    BufferTooSmall,

    #[error("invalid content type {0}")]
    InvalidContentType(u8),

    #[error("a record length field overruns its datagram")]
    InvalidPacketLength,

    #[error("ApplicationData with an epoch of 0")]
    ApplicationDataEpochZero,

    #[error("handshake is in progress")]
    HandshakeInProgress,

    #[error("malformed message")]
    ParseFailed,

    // Timeouts.
    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("read/write deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        use Error::*;
        match self {
            SequenceNumberOverflow | FragmentBufferOverflow | CipherSuiteNotInitialized
            | Internal(_) => ErrorClass::Internal,

            BufferTooSmall | InvalidContentType(_) | InvalidPacketLength
            | ApplicationDataEpochZero | HandshakeInProgress | ParseFailed => ErrorClass::Temporary,

            HandshakeTimeout | DeadlineExceeded => ErrorClass::Timeout,

            _ => ErrorClass::Fatal,
        }
    }

    /// Whether this error must tear down the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Fatal | ErrorClass::Internal)
    }

    /// A peer alert that ends the connection: any fatal alert, or close_notify.
    pub fn is_fatal_or_close_notify(&self) -> bool {
        match self {
            Error::PeerAlert { level, description } => {
                *level == AlertLevel::Fatal || *description == AlertDescription::CloseNotify
            }
            _ => false,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                Error::DeadlineExceeded
            }
            _ => Error::Transport(e.to_string()),
        }
    }
}

impl<E> From<nom::Err<E>> for Error {
    fn from(_: nom::Err<E>) -> Self {
        Error::ParseFailed
    }
}
