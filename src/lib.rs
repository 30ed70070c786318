//! DTLS 1.2 (RFC 6347/5246) for datagram transports: the flight-based
//! handshake state machine, the record layer, and fragment reassembly over
//! lossy, reordering networks.
//!
//! ```no_run
//! use std::net::UdpSocket;
//! use std::sync::Arc;
//! use dtgram::{Config, Conn};
//!
//! let socket = UdpSocket::bind("0.0.0.0:0").unwrap();
//! socket.connect("127.0.0.1:4444").unwrap();
//!
//! let config = Arc::new(
//!     Config::builder()
//!         .insecure_skip_verify(true)
//!         .build()
//!         .unwrap(),
//! );
//! let conn = Conn::client(Arc::new(socket), config).unwrap();
//! conn.write(b"hello").unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all)]

mod cache;
mod config;
mod conn;
mod error;
mod flights;
mod fragment;
mod fsm;
mod mailbox;
mod state;
mod timer;
mod transport;
mod window;

pub mod crypto;
pub mod message;

pub use config::{
    ClientAuthType, Config, ConfigBuilder, DtlsCertificate, ExtendedMasterSecretType,
    PskCallback, Session, SessionStore, VerifyPeerCertificate,
};
pub use conn::Conn;
pub use crypto::{CipherSuite, CipherSuiteId};
pub use error::{Error, ErrorClass};
pub use message::extensions::SrtpProfile;
pub use state::SessionSnapshot;
pub use transport::DatagramTransport;
pub use window::ReplayWindow;
