use std::io;
use std::net::UdpSocket;
use std::time::Duration;

/// The unreliable datagram transport underneath a DTLS connection.
///
/// Implementations must be datagram-preserving (one `send` is one datagram)
/// and safe to use from two threads: the read loop calls `recv` while the
/// handshake driver and writers call `send`.
///
/// `recv` must return within a bounded time once a read timeout is set so
/// the read loop can observe shutdown; `io::ErrorKind::WouldBlock` and
/// `TimedOut` are treated as "no data yet", not failures.
pub trait DatagramTransport: Send + Sync {
    fn send(&self, buf: &[u8]) -> io::Result<usize>;

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl DatagramTransport for UdpSocket {
    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        UdpSocket::send(self, buf)
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        UdpSocket::recv(self, buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        UdpSocket::set_read_timeout(self, timeout)
    }
}
