//! The flight state machine (RFC 6347 Section 4.2.4):
//!
//! ```text
//!                      +-----------+
//!                +---> | PREPARING | <--------------------+
//!                |     +-----------+                      |
//!                |           |                            |
//!                |           | Buffer next flight         |
//!                |          \|/                           |
//!                |     +-----------+                      |
//!                |     |  SENDING  |<------------------+  |
//!                |     +-----------+                   |  |
//!        Receive |           |                         |  |
//!           next |           | Send flight             |  |
//!         flight |  +--------+                         |  |
//!                |  |        | Set retransmit timer    |  |
//!                |  |       \|/                        |  |
//!                |  |  +-----------+                   |  |
//!                +--)--|  WAITING  |-------------------+  |
//!                |  |  +-----------+   Timer expires   |  |
//!        Receive |  | Send                                |
//!           last |  | last                                |
//!         flight |  | flight                              |
//!               \|/\|/                                    |
//!            +-----------+                                |
//!            | FINISHED  | -------------------------------+
//!            +-----------+
//!                 |  /|\
//!                 +---+
//!              Read retransmit
//!           Retransmit last flight
//! ```

use log::{debug, trace};

use crate::conn::ConnInner;
use crate::flights::{Flight, FlightError, Packet, RecordContent};
use crate::mailbox::Wait;
use crate::timer::ExponentialBackoff;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakeState {
    Preparing,
    Sending,
    Waiting,
    Finished,
}

pub(crate) struct HandshakeFsm {
    current_flight: Flight,
    flights: Vec<Packet>,
    retransmit: bool,
    backoff: ExponentialBackoff,
}

impl HandshakeFsm {
    pub fn new(initial_flight: Flight, conn: &ConnInner) -> Self {
        let config = &conn.cfg.config;
        HandshakeFsm {
            current_flight: initial_flight,
            flights: Vec::new(),
            retransmit: initial_flight.has_retransmit(),
            backoff: ExponentialBackoff::new(
                config.retransmit_interval(),
                config.flight_retries(),
            ),
        }
    }

    /// Drive the handshake. Runs until the connection closes (the terminal
    /// state keeps answering retransmitted final flights) or a fatal error
    /// occurs; either way, the return value is the reason the loop ended.
    pub fn run(&mut self, conn: &ConnInner, initial_state: HandshakeState) -> Error {
        let mut state = initial_state;
        loop {
            trace!(
                "[handshake:{}] {:?}: {:?}",
                side(conn),
                self.current_flight,
                state
            );
            conn.on_flight_state(self.current_flight, state);

            let step = match state {
                HandshakeState::Preparing => self.prepare(conn),
                HandshakeState::Sending => self.send(conn),
                HandshakeState::Waiting => self.wait(conn),
                HandshakeState::Finished => self.finish(conn),
            };
            match step {
                Ok(next) => state = next,
                Err(error) => return error,
            }
        }
    }

    /// Turn a flight failure into a local error, after a best-effort alert
    /// to the peer. A failed alert send never masks the original error.
    fn fail(&self, conn: &ConnInner, flight_error: FlightError) -> Error {
        if let Some(alert) = flight_error.alert {
            conn.notify(alert);
        }
        flight_error.error
    }

    fn prepare(&mut self, conn: &ConnInner) -> Result<HandshakeState, Error> {
        self.flights.clear();

        let generated = {
            let mut state = conn.state();
            match self
                .current_flight
                .generate(conn, &mut state, &conn.cache, &conn.cfg)
            {
                Ok(mut packets) => {
                    // Assign message sequences and find out whether this
                    // flight crosses into a new epoch (ChangeCipherSpec).
                    let epoch = conn.cfg.initial_epoch;
                    let mut next_epoch = epoch;
                    for packet in packets.iter_mut() {
                        packet.epoch += epoch;
                        if packet.epoch > next_epoch {
                            next_epoch = packet.epoch;
                        }
                        if let RecordContent::Handshake(handshake) = &mut packet.content {
                            handshake.header.message_seq = state.handshake_send_sequence;
                            state.handshake_send_sequence =
                                state.handshake_send_sequence.wrapping_add(1);
                        }
                    }
                    if epoch != next_epoch {
                        // The state lock is held; don't go through side().
                        trace!(
                            "[handshake:{}] -> ChangeCipherSpec (epoch: {})",
                            if state.is_client { "client" } else { "server" },
                            next_epoch
                        );
                        state.local_epoch = next_epoch;
                    }
                    Ok(packets)
                }
                Err(e) => Err(e),
            }
        };

        match generated {
            Ok(packets) => {
                self.flights = packets;
                self.retransmit = self.current_flight.has_retransmit();
                self.backoff.reset();
                Ok(HandshakeState::Sending)
            }
            Err(flight_error) => Err(self.fail(conn, flight_error)),
        }
    }

    fn send(&mut self, conn: &ConnInner) -> Result<HandshakeState, Error> {
        {
            let mut state = conn.state();
            conn.write_packets(&mut state, &self.flights)?;
        }

        if self.current_flight.is_last_send_flight() {
            Ok(HandshakeState::Finished)
        } else {
            Ok(HandshakeState::Waiting)
        }
    }

    fn wait(&mut self, conn: &ConnInner) -> Result<HandshakeState, Error> {
        loop {
            match conn.mailbox.wait(Some(self.backoff.rto())) {
                Wait::Signal => {
                    let parsed = {
                        let mut state = conn.state();
                        self.current_flight
                            .parse(conn, &mut state, &conn.cache, &conn.cfg)
                    };
                    conn.mailbox.complete();

                    match parsed {
                        // Not a complete flight yet; keep buffering.
                        Ok(None) => continue,
                        Ok(Some(next)) => {
                            trace!(
                                "[handshake:{}] {:?} -> {:?}",
                                side(conn),
                                self.current_flight,
                                next
                            );
                            if next == self.current_flight {
                                if next.is_last_recv_flight() {
                                    return Ok(HandshakeState::Finished);
                                }
                                if !next.has_retransmit() {
                                    // Stateless echo: resend the saved batch
                                    // verbatim (HelloVerifyRequest answers a
                                    // retransmitted ClientHello with the same
                                    // message sequence).
                                    return Ok(HandshakeState::Sending);
                                }
                                // Same flight, new content (e.g. a fresh
                                // cookie): fall through and regenerate.
                            }
                            self.current_flight = next;
                            return Ok(HandshakeState::Preparing);
                        }
                        Err(flight_error) => return Err(self.fail(conn, flight_error)),
                    }
                }
                Wait::Timeout => {
                    if !self.retransmit {
                        // Stateless flights (HelloVerifyRequest) rely on the
                        // peer retrying; the handshake deadline bounds us.
                        continue;
                    }
                    if !self.backoff.can_retry() {
                        return Err(Error::HandshakeTimeout);
                    }
                    self.backoff.attempt();
                    debug!(
                        "[handshake:{}] retransmitting {:?}",
                        side(conn),
                        self.current_flight
                    );
                    return Ok(HandshakeState::Sending);
                }
                Wait::Closed => return Err(Error::ConnectionClosed),
            }
        }
    }

    /// The terminal state still accepts inbound signals: the peer may
    /// retransmit its last flight because it never saw our confirmation.
    fn finish(&mut self, conn: &ConnInner) -> Result<HandshakeState, Error> {
        match conn.mailbox.wait(None) {
            Wait::Signal => {
                let parsed = {
                    let mut state = conn.state();
                    self.current_flight
                        .parse(conn, &mut state, &conn.cache, &conn.cfg)
                };
                conn.mailbox.complete();

                match parsed {
                    Ok(None) => Ok(HandshakeState::Finished),
                    Ok(Some(next)) => {
                        if next.is_last_recv_flight() && next == self.current_flight {
                            return Ok(HandshakeState::Finished);
                        }
                        // Debounce, then resend the final flight once.
                        if conn.sleep_or_closed(conn.cfg.config.retransmit_interval()) {
                            return Err(Error::ConnectionClosed);
                        }
                        Ok(HandshakeState::Sending)
                    }
                    Err(flight_error) => Err(self.fail(conn, flight_error)),
                }
            }
            Wait::Timeout => Ok(HandshakeState::Finished),
            Wait::Closed => Err(Error::ConnectionClosed),
        }
    }
}

fn side(conn: &ConnInner) -> &'static str {
    if conn.is_client() {
        "client"
    } else {
        "server"
    }
}
