use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Single-slot rendezvous between the read loop and the handshake driver.
///
/// `signal` raises the "new handshake data available" flag and then blocks
/// until the driver has finished its parse step and called `complete`. The
/// acknowledgement round trip is the backpressure guarantee: the read loop
/// never races ahead of the driver's view of the handshake cache.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    inner: Mutex<Inner>,
    on_signal: Condvar,
    on_complete: Condvar,
}

#[derive(Debug, Default)]
struct Inner {
    pending: bool,
    closed: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Wait {
    /// New handshake data arrived; caller must call `complete` after parsing.
    Signal,
    Timeout,
    Closed,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sender side. Returns once the receiver processed the signal, or
    /// immediately if the mailbox is closed.
    pub fn signal(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.pending = true;
        self.on_signal.notify_one();

        while inner.pending && !inner.closed {
            inner = self.on_complete.wait(inner).unwrap();
        }
    }

    /// Receiver side. `None` waits until a signal or close.
    pub fn wait(&self, timeout: Option<Duration>) -> Wait {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock().unwrap();

        loop {
            if inner.closed {
                return Wait::Closed;
            }
            if inner.pending {
                return Wait::Signal;
            }

            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Wait::Timeout;
                    }
                    let (guard, _) = self
                        .on_signal
                        .wait_timeout(inner, deadline - now)
                        .unwrap();
                    inner = guard;
                }
                None => {
                    inner = self.on_signal.wait(inner).unwrap();
                }
            }
        }
    }

    /// Receiver side: parsing finished, release the sender.
    pub fn complete(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending = false;
        self.on_complete.notify_all();
    }

    /// Tear down; unblocks both sides permanently.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.on_signal.notify_all();
        self.on_complete.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_times_out() {
        let mailbox = Mailbox::new();
        assert_eq!(
            mailbox.wait(Some(Duration::from_millis(10))),
            Wait::Timeout
        );
    }

    #[test]
    fn signal_blocks_until_complete() {
        let mailbox = Arc::new(Mailbox::new());
        let acked = Arc::new(AtomicBool::new(false));

        let sender = {
            let mailbox = Arc::clone(&mailbox);
            let acked = Arc::clone(&acked);
            thread::spawn(move || {
                mailbox.signal();
                // signal() must only return after complete().
                assert!(acked.load(Ordering::SeqCst));
            })
        };

        assert_eq!(mailbox.wait(Some(Duration::from_secs(5))), Wait::Signal);
        thread::sleep(Duration::from_millis(20));
        acked.store(true, Ordering::SeqCst);
        mailbox.complete();

        sender.join().unwrap();
    }

    #[test]
    fn close_unblocks_everyone() {
        let mailbox = Arc::new(Mailbox::new());

        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || mailbox.wait(None))
        };
        thread::sleep(Duration::from_millis(20));
        mailbox.close();
        assert_eq!(waiter.join().unwrap(), Wait::Closed);

        // A signal after close returns immediately.
        mailbox.signal();
    }
}
