//! Waiting for a player's content to be fully buffered.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pending,
    Realized,
    Abandoned,
}

/// Shared between a player and the tickets handed out for it.
#[derive(Debug)]
pub(crate) struct RealizeSignal {
    outcome: Mutex<Outcome>,
    changed: Condvar,
}

impl Default for RealizeSignal {
    fn default() -> Self {
        Self {
            outcome: Mutex::new(Outcome::Pending),
            changed: Condvar::new(),
        }
    }
}

impl RealizeSignal {
    /// Complete the wait. The first outcome wins.
    pub(crate) fn signal(&self, realized: bool) {
        let mut outcome = self.outcome.lock().unwrap();
        if *outcome == Outcome::Pending {
            *outcome = if realized {
                Outcome::Realized
            } else {
                Outcome::Abandoned
            };
            self.changed.notify_all();
        }
    }
}

/// Pending continuation of a player creation with a declared length.
///
/// The creating thread may block on [`wait`](Self::wait) while another
/// thread submits the content.
#[derive(Debug, Clone)]
pub struct RealizeTicket {
    signal: Arc<RealizeSignal>,
    timeout: Duration,
}

impl RealizeTicket {
    pub(crate) fn new(signal: Arc<RealizeSignal>, timeout: Duration) -> Self {
        Self { signal, timeout }
    }

    pub fn is_realized(&self) -> bool {
        *self.signal.outcome.lock().unwrap() == Outcome::Realized
    }

    /// Block for the configured realize timeout.
    pub fn wait(&self) -> Result<()> {
        self.wait_for(self.timeout)
    }

    /// Block until the content is complete, the player is destroyed, or
    /// `timeout` passes. Only the first case is a success.
    pub fn wait_for(&self, timeout: Duration) -> Result<()> {
        let outcome = self.signal.outcome.lock().unwrap();
        let (outcome, _) = self
            .signal
            .changed
            .wait_timeout_while(outcome, timeout, |o| *o == Outcome::Pending)
            .unwrap();
        match *outcome {
            Outcome::Realized => Ok(()),
            Outcome::Abandoned => Err(MediaError::Fail(
                "player closed before it was realized".to_string(),
            )),
            Outcome::Pending => Err(MediaError::Fail(format!(
                "player not realized within {:?}",
                timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn wait_returns_once_signalled_from_another_thread() {
        let signal = Arc::new(RealizeSignal::default());
        let ticket = RealizeTicket::new(signal.clone(), Duration::from_secs(5));
        let waiter = {
            let ticket = ticket.clone();
            thread::spawn(move || ticket.wait())
        };
        thread::sleep(Duration::from_millis(20));
        signal.signal(true);
        assert!(waiter.join().unwrap().is_ok());
        assert!(ticket.is_realized());
    }

    #[test]
    fn timeout_and_abandon_are_failures() {
        let signal = Arc::new(RealizeSignal::default());
        let ticket = RealizeTicket::new(signal.clone(), Duration::from_millis(10));
        assert!(matches!(ticket.wait(), Err(MediaError::Fail(_))));

        signal.signal(false);
        signal.signal(true);
        assert!(matches!(
            ticket.wait_for(Duration::from_secs(1)),
            Err(MediaError::Fail(_))
        ));
        assert!(!ticket.is_realized());
    }
}
