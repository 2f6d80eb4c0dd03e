//! Turns one callback-based contract call into a bounded blocking wait.
//!
//! Each call gets a fresh single-slot channel. The [`ResponseCallback`] owns
//! the sending half and is consumed on delivery, so at most one response is
//! ever written. When the deadline passes the receiving half is dropped and
//! any later delivery lands nowhere.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

type Delivery = Result<Option<Vec<u8>>>;

/// Completion handle passed to a [`ProvisioningContract`](crate::contract::ProvisioningContract) call.
pub struct ResponseCallback {
    slot: SyncSender<Delivery>,
    operation: &'static str,
}

impl ResponseCallback {
    /// Record the response body. `None` means the transport got no body.
    pub fn complete(self, response: Option<Vec<u8>>) {
        self.deliver(Ok(response));
    }

    /// Record an asynchronous failure. Its kind reaches the waiting task unchanged.
    pub fn fail(self, error: Error) {
        self.deliver(Err(error));
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    fn deliver(self, delivery: Delivery) {
        if self.slot.try_send(delivery).is_err() {
            log::debug!("discarding late {} response, exchange abandoned", self.operation);
        }
    }
}

struct PendingExchange {
    slot: Receiver<Delivery>,
    operation: &'static str,
}

impl PendingExchange {
    fn new(operation: &'static str) -> (ResponseCallback, Self) {
        let (tx, rx) = mpsc::sync_channel(1);
        (
            ResponseCallback { slot: tx, operation },
            Self { slot: rx, operation },
        )
    }

    fn wait_until(self, deadline: Instant, timeout: Duration) -> Result<Vec<u8>> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.slot.recv_timeout(remaining) {
            Ok(delivery) => match delivery? {
                Some(body) if !body.is_empty() => Ok(body),
                _ => Err(Error::NoResponse {
                    operation: self.operation,
                }),
            },
            Err(RecvTimeoutError::Timeout) => Err(Error::Timeout {
                operation: self.operation,
                timeout,
            }),
            // Callback dropped without completing.
            Err(RecvTimeoutError::Disconnected) => Err(Error::NoResponse {
                operation: self.operation,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Correlator {
    timeout: Duration,
}

impl Correlator {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issue a contract call through `issue` and block until its callback
    /// delivers a non-empty body or the deadline, counted from now, passes.
    ///
    /// A synchronous error from `issue` is returned as is, without waiting.
    pub fn call<F>(&self, operation: &'static str, issue: F) -> Result<Vec<u8>>
    where
        F: FnOnce(ResponseCallback) -> Result<()>,
    {
        let deadline = Instant::now()
            .checked_add(self.timeout)
            .ok_or_else(|| Error::client(format!("{operation} timeout of {:?} is out of range", self.timeout)))?;
        let (callback, pending) = PendingExchange::new(operation);

        issue(callback)?;

        let result = pending.wait_until(deadline, self.timeout);
        if let Err(err) = &result {
            log::debug!("{operation} exchange ended without a response: {err}");
        }
        result
    }
}
