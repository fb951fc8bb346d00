//! One-shot completion handles for batched hardware requests.
//!
//! `set_values` and `get_values` complete asynchronously: the hardware keeps
//! the [`ResultSender`] and may complete it from any thread after the call
//! has returned. The caller holds the matching [`ResultReceiver`]. Once the
//! receiver is gone (for instance after a timeout) a late completion is
//! dropped on the floor.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::types::{SetValueErrorEvent, VehiclePropValue};

/// Invoked by the hardware for every batch of changed property values
pub type PropertyChangeCallback = Box<dyn Fn(Vec<VehiclePropValue>) + Send + Sync>;

/// Invoked by the hardware when a previously accepted set request fails later
pub type PropertySetErrorCallback = Box<dyn Fn(Vec<SetValueErrorEvent>) + Send + Sync>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionError {
    #[error("hardware did not complete the request within {0:?}")]
    Timeout(Duration),

    #[error("hardware dropped the request without completing it")]
    Abandoned,
}

/// Completing half of a batched request
#[derive(Debug)]
pub struct ResultSender<T> {
    tx: oneshot::Sender<Vec<T>>,
}

impl<T> ResultSender<T> {
    /// Deliver the results for the whole batch.
    ///
    /// Returns `false` if nobody is waiting anymore; the results are discarded.
    pub fn complete(self, results: Vec<T>) -> bool {
        self.tx.send(results).is_ok()
    }

    /// True once the waiting side has given up
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Waiting half of a batched request
#[derive(Debug)]
pub struct ResultReceiver<T> {
    rx: oneshot::Receiver<Vec<T>>,
}

impl<T> ResultReceiver<T> {
    pub async fn recv(self) -> Result<Vec<T>, CompletionError> {
        self.rx.await.map_err(|_| CompletionError::Abandoned)
    }

    /// Wait at most `timeout` for the results.
    ///
    /// On timeout the receiver is dropped, so a later completion is discarded.
    pub async fn recv_timeout(self, timeout: Duration) -> Result<Vec<T>, CompletionError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(_)) => Err(CompletionError::Abandoned),
            Err(_) => Err(CompletionError::Timeout(timeout)),
        }
    }
}

/// Create a linked sender/receiver pair for one batch
pub fn completion_channel<T>() -> (ResultSender<T>, ResultReceiver<T>) {
    let (tx, rx) = oneshot::channel();
    (ResultSender { tx }, ResultReceiver { rx })
}
