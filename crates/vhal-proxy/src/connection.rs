//! Value stream connections and the registry that fans events out to them.
//!
//! # Descriptor lifecycle
//!
//! ```text
//!    register() ──> Active ──(write failure | shutdown() | drop)──> ShuttingDown
//! ```
//!
//! ShuttingDown is terminal: writes fail fast and every task blocked in
//! [`ConnectionDescriptor::wait`] is released. The descriptor gives up its
//! stream sender on shutdown so the client sees the stream end.
//!
//! Each stream buffers at most [`VALUE_STREAM_CAPACITY`] batches. A client
//! that stops reading fills its buffer and the next write fails.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tonic::Status;
use tracing::{debug, error, info};
use vhal_core_interface::VehiclePropValue;
use vhal_proto::convert::encode_values;
use vhal_proto::VehiclePropValues;

/// Batches buffered per value stream before writes start failing
pub const VALUE_STREAM_CAPACITY: usize = 100;

/// Sending half of one client's value stream
pub type ValueStreamSender = mpsc::Sender<Result<VehiclePropValues, Status>>;

#[derive(Debug)]
struct DescriptorState {
    stream: Option<ValueStreamSender>,
    shutting_down: bool,
}

/// Server-side handle of one open `StartPropertyValuesStream` call
#[derive(Debug)]
pub struct ConnectionDescriptor {
    id: u64,
    state: Mutex<DescriptorState>,
    shutdown_signal: watch::Sender<bool>,
}

impl ConnectionDescriptor {
    fn new(id: u64, stream: ValueStreamSender) -> Self {
        let (shutdown_signal, _) = watch::channel(false);
        Self {
            id,
            state: Mutex::new(DescriptorState {
                stream: Some(stream),
                shutting_down: false,
            }),
            shutdown_signal,
        }
    }

    /// Identifier unique within the owning registry
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shutting_down
    }

    /// Push one batch to the client.
    ///
    /// A failed write moves the descriptor to ShuttingDown; once there, every
    /// write fails without touching the stream.
    pub fn write(&self, values: &VehiclePropValues) -> bool {
        {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.shutting_down {
                return false;
            }
            match &state.stream {
                Some(stream) => match stream.try_send(Ok(values.clone())) {
                    Ok(()) => return true,
                    Err(TrySendError::Full(_)) => {
                        error!("Server write failed, client not reading. ID: {}", self.id)
                    }
                    Err(TrySendError::Closed(_)) => {
                        error!("Server write failed, connection lost. ID: {}", self.id)
                    }
                },
                None => error!("Empty stream. ID: {}", self.id),
            }
        }
        self.shutdown();
        false
    }

    /// Resolves once the descriptor is shutting down
    pub async fn wait(&self) {
        let mut signal = self.shutdown_signal.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = signal.wait_for(|down| *down).await;
    }

    /// Idempotent; wakes every waiter
    pub fn shutdown(&self) {
        let stream = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.shutting_down = true;
            state.stream.take()
        };
        drop(stream);
        self.shutdown_signal.send_replace(true);
    }
}

impl Drop for ConnectionDescriptor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The set of live value stream connections.
///
/// Fan-out holds the lock shared; only registration and cleanup of broken
/// connections take it exclusively.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: RwLock<Vec<Arc<ConnectionDescriptor>>>,
    closed: RwLock<bool>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new value stream.
    ///
    /// Ids come from a counter that is never reset, so an id seen during
    /// cleanup always names the connection that failed. A closed registry
    /// hands out descriptors that are already shutting down.
    pub fn register(&self, stream: ValueStreamSender) -> Arc<ConnectionDescriptor> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(ConnectionDescriptor::new(id, stream));

        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            debug!("Registry closed, rejecting value stream {}", id);
            connection.shutdown();
            return connection;
        }

        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(connection.clone());
        info!("Value stream connected. ID: {}", id);

        connection
    }

    /// Fan one batch of changed values out to every live connection.
    ///
    /// Returns the number of connections the batch was delivered to.
    pub fn broadcast(&self, values: Vec<VehiclePropValue>) -> usize {
        let batch = encode_values(values);
        let mut broken = HashSet::new();
        let mut delivered = 0;

        {
            let connections = self
                .connections
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for connection in connections.iter() {
                if connection.write(&batch) {
                    delivered += 1;
                } else {
                    broken.insert(connection.id());
                }
            }
        }

        if !broken.is_empty() {
            debug!("Removing broken value streams: {:?}", broken);
            self.connections
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|connection| !broken.contains(&connection.id()));
        }

        delivered
    }

    /// Forget one connection, shutting it down
    pub fn remove(&self, id: u64) {
        let mut removed = Vec::new();
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|connection| {
                if connection.id() == id {
                    removed.push(connection.clone());
                    false
                } else {
                    true
                }
            });
        for connection in removed {
            debug!("Removed value stream {}", id);
            connection.shutdown();
        }
    }

    /// Shut down every connection and reject new ones until [`reopen`](Self::reopen)
    pub fn close(&self) {
        *self.closed.write().unwrap_or_else(PoisonError::into_inner) = true;

        let connections = std::mem::take(
            &mut *self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for connection in connections {
            connection.shutdown();
        }
    }

    pub fn reopen(&self) {
        *self.closed.write().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn connection_ids(&self) -> Vec<u64> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|connection| connection.id())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
