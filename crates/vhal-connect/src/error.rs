//! Error types for the vhal-connect crate

use thiserror::Error;

/// Failures constructing a client.
///
/// Once constructed, a client never returns these: RPC failures are mapped
/// to `StatusCode`s at the `VehicleHardware` boundary.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Invalid service address {addr}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}
