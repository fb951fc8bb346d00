//! VHAL Proxy library.
//!
//! This crate exposes a local `VehicleHardware` implementation to any number
//! of remote clients over gRPC, and fans property change events out to every
//! client holding an open value stream.

pub mod connection;
pub mod error;
pub mod server;

pub use connection::{ConnectionDescriptor, ConnectionRegistry, VALUE_STREAM_CAPACITY};
pub use error::ProxyError;
pub use server::{GrpcVehicleProxyServer, ProxyConfig, ProxyService, DEFAULT_HARDWARE_OP_TIMEOUT};
