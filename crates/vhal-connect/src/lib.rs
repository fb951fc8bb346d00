//! VHAL Connect: the vehicle hardware capability set, served by a remote proxy
//!
//! `GrpcVehicleHardware` implements `VehicleHardware` by forwarding every call
//! to a `VehicleServer` over gRPC. A supervised background task keeps the
//! property value stream open across server restarts and feeds the
//! registered change callback.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use vhal_connect::{ClientConfig, GrpcVehicleHardware};
//! use vhal_core_interface::VehicleHardware;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let hardware = GrpcVehicleHardware::new(ClientConfig::new("10.0.2.2:50051"))?;
//!     hardware.register_on_property_change_event(Box::new(|values: Vec<_>| {
//!         println!("{} value(s) changed", values.len());
//!     }));
//!
//!     if hardware.wait_for_connected(Duration::from_secs(5)).await {
//!         let configs = hardware.get_all_property_configs().await;
//!         println!("{} properties", configs.len());
//!     }
//!     hardware.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;

pub use client::GrpcVehicleHardware;
pub use config::ClientConfig;
pub use error::ConnectError;
