/*!
 * VHAL: gRPC based vehicle HAL virtualization
 *
 * The workspace splits the bridge into its two halves:
 *
 * - `vhal-proxy` wraps a local `VehicleHardware` and serves it over gRPC
 * - `vhal-connect` implements `VehicleHardware` on top of a remote proxy
 *
 * This crate ties them together with an in-memory fake vehicle, TOML
 * configuration, logging setup and the `vhal` command line tool.
 */

pub mod config;
pub mod error;
pub mod fake;
pub mod logging;

pub use config::{LogLevel, LoggingConfig, ServerConfig, VhalConfig};
pub use error::ConfigError;
pub use fake::{FakeVehicleHardware, PropertyDefinition};

pub use vhal_connect::{ClientConfig, GrpcVehicleHardware};
pub use vhal_core_interface as hal;
pub use vhal_proxy::{GrpcVehicleProxyServer, ProxyConfig};
