//! VHAL Core Interface: the vehicle hardware capability set
//!
//! This crate defines the `VehicleHardware` trait and the property data model
//! it exchanges. Both ends of the virtualization bridge speak it:
//!
//! - **Proxy server**: wraps a concrete `VehicleHardware` and exposes it over gRPC
//! - **gRPC client**: implements `VehicleHardware` by forwarding every call to the proxy
//! - **Fake hardware**: in-memory implementation for development and tests
//!
//! # Example
//!
//! ```rust,no_run
//! use vhal_core_interface::{
//!     completion_channel, GetValueRequest, VehicleHardware, VehiclePropValue,
//! };
//!
//! async fn read_speed<H: VehicleHardware>(hardware: &H) -> anyhow::Result<()> {
//!     let (tx, rx) = completion_channel();
//!     let request = GetValueRequest {
//!         request_id: 1,
//!         prop: VehiclePropValue::new(0x11600207, 0),
//!     };
//!     let status = hardware.get_values(tx, vec![request]).await;
//!     if status.is_ok() {
//!         for result in rx.recv().await? {
//!             println!("{}: {:?}", result.request_id, result.prop);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod completion;
pub mod status;
pub mod types;

use async_trait::async_trait;

pub use completion::{
    completion_channel, CompletionError, PropertyChangeCallback, PropertySetErrorCallback,
    ResultReceiver, ResultSender,
};
pub use status::StatusCode;
pub use types::*;

/// The capability set of a vehicle hardware implementation.
///
/// `set_values` and `get_values` are batched: every request in the batch gets
/// exactly one result, matched by `request_id`, delivered through the
/// completion handle. The returned `StatusCode` only says whether the batch
/// was accepted. When it is not `Ok` the completion handle is dropped and
/// no results follow.
///
/// # Thread Safety
///
/// Registered callbacks may be invoked from any thread, concurrently with any
/// other method.
#[async_trait]
pub trait VehicleHardware: Send + Sync + 'static {
    /// All property configs this hardware supports
    async fn get_all_property_configs(&self) -> Vec<VehiclePropConfig>;

    async fn set_values(
        &self,
        completion: ResultSender<SetValueResult>,
        requests: Vec<SetValueRequest>,
    ) -> StatusCode;

    async fn get_values(
        &self,
        completion: ResultSender<GetValueResult>,
        requests: Vec<GetValueRequest>,
    ) -> StatusCode;

    /// Debug dump; `options` are the raw command line arguments
    async fn dump(&self, options: &[String]) -> DumpResult;

    async fn check_health(&self) -> StatusCode;

    /// Start or update a subscription.
    ///
    /// A later call for the same property replaces the earlier options.
    async fn subscribe(&self, _options: SubscribeOptions) -> StatusCode {
        StatusCode::Ok
    }

    async fn unsubscribe(&self, _prop_id: i32, _area_id: i32) -> StatusCode {
        StatusCode::Ok
    }

    async fn update_sample_rate(
        &self,
        _prop_id: i32,
        _area_id: i32,
        _sample_rate: f32,
    ) -> StatusCode {
        StatusCode::Ok
    }

    /// Register the change callback. Called once during initialization.
    fn register_on_property_change_event(&self, callback: PropertyChangeCallback);

    /// Register the set-error callback. Called once during initialization.
    fn register_on_property_set_error_event(&self, callback: PropertySetErrorCallback);
}
