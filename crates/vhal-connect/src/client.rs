//! GrpcVehicleHardware: VehicleHardware implementation backed by a remote proxy

use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Response, Status};
use tracing::{debug, error, info, warn};
use vhal_core_interface::{
    DumpResult, GetValueRequest, GetValueResult, PropertyChangeCallback, PropertySetErrorCallback,
    ResultSender, SetValueRequest, SetValueResult, StatusCode, SubscribeOptions, VehicleHardware,
    VehiclePropConfig, VehiclePropValue,
};
use vhal_proto::convert::decode_values;
use vhal_proto::vehicle_server_client::VehicleServerClient;
use vhal_proto::{
    DumpOptions, SubscribeRequest, UnsubscribeRequest, UpdateSampleRateRequest,
    VehicleHalCallStatus, VehiclePropValueRequests,
};

use crate::config::ClientConfig;
use crate::error::ConnectError;

/// Callbacks registered by the owner of the client.
///
/// Guarded separately from the streaming machinery: the stream task reads
/// them while the owner may still be registering.
#[derive(Default)]
struct Callbacks {
    on_change: RwLock<Option<PropertyChangeCallback>>,
    /// Kept for the owner's benefit; set errors are not carried on the wire
    on_set_error: RwLock<Option<PropertySetErrorCallback>>,
}

impl Callbacks {
    fn property_changed(&self, values: Vec<VehiclePropValue>) {
        let guard = self.on_change.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(callback) => callback(values),
            None => debug!("No change callback registered, dropping {} value(s)", values.len()),
        }
    }
}

/// A `VehicleHardware` whose every operation runs on a remote proxy.
///
/// Construction never blocks: the channel connects lazily and a background
/// task keeps the property value stream open, reconnecting with exponential
/// backoff whenever it drops. Events missed while disconnected are not
/// replayed.
///
/// Must be created inside a tokio runtime.
pub struct GrpcVehicleHardware {
    config: ClientConfig,
    client: VehicleServerClient<Channel>,
    callbacks: Arc<Callbacks>,
    connected: watch::Receiver<bool>,
    cancel: CancellationToken,
    stream_task: Mutex<Option<JoinHandle<()>>>,
}

impl GrpcVehicleHardware {
    pub fn new(config: ClientConfig) -> Result<Self, ConnectError> {
        let uri = config.endpoint_uri();
        let endpoint =
            Endpoint::from_shared(uri).map_err(|source| ConnectError::InvalidAddress {
                addr: config.service_addr.clone(),
                source,
            })?;
        let client = VehicleServerClient::new(endpoint.connect_lazy());

        let callbacks = Arc::new(Callbacks::default());
        let (connected_tx, connected) = watch::channel(false);
        let cancel = CancellationToken::new();

        let stream_task = tokio::spawn(run_value_stream(
            client.clone(),
            callbacks.clone(),
            connected_tx,
            cancel.clone(),
            config.clone(),
        ));

        info!("Vehicle hardware client targeting {}", config.service_addr);

        Ok(Self {
            config,
            client,
            callbacks,
            connected,
            cancel,
            stream_task: Mutex::new(Some(stream_task)),
        })
    }

    /// Wait until the value stream has been opened at least once.
    ///
    /// Meant for bring-up and tests.
    pub async fn wait_for_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.connected.clone();
        tokio::time::timeout(timeout, connected.wait_for(|c| *c))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    /// Stop the value stream task and wait for it to exit.
    ///
    /// No change callback runs after this returns. Unary calls keep working.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.stream_task.lock().await.take() {
            if let Err(e) = task.await {
                error!("Value stream task failed: {}", e);
            }
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(timeout) = self.config.rpc_timeout {
            request.set_timeout(timeout);
        }
        request
    }
}

impl Drop for GrpcVehicleHardware {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn transport_failure(op: &str, status: &Status) -> StatusCode {
    error!("{} RPC failed: {}", op, status);
    StatusCode::InternalError
}

/// Map the reply of a status-returning call.
fn call_status(op: &str, reply: Result<Response<VehicleHalCallStatus>, Status>) -> StatusCode {
    match reply {
        Ok(response) => response.into_inner().into(),
        Err(status) => transport_failure(op, &status),
    }
}

/// Like [`call_status`], for calls older proxies do not implement.
///
/// Those proxies have nothing to subscribe to, so `UNIMPLEMENTED` counts
/// as success.
fn optional_call_status(
    op: &str,
    reply: Result<Response<VehicleHalCallStatus>, Status>,
) -> StatusCode {
    match reply {
        Err(status) if status.code() == Code::Unimplemented => {
            debug!("{} not implemented by the proxy, ignoring", op);
            StatusCode::Ok
        }
        reply => call_status(op, reply),
    }
}

#[async_trait]
impl VehicleHardware for GrpcVehicleHardware {
    async fn get_all_property_configs(&self) -> Vec<VehiclePropConfig> {
        let mut client = self.client.clone();
        let mut stream = match client.get_all_property_config(self.request(())).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                transport_failure("GetAllPropertyConfig", &status);
                return Vec::new();
            }
        };

        let mut configs = Vec::new();
        loop {
            match stream.message().await {
                Ok(Some(config)) => configs.push(config.into()),
                Ok(None) => break,
                Err(status) => {
                    transport_failure("GetAllPropertyConfig", &status);
                    return Vec::new();
                }
            }
        }
        configs
    }

    async fn set_values(
        &self,
        completion: ResultSender<SetValueResult>,
        requests: Vec<SetValueRequest>,
    ) -> StatusCode {
        let message = VehiclePropValueRequests {
            requests: requests.into_iter().map(Into::into).collect(),
        };

        let mut client = self.client.clone();
        match client.set_values(self.request(message)).await {
            Ok(response) => {
                let results = response
                    .into_inner()
                    .results
                    .into_iter()
                    .map(Into::into)
                    .collect();
                completion.complete(results);
                StatusCode::Ok
            }
            Err(status) => transport_failure("SetValues", &status),
        }
    }

    async fn get_values(
        &self,
        completion: ResultSender<GetValueResult>,
        requests: Vec<GetValueRequest>,
    ) -> StatusCode {
        let message = VehiclePropValueRequests {
            requests: requests.into_iter().map(Into::into).collect(),
        };

        let mut client = self.client.clone();
        match client.get_values(self.request(message)).await {
            Ok(response) => {
                let results = response
                    .into_inner()
                    .results
                    .into_iter()
                    .map(Into::into)
                    .collect();
                completion.complete(results);
                StatusCode::Ok
            }
            Err(status) => transport_failure("GetValues", &status),
        }
    }

    async fn dump(&self, options: &[String]) -> DumpResult {
        let message = DumpOptions {
            options: options.to_vec(),
        };

        let mut client = self.client.clone();
        match client.dump(self.request(message)).await {
            Ok(response) => response.into_inner().into(),
            Err(status) => {
                transport_failure("Dump", &status);
                DumpResult::default()
            }
        }
    }

    async fn check_health(&self) -> StatusCode {
        let mut client = self.client.clone();
        call_status("CheckHealth", client.check_health(self.request(())).await)
    }

    async fn subscribe(&self, options: SubscribeOptions) -> StatusCode {
        let message = SubscribeRequest {
            options: Some(options.into()),
        };

        let mut client = self.client.clone();
        optional_call_status("Subscribe", client.subscribe(self.request(message)).await)
    }

    async fn unsubscribe(&self, prop_id: i32, area_id: i32) -> StatusCode {
        let message = UnsubscribeRequest { prop_id, area_id };

        let mut client = self.client.clone();
        optional_call_status(
            "Unsubscribe",
            client.unsubscribe(self.request(message)).await,
        )
    }

    async fn update_sample_rate(&self, prop_id: i32, area_id: i32, sample_rate: f32) -> StatusCode {
        let message = UpdateSampleRateRequest {
            prop: prop_id,
            area_id,
            sample_rate,
        };

        let mut client = self.client.clone();
        call_status(
            "UpdateSampleRate",
            client.update_sample_rate(self.request(message)).await,
        )
    }

    fn register_on_property_change_event(&self, callback: PropertyChangeCallback) {
        let mut slot = self
            .callbacks
            .on_change
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("Replacing the registered property change callback");
        }
        *slot = Some(callback);
    }

    /// Stored only: the value stream has no message shape for set errors.
    fn register_on_property_set_error_event(&self, callback: PropertySetErrorCallback) {
        let mut slot = self
            .callbacks
            .on_set_error
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            warn!("Replacing the registered property set error callback");
        }
        *slot = Some(callback);
    }
}

/// Keep the property value stream open until cancelled.
///
/// Every received batch goes to the change callback on this task. When the
/// stream ends for any reason the task waits out the backoff and reopens it.
async fn run_value_stream(
    mut client: VehicleServerClient<Channel>,
    callbacks: Arc<Callbacks>,
    connected: watch::Sender<bool>,
    cancel: CancellationToken,
    config: ClientConfig,
) {
    let mut backoff = config.reconnect_backoff;

    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = client.start_property_values_stream(()) => opened,
        };

        match opened {
            Ok(response) => {
                info!("Property value stream opened");
                connected.send_replace(true);
                backoff = config.reconnect_backoff;

                let mut stream = response.into_inner();
                loop {
                    let message = tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("Value stream task stopped");
                            return;
                        }
                        message = stream.message() => message,
                    };
                    match message {
                        Ok(Some(values)) => callbacks.property_changed(decode_values(values)),
                        Ok(None) => {
                            warn!("Property value stream closed by the proxy");
                            break;
                        }
                        Err(status) => {
                            warn!("Property value stream lost: {}", status);
                            break;
                        }
                    }
                }
            }
            Err(status) => debug!("Failed to open property value stream: {}", status),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = config.next_backoff(backoff);
    }

    debug!("Value stream task stopped");
}
