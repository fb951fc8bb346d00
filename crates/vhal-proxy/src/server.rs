//! gRPC server implementation for the vehicle proxy.
//!
//! This module implements the `VehicleServer` service on top of a local
//! `VehicleHardware`, and owns the server lifecycle (start, shutdown, wait).

use crate::connection::{ConnectionRegistry, VALUE_STREAM_CAPACITY};
use crate::error::ProxyError;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_stream::Stream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};
use vhal_core_interface::{
    completion_channel, CompletionError, GetValueRequest, SetValueRequest, StatusCode,
    VehicleHardware,
};
use vhal_proto::vehicle_server_server::{VehicleServer, VehicleServerServer};
use vhal_proto::{
    DumpOptions, DumpResult, GetValueResults, SetValueResults, SubscribeRequest,
    UnsubscribeRequest, UpdateSampleRateRequest, VehicleHalCallStatus, VehiclePropConfig,
    VehiclePropValueRequests, VehiclePropValues,
};

/// How long a set/get handler waits for the hardware to complete a batch
pub const DEFAULT_HARDWARE_OP_TIMEOUT: Duration = Duration::from_secs(1);

/// Proxy server settings
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Listening address as `host:port`
    pub server_addr: String,

    /// Upper bound on waiting for the hardware to complete a set/get batch
    pub hardware_op_timeout: Duration,
}

impl ProxyConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            ..Default::default()
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:50051".to_string(),
            hardware_op_timeout: DEFAULT_HARDWARE_OP_TIMEOUT,
        }
    }
}

/// Implementation of the `VehicleServer` gRPC interface.
///
/// Every RPC is forwarded to the wrapped hardware. Set and get batches are
/// completed asynchronously by the hardware; the handler waits for them at
/// most `hardware_op_timeout`.
pub struct ProxyService {
    hardware: Arc<dyn VehicleHardware>,
    connections: Arc<ConnectionRegistry>,
    hardware_op_timeout: Duration,
}

impl ProxyService {
    /// Wrap `hardware` and route its change events into the value streams.
    ///
    /// This is the only place the change callback is registered.
    pub fn new(hardware: Arc<dyn VehicleHardware>, hardware_op_timeout: Duration) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());

        let registry = connections.clone();
        hardware.register_on_property_change_event(Box::new(move |values| {
            registry.broadcast(values);
        }));
        hardware.register_on_property_set_error_event(Box::new(|events| {
            // The value stream has no message shape for set errors.
            warn!("Dropping {} property set error event(s)", events.len());
        }));

        Self {
            hardware,
            connections,
            hardware_op_timeout,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }
}

/// Run one hardware set/get call on its own task and wait for its status
/// until `deadline`. Giving up does not cancel the call.
async fn start_hardware_op<F>(op: &str, deadline: Instant, call: F) -> Result<(), Status>
where
    F: Future<Output = StatusCode> + Send + 'static,
{
    let status = tokio::time::timeout_at(deadline, tokio::spawn(call))
        .await
        .map_err(|_| Status::internal(format!("The underlying hardware {} timeout.", op)))?
        .map_err(|e| Status::internal(format!("The underlying hardware {} failed: {}", op, e)))?;
    if !status.is_ok() {
        return Err(Status::internal(format!(
            "The underlying hardware fails to {}, VHAL status: {}",
            op, status
        )));
    }
    Ok(())
}

fn completion_status(op: &str, err: CompletionError) -> Status {
    match err {
        CompletionError::Timeout(_) => {
            Status::internal(format!("The underlying hardware {} timeout.", op))
        }
        CompletionError::Abandoned => Status::internal(format!(
            "The underlying hardware dropped the {} request.",
            op
        )),
    }
}

#[tonic::async_trait]
impl VehicleServer for ProxyService {
    type GetAllPropertyConfigStream =
        Pin<Box<dyn Stream<Item = Result<VehiclePropConfig, Status>> + Send>>;

    async fn get_all_property_config(
        &self,
        _request: Request<()>,
    ) -> Result<Response<Self::GetAllPropertyConfigStream>, Status> {
        let configs = self.hardware.get_all_property_configs().await;
        debug!("Streaming {} property configs", configs.len());

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(async move {
            for config in configs {
                if tx.send(Ok(config.into())).await.is_err() {
                    debug!("Client disconnected during config stream");
                    break;
                }
            }
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(
            Box::pin(stream) as Self::GetAllPropertyConfigStream
        ))
    }

    async fn set_values(
        &self,
        request: Request<VehiclePropValueRequests>,
    ) -> Result<Response<SetValueResults>, Status> {
        let requests: Vec<SetValueRequest> = request
            .into_inner()
            .requests
            .into_iter()
            .map(Into::into)
            .collect();
        let deadline = Instant::now() + self.hardware_op_timeout;

        let (tx, rx) = completion_channel();
        let hardware = self.hardware.clone();
        start_hardware_op("set values", deadline, async move {
            hardware.set_values(tx, requests).await
        })
        .await?;

        let results = rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .await
            .map_err(|e| completion_status("set values", e))?;

        Ok(Response::new(SetValueResults {
            results: results.into_iter().map(Into::into).collect(),
        }))
    }

    async fn get_values(
        &self,
        request: Request<VehiclePropValueRequests>,
    ) -> Result<Response<GetValueResults>, Status> {
        let requests: Vec<GetValueRequest> = request
            .into_inner()
            .requests
            .into_iter()
            .map(Into::into)
            .collect();
        let deadline = Instant::now() + self.hardware_op_timeout;

        let (tx, rx) = completion_channel();
        let hardware = self.hardware.clone();
        start_hardware_op("get values", deadline, async move {
            hardware.get_values(tx, requests).await
        })
        .await?;

        let results = rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .await
            .map_err(|e| completion_status("get values", e))?;

        Ok(Response::new(GetValueResults {
            results: results.into_iter().map(Into::into).collect(),
        }))
    }

    async fn update_sample_rate(
        &self,
        request: Request<UpdateSampleRateRequest>,
    ) -> Result<Response<VehicleHalCallStatus>, Status> {
        let req = request.into_inner();
        let status = self
            .hardware
            .update_sample_rate(req.prop, req.area_id, req.sample_rate)
            .await;
        Ok(Response::new(status.into()))
    }

    async fn check_health(
        &self,
        _request: Request<()>,
    ) -> Result<Response<VehicleHalCallStatus>, Status> {
        let status = self.hardware.check_health().await;
        Ok(Response::new(status.into()))
    }

    async fn dump(&self, request: Request<DumpOptions>) -> Result<Response<DumpResult>, Status> {
        let options = request.into_inner().options;
        let result = self.hardware.dump(&options).await;
        Ok(Response::new(result.into()))
    }

    type StartPropertyValuesStreamStream =
        Pin<Box<dyn Stream<Item = Result<VehiclePropValues, Status>> + Send>>;

    /// Opens a long-lived value stream for one client.
    ///
    /// The stream stays registered until a write to it fails, the client goes
    /// away, or the server shuts down; it then ends with `ABORTED`.
    async fn start_property_values_stream(
        &self,
        _request: Request<()>,
    ) -> Result<Response<Self::StartPropertyValuesStreamStream>, Status> {
        let (tx, rx) = mpsc::channel(VALUE_STREAM_CAPACITY);
        let connection = self.connections.register(tx.clone());
        let registry = self.connections.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = connection.wait() => {}
                _ = tx.closed() => connection.shutdown(),
            }
            error!("Stream lost, ID: {}", connection.id());
            registry.remove(connection.id());
            // A full buffer means the client stopped reading; it only sees the stream end.
            let _ = tx.try_send(Err(Status::aborted("Connection lost.")));
        });

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(
            Box::pin(stream) as Self::StartPropertyValuesStreamStream
        ))
    }

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<VehicleHalCallStatus>, Status> {
        let options = request
            .into_inner()
            .options
            .ok_or_else(|| Status::invalid_argument("Missing subscribe options"))?;
        let status = self.hardware.subscribe(options.into()).await;
        Ok(Response::new(status.into()))
    }

    async fn unsubscribe(
        &self,
        request: Request<UnsubscribeRequest>,
    ) -> Result<Response<VehicleHalCallStatus>, Status> {
        let req = request.into_inner();
        let status = self.hardware.unsubscribe(req.prop_id, req.area_id).await;
        Ok(Response::new(status.into()))
    }
}

#[derive(Default)]
struct ServerState {
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
}

/// The vehicle proxy server: a `ProxyService` bound to a listening address.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use vhal_core_interface::VehicleHardware;
/// use vhal_proxy::{GrpcVehicleProxyServer, ProxyConfig};
///
/// # async fn example(hardware: Arc<dyn VehicleHardware>) -> anyhow::Result<()> {
/// let server = GrpcVehicleProxyServer::new(ProxyConfig::new("127.0.0.1:50051"), hardware);
/// server.start().await?;
/// // ... later, from another task
/// server.shutdown().await;
/// server.wait().await?;
/// # Ok(())
/// # }
/// ```
pub struct GrpcVehicleProxyServer {
    config: ProxyConfig,
    service: Arc<ProxyService>,
    state: Mutex<ServerState>,
}

impl GrpcVehicleProxyServer {
    pub fn new(config: ProxyConfig, hardware: Arc<dyn VehicleHardware>) -> Self {
        let service = Arc::new(ProxyService::new(hardware, config.hardware_op_timeout));
        Self {
            config,
            service,
            state: Mutex::new(ServerState::default()),
        }
    }

    /// Bind the configured address and start serving.
    ///
    /// Calling this on a running server only logs a warning.
    pub async fn start(&self) -> Result<&Self, ProxyError> {
        let mut state = self.state.lock().await;
        if state.local_addr.is_some() {
            warn!("GrpcVehicleProxyServer has already started.");
            return Ok(self);
        }

        // TODO: select TLS credentials here once the deployment provides them
        let listener = TcpListener::bind(self.config.server_addr.as_str())
            .await
            .map_err(|source| ProxyError::Bind {
                addr: self.config.server_addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        self.service.connections().reopen();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let service = VehicleServerServer::from_arc(self.service.clone());
        let handle = tokio::spawn(async move {
            Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!("Vehicle proxy server listening on {}", local_addr);

        state.local_addr = Some(local_addr);
        state.shutdown_tx = Some(shutdown_tx);
        state.handle = Some(handle);
        Ok(self)
    }

    /// Release every value stream, then stop the gRPC server
    pub async fn shutdown(&self) -> &Self {
        self.service.connections().close();

        let shutdown_tx = self.state.lock().await.shutdown_tx.take();
        if let Some(shutdown_tx) = shutdown_tx {
            info!("Shutting down vehicle proxy server");
            let _ = shutdown_tx.send(());
        }
        self
    }

    /// Wait for the server to stop and release it.
    ///
    /// Returns immediately if the server was never started.
    pub async fn wait(&self) -> Result<(), ProxyError> {
        let handle = self.state.lock().await.handle.take();
        let result = match handle {
            Some(handle) => match handle.await {
                Ok(served) => served.map_err(ProxyError::from),
                Err(e) => Err(ProxyError::from(e)),
            },
            None => Ok(()),
        };

        *self.state.lock().await = ServerState::default();
        if let Err(e) = &result {
            error!("Vehicle proxy server terminated with error: {}", e);
        }
        result
    }

    /// Address actually bound; differs from the configured one for port 0
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.local_addr
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        self.service.connections()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}
