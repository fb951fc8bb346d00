//! Integration tests for the vehicle proxy server
//!
//! Each test starts a proxy on an ephemeral port around a scripted hardware
//! and drives it through the generated gRPC client.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tonic::transport::Channel;
use tonic::Code;
use vhal_core_interface::{
    DumpResult, GetValueRequest, GetValueResult, PropertyChangeCallback, PropertySetErrorCallback,
    RawPropValues, ResultSender, SetValueRequest, SetValueResult, StatusCode, SubscribeOptions,
    VehicleHardware, VehiclePropConfig, VehiclePropValue, VehiclePropertyAccess,
    VehiclePropertyChangeMode,
};
use vhal_proto::convert::decode_values;
use vhal_proto::vehicle_server_client::VehicleServerClient;
use vhal_proto::{
    DumpOptions, SubscribeRequest, UnsubscribeRequest, UpdateSampleRateRequest,
    VehiclePropValueRequest, VehiclePropValueRequests,
};
use vhal_proxy::{GrpcVehicleProxyServer, ProxyConfig};

const SPEED: i32 = 0x11600207;

/// How the scripted hardware answers set/get batches
#[derive(Clone, Copy, PartialEq)]
enum Completion {
    /// Complete from a spawned task, results in reverse order
    Reversed,
    /// Accept the batch and never complete it
    Never,
    /// Reject the batch outright
    Reject(StatusCode),
    /// Return from the call only after this long, then complete
    Stall(Duration),
}

struct ScriptedHardware {
    completion: Completion,
    on_change: Mutex<Option<PropertyChangeCallback>>,
    parked_sets: Mutex<Vec<ResultSender<SetValueResult>>>,
    parked_gets: Mutex<Vec<ResultSender<GetValueResult>>>,
    subscriptions: Mutex<Vec<SubscribeOptions>>,
    unsubscriptions: Mutex<Vec<(i32, i32)>>,
    sample_rates: Mutex<Vec<(i32, i32, f32)>>,
    stalled_calls_finished: AtomicUsize,
}

impl ScriptedHardware {
    fn new(completion: Completion) -> Arc<Self> {
        Arc::new(Self {
            completion,
            on_change: Mutex::new(None),
            parked_sets: Mutex::new(Vec::new()),
            parked_gets: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            unsubscriptions: Mutex::new(Vec::new()),
            sample_rates: Mutex::new(Vec::new()),
            stalled_calls_finished: AtomicUsize::new(0),
        })
    }

    fn emit(&self, values: Vec<VehiclePropValue>) {
        if let Some(callback) = self.on_change.lock().unwrap().as_ref() {
            callback(values);
        }
    }
}

#[async_trait]
impl VehicleHardware for ScriptedHardware {
    async fn get_all_property_configs(&self) -> Vec<VehiclePropConfig> {
        (0..5)
            .map(|i| VehiclePropConfig {
                prop: SPEED + i,
                access: VehiclePropertyAccess::Read,
                change_mode: VehiclePropertyChangeMode::Continuous,
                max_sample_rate: 10.0,
                ..Default::default()
            })
            .collect()
    }

    async fn set_values(
        &self,
        completion: ResultSender<SetValueResult>,
        requests: Vec<SetValueRequest>,
    ) -> StatusCode {
        match self.completion {
            Completion::Reject(status) => status,
            Completion::Never => {
                self.parked_sets.lock().unwrap().push(completion);
                StatusCode::Ok
            }
            Completion::Stall(delay) => {
                tokio::time::sleep(delay).await;
                self.stalled_calls_finished.fetch_add(1, Ordering::SeqCst);
                completion.complete(Vec::new());
                StatusCode::Ok
            }
            Completion::Reversed => {
                tokio::spawn(async move {
                    let results = requests
                        .iter()
                        .rev()
                        .map(|r| SetValueResult {
                            request_id: r.request_id,
                            status: StatusCode::Ok,
                        })
                        .collect();
                    completion.complete(results);
                });
                StatusCode::Ok
            }
        }
    }

    async fn get_values(
        &self,
        completion: ResultSender<GetValueResult>,
        requests: Vec<GetValueRequest>,
    ) -> StatusCode {
        match self.completion {
            Completion::Reject(status) => status,
            Completion::Never => {
                self.parked_gets.lock().unwrap().push(completion);
                StatusCode::Ok
            }
            Completion::Stall(delay) => {
                tokio::time::sleep(delay).await;
                self.stalled_calls_finished.fetch_add(1, Ordering::SeqCst);
                completion.complete(Vec::new());
                StatusCode::Ok
            }
            Completion::Reversed => {
                tokio::spawn(async move {
                    let results = requests
                        .into_iter()
                        .rev()
                        .map(|r| GetValueResult {
                            request_id: r.request_id,
                            status: StatusCode::Ok,
                            prop: Some(r.prop.with_float(vec![42.0])),
                        })
                        .collect();
                    completion.complete(results);
                });
                StatusCode::Ok
            }
        }
    }

    async fn dump(&self, options: &[String]) -> DumpResult {
        DumpResult {
            caller_should_dump_state: options.is_empty(),
            buffer: format!("options: {}", options.join(",")),
        }
    }

    async fn check_health(&self) -> StatusCode {
        StatusCode::Ok
    }

    async fn subscribe(&self, options: SubscribeOptions) -> StatusCode {
        self.subscriptions.lock().unwrap().push(options);
        StatusCode::Ok
    }

    async fn unsubscribe(&self, prop_id: i32, area_id: i32) -> StatusCode {
        self.unsubscriptions.lock().unwrap().push((prop_id, area_id));
        StatusCode::NotAvailable
    }

    async fn update_sample_rate(&self, prop_id: i32, area_id: i32, sample_rate: f32) -> StatusCode {
        self.sample_rates
            .lock()
            .unwrap()
            .push((prop_id, area_id, sample_rate));
        StatusCode::Ok
    }

    fn register_on_property_change_event(&self, callback: PropertyChangeCallback) {
        *self.on_change.lock().unwrap() = Some(callback);
    }

    fn register_on_property_set_error_event(&self, _callback: PropertySetErrorCallback) {}
}

async fn start_proxy(
    hardware: Arc<ScriptedHardware>,
    timeout: Duration,
) -> (Arc<GrpcVehicleProxyServer>, VehicleServerClient<Channel>) {
    let config = ProxyConfig {
        server_addr: "127.0.0.1:0".to_string(),
        hardware_op_timeout: timeout,
    };
    let server = Arc::new(GrpcVehicleProxyServer::new(config, hardware));
    server.start().await.expect("proxy starts");

    let addr = server.local_addr().await.expect("bound address");
    let client = VehicleServerClient::connect(format!("http://{}", addr))
        .await
        .expect("client connects");
    (server, client)
}

fn requests(ids: &[i64]) -> VehiclePropValueRequests {
    VehiclePropValueRequests {
        requests: ids
            .iter()
            .map(|&id| VehiclePropValueRequest {
                request_id: id,
                value: Some(VehiclePropValue::new(SPEED, 0).with_float(vec![1.0]).into()),
            })
            .collect(),
    }
}

#[tokio::test]
async fn test_get_all_property_config_streams_every_config() {
    let hardware = ScriptedHardware::new(Completion::Reversed);
    let (server, mut client) = start_proxy(hardware, Duration::from_secs(1)).await;

    let mut stream = client.get_all_property_config(()).await.unwrap().into_inner();
    let mut props = Vec::new();
    while let Some(config) = stream.message().await.unwrap() {
        props.push(config.prop);
    }
    assert_eq!(props, (0..5).map(|i| SPEED + i).collect::<Vec<_>>());

    server.shutdown().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn test_set_values_results_match_request_ids() {
    let hardware = ScriptedHardware::new(Completion::Reversed);
    let (server, mut client) = start_proxy(hardware, Duration::from_secs(1)).await;

    let ids: Vec<i64> = (100..110).collect();
    let results = client
        .set_values(requests(&ids))
        .await
        .unwrap()
        .into_inner()
        .results;

    assert_eq!(results.len(), ids.len());
    let returned: HashSet<i64> = results.iter().map(|r| r.request_id).collect();
    assert_eq!(returned, ids.iter().copied().collect());
    assert!(results
        .iter()
        .all(|r| r.status == StatusCode::Ok.as_i32()));

    server.shutdown().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn test_get_values_results_carry_values() {
    let hardware = ScriptedHardware::new(Completion::Reversed);
    let (server, mut client) = start_proxy(hardware, Duration::from_secs(1)).await;

    let results = client
        .get_values(requests(&[1, 2, 3]))
        .await
        .unwrap()
        .into_inner()
        .results;

    assert_eq!(results.len(), 3);
    for result in results {
        let value = result.value.expect("value present");
        assert_eq!(value.prop, SPEED);
        assert_eq!(value.float_values, vec![42.0]);
    }

    server.shutdown().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn test_set_values_times_out_when_hardware_never_completes() {
    let hardware = ScriptedHardware::new(Completion::Never);
    let timeout = Duration::from_millis(300);
    let (server, mut client) = start_proxy(hardware.clone(), timeout).await;

    let start = Instant::now();
    let err = client.set_values(requests(&[1])).await.unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err.code(), Code::Internal);
    assert!(err.message().contains("timeout"), "{}", err.message());
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_millis(700), "{:?}", elapsed);

    // The late completion lands nowhere.
    let parked = hardware.parked_sets.lock().unwrap().pop().unwrap();
    assert!(parked.is_abandoned());
    assert!(!parked.complete(vec![]));

    server.shutdown().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn test_get_values_times_out_with_default_bound() {
    let hardware = ScriptedHardware::new(Completion::Never);
    let (server, mut client) = start_proxy(hardware, Duration::from_secs(1)).await;

    let start = Instant::now();
    let err = client.get_values(requests(&[1])).await.unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err.code(), Code::Internal);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1800), "{:?}", elapsed);

    server.shutdown().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn test_timed_out_hardware_call_still_runs_to_completion() {
    let hardware = ScriptedHardware::new(Completion::Stall(Duration::from_millis(800)));
    let timeout = Duration::from_millis(200);
    let (server, mut client) = start_proxy(hardware.clone(), timeout).await;

    let start = Instant::now();
    let err = client.set_values(requests(&[1])).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert!(start.elapsed() < Duration::from_millis(450), "{:?}", start.elapsed());
    let err = client.get_values(requests(&[2])).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(hardware.stalled_calls_finished.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(hardware.stalled_calls_finished.load(Ordering::SeqCst), 2);

    server.shutdown().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn test_rejected_batch_is_internal_error() {
    let hardware = ScriptedHardware::new(Completion::Reject(StatusCode::TryAgain));
    let (server, mut client) = start_proxy(hardware, Duration::from_secs(1)).await;

    let err = client.set_values(requests(&[1])).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert!(err.message().contains("TRY_AGAIN"), "{}", err.message());

    server.shutdown().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn test_passthrough_calls() {
    let hardware = ScriptedHardware::new(Completion::Reversed);
    let (server, mut client) = start_proxy(hardware.clone(), Duration::from_secs(1)).await;

    let health = client.check_health(()).await.unwrap().into_inner();
    assert_eq!(health.status_code, StatusCode::Ok.as_i32());

    let dump = client
        .dump(DumpOptions {
            options: vec!["--list".to_string()],
        })
        .await
        .unwrap()
        .into_inner();
    assert!(!dump.caller_should_dump_state);
    assert_eq!(dump.buffer, "options: --list");

    let status = client
        .update_sample_rate(UpdateSampleRateRequest {
            prop: SPEED,
            area_id: 0,
            sample_rate: 5.0,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status.status_code, StatusCode::Ok.as_i32());
    assert_eq!(*hardware.sample_rates.lock().unwrap(), vec![(SPEED, 0, 5.0)]);

    let options = SubscribeOptions {
        prop_id: SPEED,
        area_ids: vec![0],
        sample_rate: 10.0,
        ..Default::default()
    };
    client
        .subscribe(SubscribeRequest {
            options: Some(options.clone().into()),
        })
        .await
        .unwrap();
    assert_eq!(*hardware.subscriptions.lock().unwrap(), vec![options]);

    let status = client
        .unsubscribe(UnsubscribeRequest {
            prop_id: SPEED,
            area_id: 0,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status.status_code, StatusCode::NotAvailable.as_i32());

    let err = client
        .subscribe(SubscribeRequest { options: None })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    server.shutdown().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn test_fan_out_skips_disconnected_client() {
    let hardware = ScriptedHardware::new(Completion::Reversed);
    let (server, mut client) = start_proxy(hardware.clone(), Duration::from_secs(1)).await;
    let mut other_client = client.clone();

    let mut first = client
        .start_property_values_stream(())
        .await
        .unwrap()
        .into_inner();
    let second = other_client
        .start_property_values_stream(())
        .await
        .unwrap()
        .into_inner();
    assert_eq!(server.connections().len(), 2);
    let ids = server.connections().connection_ids();

    hardware.emit(vec![VehiclePropValue::new(SPEED, 0).with_float(vec![1.0])]);
    let mut second = second;
    let a = decode_values(first.message().await.unwrap().unwrap());
    let b = decode_values(second.message().await.unwrap().unwrap());
    assert_eq!(a, b);
    assert_eq!(a[0].value.float_values, vec![1.0]);

    drop(second);
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.connections().len() > 1 {
        assert!(Instant::now() < deadline, "dead connection never pruned");
        hardware.emit(vec![VehiclePropValue::new(SPEED, 0).with_float(vec![0.0])]);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let remaining = server.connections().connection_ids();
    assert_eq!(remaining, vec![ids[0]]);

    hardware.emit(vec![VehiclePropValue::new(SPEED, 0).with_float(vec![2.0])]);
    loop {
        let batch = decode_values(first.message().await.unwrap().unwrap());
        if batch[0].value.float_values == vec![2.0] {
            break;
        }
    }

    server.shutdown().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn test_closed_streams_leave_registry_without_events() {
    let hardware = ScriptedHardware::new(Completion::Reversed);
    let (server, mut client) = start_proxy(hardware, Duration::from_secs(1)).await;

    let mut streams = Vec::new();
    for _ in 0..20 {
        let stream = client
            .start_property_values_stream(())
            .await
            .unwrap()
            .into_inner();
        streams.push(stream);
    }
    assert_eq!(server.connections().len(), 20);

    drop(streams);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !server.connections().is_empty() {
        assert!(
            Instant::now() < deadline,
            "{} closed streams still registered",
            server.connections().len()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    server.shutdown().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn test_client_that_never_reads_is_dropped() {
    let hardware = ScriptedHardware::new(Completion::Reversed);
    let (server, mut client) = start_proxy(hardware.clone(), Duration::from_secs(1)).await;

    let addr = server.local_addr().await.unwrap();
    let mut stalled_client = VehicleServerClient::connect(format!("http://{}", addr))
        .await
        .unwrap();
    let _stalled = stalled_client
        .start_property_values_stream(())
        .await
        .unwrap()
        .into_inner();
    assert_eq!(server.connections().len(), 1);

    let payload = VehiclePropValue {
        prop: SPEED,
        value: RawPropValues {
            string_value: "x".repeat(4096),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut sent = 0;
    while !server.connections().is_empty() {
        assert!(sent < 5000, "unread stream still registered after {} batches", sent);
        hardware.emit(vec![payload.clone()]);
        sent += 1;
        if sent % 50 == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    // A reading client is unaffected.
    let mut reader = client
        .start_property_values_stream(())
        .await
        .unwrap()
        .into_inner();
    hardware.emit(vec![VehiclePropValue::new(SPEED, 0).with_float(vec![7.0])]);
    let batch = decode_values(reader.message().await.unwrap().unwrap());
    assert_eq!(batch[0].value.float_values, vec![7.0]);

    server.shutdown().await;
    server.wait().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_aborts_open_streams() {
    let hardware = ScriptedHardware::new(Completion::Reversed);
    let (server, mut client) = start_proxy(hardware, Duration::from_secs(1)).await;

    let mut stream = client
        .start_property_values_stream(())
        .await
        .unwrap()
        .into_inner();

    server.shutdown().await;
    let status = stream.message().await.unwrap_err();
    assert_eq!(status.code(), Code::Aborted);

    tokio::time::timeout(Duration::from_secs(5), server.wait())
        .await
        .expect("server stops")
        .unwrap();
    assert!(server.local_addr().await.is_none());
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let hardware = ScriptedHardware::new(Completion::Reversed);
    let (server, mut client) = start_proxy(hardware, Duration::from_secs(1)).await;

    let addr = server.local_addr().await;
    server.start().await.expect("second start is a no-op");
    assert_eq!(server.local_addr().await, addr);

    let health = client.check_health(()).await.unwrap().into_inner();
    assert_eq!(health.status_code, StatusCode::Ok.as_i32());

    server.shutdown().await;
    server.wait().await.unwrap();
}
