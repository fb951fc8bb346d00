/*!
 * In-memory vehicle hardware
 *
 * Stores one value per property/area pair, validates writes against the
 * property configs, and emits change events. Continuous properties are
 * sampled by a tokio task per subscribed area.
 */

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vhal_core_interface::{
    DumpResult, GetValueRequest, GetValueResult, PropertyChangeCallback, PropertySetErrorCallback,
    RawPropValues, ResultSender, SetValueErrorEvent, SetValueRequest, SetValueResult, StatusCode,
    SubscribeOptions, VehicleAreaConfig, VehicleHardware, VehiclePropConfig, VehiclePropValue,
    VehiclePropertyAccess, VehiclePropertyChangeMode, VehiclePropertyStatus,
};

/// Property ids of the built-in property set
pub mod props {
    pub const INFO_MAKE: i32 = 0x11100101;
    pub const PERF_ODOMETER: i32 = 0x11600204;
    pub const PERF_VEHICLE_SPEED: i32 = 0x11600207;
    pub const GEAR_SELECTION: i32 = 0x11400400;
    pub const HVAC_TEMPERATURE_SET: i32 = 0x15600503;
    pub const DOOR_LOCK: i32 = 0x16200B02;
}

/// Area ids used by the built-in zoned properties
pub mod areas {
    pub const DOOR_ROW_1_LEFT: i32 = 0x01;
    pub const DOOR_ROW_1_RIGHT: i32 = 0x04;
    pub const DOOR_ROW_2_LEFT: i32 = 0x10;
    pub const DOOR_ROW_2_RIGHT: i32 = 0x40;
    pub const SEAT_ROW_1_LEFT: i32 = 0x01;
    pub const SEAT_ROW_1_RIGHT: i32 = 0x04;
}

const GEAR_PARK: i32 = 4;

/// A property config together with the value every area starts with
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PropertyDefinition {
    #[serde(flatten)]
    pub config: VehiclePropConfig,

    /// Initial payload, applied to every area
    #[serde(default)]
    pub initial: Option<RawPropValues>,
}

impl PropertyDefinition {
    fn new(config: VehiclePropConfig, initial: RawPropValues) -> Self {
        Self {
            config,
            initial: Some(initial),
        }
    }
}

/// The built-in property set
pub fn default_properties() -> Vec<PropertyDefinition> {
    let read_only_continuous = |prop| VehiclePropConfig {
        prop,
        access: VehiclePropertyAccess::Read,
        change_mode: VehiclePropertyChangeMode::Continuous,
        min_sample_rate: 1.0,
        max_sample_rate: 10.0,
        ..Default::default()
    };
    let floats = |values: Vec<f32>| RawPropValues {
        float_values: values,
        ..Default::default()
    };
    let ints = |values: Vec<i32>| RawPropValues {
        int32_values: values,
        ..Default::default()
    };

    let door = |area_id| VehicleAreaConfig {
        min_int32_value: 0,
        max_int32_value: 1,
        ..VehicleAreaConfig::new(area_id)
    };
    let seat = |area_id| VehicleAreaConfig {
        min_float_value: 16.0,
        max_float_value: 28.0,
        ..VehicleAreaConfig::new(area_id)
    };

    vec![
        PropertyDefinition::new(
            VehiclePropConfig {
                prop: props::INFO_MAKE,
                access: VehiclePropertyAccess::Read,
                change_mode: VehiclePropertyChangeMode::Static,
                ..Default::default()
            },
            RawPropValues {
                string_value: "Toy Vehicle".to_string(),
                ..Default::default()
            },
        ),
        PropertyDefinition::new(read_only_continuous(props::PERF_VEHICLE_SPEED), floats(vec![0.0])),
        PropertyDefinition::new(read_only_continuous(props::PERF_ODOMETER), floats(vec![0.0])),
        PropertyDefinition::new(
            VehiclePropConfig {
                prop: props::GEAR_SELECTION,
                access: VehiclePropertyAccess::ReadWrite,
                change_mode: VehiclePropertyChangeMode::OnChange,
                config_array: vec![1, 2, 4, 8],
                ..Default::default()
            },
            ints(vec![GEAR_PARK]),
        ),
        PropertyDefinition::new(
            VehiclePropConfig {
                prop: props::DOOR_LOCK,
                access: VehiclePropertyAccess::ReadWrite,
                change_mode: VehiclePropertyChangeMode::OnChange,
                area_configs: vec![
                    door(areas::DOOR_ROW_1_LEFT),
                    door(areas::DOOR_ROW_1_RIGHT),
                    door(areas::DOOR_ROW_2_LEFT),
                    door(areas::DOOR_ROW_2_RIGHT),
                ],
                ..Default::default()
            },
            ints(vec![1]),
        ),
        PropertyDefinition::new(
            VehiclePropConfig {
                prop: props::HVAC_TEMPERATURE_SET,
                access: VehiclePropertyAccess::ReadWrite,
                change_mode: VehiclePropertyChangeMode::OnChange,
                area_configs: vec![
                    seat(areas::SEAT_ROW_1_LEFT),
                    seat(areas::SEAT_ROW_1_RIGHT),
                ],
                ..Default::default()
            },
            floats(vec![21.0]),
        ),
    ]
}

/// Elapsed realtime used to stamp values
fn now_nanos() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

type AreaKey = (i32, i32);

struct Inner {
    configs: RwLock<BTreeMap<i32, VehiclePropConfig>>,
    values: RwLock<HashMap<AreaKey, VehiclePropValue>>,
    on_change: RwLock<Option<PropertyChangeCallback>>,
    on_set_error: RwLock<Option<PropertySetErrorCallback>>,
    /// One sampling task per subscribed continuous property area
    samplers: Mutex<HashMap<AreaKey, JoinHandle<()>>>,
}

impl Inner {
    fn config(&self, prop: i32) -> Option<VehiclePropConfig> {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&prop)
            .cloned()
    }

    fn emit(&self, values: Vec<VehiclePropValue>) {
        if values.is_empty() {
            return;
        }
        let on_change = self.on_change.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = on_change.as_ref() {
            callback(values);
        }
    }

    fn get_one(&self, request: &GetValueRequest) -> GetValueResult {
        let GetValueRequest { request_id, prop } = request;
        let status = match self.config(prop.prop) {
            None => StatusCode::InvalidArg,
            Some(config) if !config.has_area(prop.area_id) => StatusCode::InvalidArg,
            Some(config) if !config.access_for_area(prop.area_id).is_readable() => {
                StatusCode::AccessDenied
            }
            Some(_) => {
                let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
                match values.get(&(prop.prop, prop.area_id)) {
                    Some(value) => {
                        return GetValueResult {
                            request_id: *request_id,
                            status: StatusCode::Ok,
                            prop: Some(value.clone()),
                        }
                    }
                    None => StatusCode::NotAvailable,
                }
            }
        };
        GetValueResult {
            request_id: *request_id,
            status,
            prop: None,
        }
    }

    /// Validate and store one value; returns the stored value when it changed
    fn set_one(&self, value: &VehiclePropValue) -> Result<Option<VehiclePropValue>, StatusCode> {
        let config = self.config(value.prop).ok_or(StatusCode::InvalidArg)?;
        if !config.has_area(value.area_id) {
            return Err(StatusCode::InvalidArg);
        }
        if !config.access_for_area(value.area_id).is_writable() {
            return Err(StatusCode::AccessDenied);
        }
        if let Some(area) = config.area_config(value.area_id) {
            check_range(area, &value.value)?;
        }

        let mut stored = value.clone();
        stored.timestamp = now_nanos();
        stored.status = VehiclePropertyStatus::Available;

        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let key = (value.prop, value.area_id);
        let changed = values
            .get(&key)
            .map_or(true, |old| old.value != stored.value || old.status != stored.status);
        values.insert(key, stored.clone());

        Ok(changed.then_some(stored))
    }

    fn stop_sampler(&self, key: AreaKey) -> bool {
        let handle = self
            .samplers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        match handle {
            Some(handle) => {
                handle.abort();
                debug!("Stopped sampling {:#x} area {:#x}", key.0, key.1);
                true
            }
            None => false,
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let samplers = self.samplers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in samplers.drain() {
            handle.abort();
        }
    }
}

fn check_range(area: &VehicleAreaConfig, value: &RawPropValues) -> Result<(), StatusCode> {
    if area.has_int32_range()
        && value
            .int32_values
            .iter()
            .any(|v| *v < area.min_int32_value || *v > area.max_int32_value)
    {
        return Err(StatusCode::InvalidArg);
    }
    if area.has_float_range()
        && value
            .float_values
            .iter()
            .any(|v| *v < area.min_float_value || *v > area.max_float_value)
    {
        return Err(StatusCode::InvalidArg);
    }
    Ok(())
}

/// Re-emit the current value of one area every `period` until aborted
async fn sample(inner: Weak<Inner>, key: AreaKey, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let current = inner
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(mut value) = current {
            value.timestamp = now_nanos();
            inner.emit(vec![value]);
        }
    }
}

/// In-memory `VehicleHardware` for development and tests.
///
/// Must be used inside a tokio runtime: completions and continuous sampling
/// run on spawned tasks.
pub struct FakeVehicleHardware {
    inner: Arc<Inner>,
}

impl FakeVehicleHardware {
    /// Hardware with the built-in property set
    pub fn new() -> Self {
        Self::with_properties(default_properties())
    }

    /// Hardware with exactly `definitions`; later definitions of the same
    /// property replace earlier ones
    pub fn with_properties(definitions: Vec<PropertyDefinition>) -> Self {
        let now = now_nanos();
        let mut configs: BTreeMap<i32, VehiclePropConfig> = BTreeMap::new();
        let mut values: HashMap<AreaKey, VehiclePropValue> = HashMap::new();

        for PropertyDefinition { config, initial } in definitions {
            values.retain(|(prop, _), _| *prop != config.prop);
            if let Some(initial) = initial {
                for area_id in config.area_ids() {
                    let value = VehiclePropValue {
                        timestamp: now,
                        area_id,
                        prop: config.prop,
                        status: VehiclePropertyStatus::Available,
                        value: initial.clone(),
                    };
                    values.insert((config.prop, area_id), value);
                }
            }
            configs.insert(config.prop, config);
        }

        info!("Fake vehicle hardware with {} properties", configs.len());

        Self {
            inner: Arc::new(Inner {
                configs: RwLock::new(configs),
                values: RwLock::new(values),
                on_change: RwLock::new(None),
                on_set_error: RwLock::new(None),
                samplers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Built-in properties followed by `extra`
    pub fn with_extra_properties(extra: Vec<PropertyDefinition>) -> Self {
        let mut definitions = default_properties();
        definitions.extend(extra);
        Self::with_properties(definitions)
    }

    /// Store a value as if the vehicle bus reported it, bypassing access
    /// checks, and emit it as a change event
    pub fn inject(&self, mut value: VehiclePropValue) {
        value.timestamp = now_nanos();
        self.inner
            .values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((value.prop, value.area_id), value.clone());
        self.inner.emit(vec![value]);
    }

    /// Report a failure of an earlier accepted write to the set-error callback
    pub fn report_set_error(&self, prop_id: i32, area_id: i32, error_code: StatusCode) {
        let on_set_error = self
            .inner
            .on_set_error
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = on_set_error.as_ref() {
            callback(vec![SetValueErrorEvent {
                error_code,
                prop_id,
                area_id,
            }]);
        }
    }

    /// Number of active continuous samplers
    pub fn active_samplers(&self) -> usize {
        self.inner
            .samplers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn start_sampler(&self, key: AreaKey, period: Duration) {
        let task = tokio::spawn(sample(Arc::downgrade(&self.inner), key, period));
        let previous = self
            .inner
            .samplers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, task);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!("Sampling {:#x} area {:#x} every {:?}", key.0, key.1, period);
    }

    fn dump_values(&self, prop: Option<i32>) -> String {
        let values = self
            .inner
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut sorted: Vec<&VehiclePropValue> = values
            .values()
            .filter(|v| prop.map_or(true, |p| v.prop == p))
            .collect();
        sorted.sort_by_key(|v| (v.prop, v.area_id));

        let mut out = String::new();
        for value in sorted {
            out.push_str(&format!(
                "{:#x} area {:#x}: {:?} @ {}\n",
                value.prop, value.area_id, value.value, value.timestamp
            ));
        }
        out
    }
}

impl Default for FakeVehicleHardware {
    fn default() -> Self {
        Self::new()
    }
}

const DUMP_HELP: &str = "Usage:\n\
    \x20 (no options)   dump every stored value\n\
    \x20 --list         list supported property ids\n\
    \x20 --get <id>...  dump the values of the given properties (decimal or 0x hex)\n";

/// Parse a property id given in decimal or `0x` hex
pub fn parse_prop_id(arg: &str) -> Option<i32> {
    match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok().map(|v| v as i32),
        None => arg.parse().ok(),
    }
}

#[async_trait]
impl VehicleHardware for FakeVehicleHardware {
    async fn get_all_property_configs(&self) -> Vec<VehiclePropConfig> {
        self.inner
            .configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    async fn set_values(
        &self,
        completion: ResultSender<SetValueResult>,
        requests: Vec<SetValueRequest>,
    ) -> StatusCode {
        let mut results = Vec::with_capacity(requests.len());
        let mut changed = Vec::new();
        for request in &requests {
            let status = match self.inner.set_one(&request.value) {
                Ok(Some(value)) => {
                    changed.push(value);
                    StatusCode::Ok
                }
                Ok(None) => StatusCode::Ok,
                Err(status) => {
                    debug!(
                        "Rejected set of {:#x} area {:#x}: {}",
                        request.value.prop, request.value.area_id, status
                    );
                    status
                }
            };
            results.push(SetValueResult {
                request_id: request.request_id,
                status,
            });
        }

        self.inner.emit(changed);
        tokio::spawn(async move {
            completion.complete(results);
        });
        StatusCode::Ok
    }

    async fn get_values(
        &self,
        completion: ResultSender<GetValueResult>,
        requests: Vec<GetValueRequest>,
    ) -> StatusCode {
        let results: Vec<GetValueResult> =
            requests.iter().map(|r| self.inner.get_one(r)).collect();
        tokio::spawn(async move {
            completion.complete(results);
        });
        StatusCode::Ok
    }

    async fn dump(&self, options: &[String]) -> DumpResult {
        match options.split_first() {
            None => DumpResult {
                caller_should_dump_state: true,
                buffer: self.dump_values(None),
            },
            Some((option, _)) if option == "--list" => {
                let configs = self
                    .inner
                    .configs
                    .read()
                    .unwrap_or_else(PoisonError::into_inner);
                let buffer = configs
                    .keys()
                    .map(|prop| format!("{:#x}\n", prop))
                    .collect();
                DumpResult {
                    caller_should_dump_state: false,
                    buffer,
                }
            }
            Some((option, ids)) if option == "--get" && !ids.is_empty() => {
                let mut buffer = String::new();
                for arg in ids {
                    match parse_prop_id(arg) {
                        Some(prop) if self.inner.config(prop).is_some() => {
                            buffer.push_str(&self.dump_values(Some(prop)))
                        }
                        Some(prop) => buffer.push_str(&format!("No property {:#x}\n", prop)),
                        None => buffer.push_str(&format!("Invalid property id: {}\n", arg)),
                    }
                }
                DumpResult {
                    caller_should_dump_state: false,
                    buffer,
                }
            }
            Some(_) => DumpResult {
                caller_should_dump_state: false,
                buffer: DUMP_HELP.to_string(),
            },
        }
    }

    async fn check_health(&self) -> StatusCode {
        StatusCode::Ok
    }

    async fn subscribe(&self, options: SubscribeOptions) -> StatusCode {
        let Some(config) = self.inner.config(options.prop_id) else {
            return StatusCode::InvalidArg;
        };
        let area_ids = if options.area_ids.is_empty() {
            config.area_ids()
        } else {
            options.area_ids.clone()
        };
        if area_ids.iter().any(|area| !config.has_area(*area)) {
            return StatusCode::InvalidArg;
        }
        if !options.sample_rate.is_finite() {
            return StatusCode::InvalidArg;
        }

        if config.change_mode != VehiclePropertyChangeMode::Continuous {
            // On-change events are always emitted
            return StatusCode::Ok;
        }
        if options.sample_rate <= 0.0 {
            for area_id in area_ids {
                self.inner.stop_sampler((config.prop, area_id));
            }
            return StatusCode::Ok;
        }

        let Some(period) = sample_period(&config, options.sample_rate) else {
            return StatusCode::InvalidArg;
        };
        for area_id in area_ids {
            self.start_sampler((config.prop, area_id), period);
        }
        StatusCode::Ok
    }

    async fn unsubscribe(&self, prop_id: i32, area_id: i32) -> StatusCode {
        if self.inner.config(prop_id).is_none() {
            return StatusCode::InvalidArg;
        }
        self.inner.stop_sampler((prop_id, area_id));
        StatusCode::Ok
    }

    async fn update_sample_rate(&self, prop_id: i32, area_id: i32, sample_rate: f32) -> StatusCode {
        let Some(config) = self.inner.config(prop_id) else {
            return StatusCode::InvalidArg;
        };
        if !config.has_area(area_id) || !sample_rate.is_finite() {
            return StatusCode::InvalidArg;
        }
        if config.change_mode != VehiclePropertyChangeMode::Continuous {
            return StatusCode::Ok;
        }

        if sample_rate <= 0.0 {
            self.inner.stop_sampler((prop_id, area_id));
            return StatusCode::Ok;
        }
        match sample_period(&config, sample_rate) {
            Some(period) => {
                self.start_sampler((prop_id, area_id), period);
                StatusCode::Ok
            }
            None => StatusCode::InvalidArg,
        }
    }

    fn register_on_property_change_event(&self, callback: PropertyChangeCallback) {
        *self
            .inner
            .on_change
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn register_on_property_set_error_event(&self, callback: PropertySetErrorCallback) {
        *self
            .inner
            .on_set_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }
}

/// Slowest sampling the fake supports, in Hz
const MIN_SAMPLE_RATE: f32 = 0.01;

/// Clamp `requested` Hz into the property's range and turn it into a tick
/// period. `None` when no usable period exists.
fn sample_period(config: &VehiclePropConfig, requested: f32) -> Option<Duration> {
    if !requested.is_finite() {
        return None;
    }
    let min = config.min_sample_rate.max(MIN_SAMPLE_RATE);
    let max = config.max_sample_rate.max(min);
    if requested < min || requested > max {
        warn!(
            "Sample rate {} for {:#x} clamped into [{}, {}]",
            requested, config.prop, min, max
        );
    }
    let rate = requested.clamp(min, max);
    Duration::try_from_secs_f32(1.0 / rate)
        .ok()
        .filter(|period| !period.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vhal_core_interface::{completion_channel, GLOBAL_AREA_ID};

    fn get_request(request_id: i64, prop: i32, area_id: i32) -> GetValueRequest {
        GetValueRequest {
            request_id,
            prop: VehiclePropValue::new(prop, area_id),
        }
    }

    async fn get(hardware: &FakeVehicleHardware, prop: i32, area_id: i32) -> GetValueResult {
        let (tx, rx) = completion_channel();
        assert_eq!(
            hardware
                .get_values(tx, vec![get_request(1, prop, area_id)])
                .await,
            StatusCode::Ok
        );
        rx.recv().await.unwrap().remove(0)
    }

    async fn set(hardware: &FakeVehicleHardware, value: VehiclePropValue) -> StatusCode {
        let (tx, rx) = completion_channel();
        let request = SetValueRequest {
            request_id: 7,
            value,
        };
        assert_eq!(hardware.set_values(tx, vec![request]).await, StatusCode::Ok);
        let results = rx.recv().await.unwrap();
        assert_eq!(results[0].request_id, 7);
        results[0].status
    }

    fn counting(hardware: &FakeVehicleHardware) -> Arc<Mutex<Vec<VehiclePropValue>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hardware.register_on_property_change_event(Box::new(
            move |values: Vec<VehiclePropValue>| {
                sink.lock().unwrap().extend(values);
            },
        ));
        seen
    }

    #[tokio::test]
    async fn test_default_properties_are_readable() {
        let hardware = FakeVehicleHardware::new();
        assert_eq!(hardware.get_all_property_configs().await.len(), 6);

        let make = get(&hardware, props::INFO_MAKE, GLOBAL_AREA_ID).await;
        assert_eq!(make.status, StatusCode::Ok);
        assert_eq!(make.prop.unwrap().value.string_value, "Toy Vehicle");

        let lock = get(&hardware, props::DOOR_LOCK, areas::DOOR_ROW_2_RIGHT).await;
        assert_eq!(lock.prop.unwrap().value.int32_values, vec![1]);
    }

    #[tokio::test]
    async fn test_get_rejects_unknown_property_and_area() {
        let hardware = FakeVehicleHardware::new();

        let unknown = get(&hardware, 0x0bad, GLOBAL_AREA_ID).await;
        assert_eq!(unknown.status, StatusCode::InvalidArg);
        assert!(unknown.prop.is_none());

        let bad_area = get(&hardware, props::DOOR_LOCK, 0x2).await;
        assert_eq!(bad_area.status, StatusCode::InvalidArg);
    }

    #[tokio::test]
    async fn test_get_without_value_is_not_available() {
        let hardware = FakeVehicleHardware::with_properties(vec![PropertyDefinition {
            config: VehiclePropConfig {
                prop: 0x21400101,
                access: VehiclePropertyAccess::ReadWrite,
                ..Default::default()
            },
            initial: None,
        }]);

        let result = get(&hardware, 0x21400101, GLOBAL_AREA_ID).await;
        assert_eq!(result.status, StatusCode::NotAvailable);
    }

    #[tokio::test]
    async fn test_set_validates_access_and_range() {
        let hardware = FakeVehicleHardware::new();

        let speed = VehiclePropValue::new(props::PERF_VEHICLE_SPEED, 0).with_float(vec![10.0]);
        assert_eq!(set(&hardware, speed).await, StatusCode::AccessDenied);

        let unknown = VehiclePropValue::new(0x0bad, 0).with_int32(vec![1]);
        assert_eq!(set(&hardware, unknown).await, StatusCode::InvalidArg);

        let too_hot = VehiclePropValue::new(props::HVAC_TEMPERATURE_SET, areas::SEAT_ROW_1_LEFT)
            .with_float(vec![35.0]);
        assert_eq!(set(&hardware, too_hot).await, StatusCode::InvalidArg);

        let ok = VehiclePropValue::new(props::HVAC_TEMPERATURE_SET, areas::SEAT_ROW_1_LEFT)
            .with_float(vec![23.5]);
        assert_eq!(set(&hardware, ok).await, StatusCode::Ok);

        let stored = get(&hardware, props::HVAC_TEMPERATURE_SET, areas::SEAT_ROW_1_LEFT).await;
        assert_eq!(stored.prop.unwrap().value.float_values, vec![23.5]);
        let other = get(&hardware, props::HVAC_TEMPERATURE_SET, areas::SEAT_ROW_1_RIGHT).await;
        assert_eq!(other.prop.unwrap().value.float_values, vec![21.0]);
    }

    #[tokio::test]
    async fn test_set_emits_change_only_when_value_changes() {
        let hardware = FakeVehicleHardware::new();
        let seen = counting(&hardware);

        let unlock = VehiclePropValue::new(props::DOOR_LOCK, areas::DOOR_ROW_1_LEFT)
            .with_int32(vec![0]);
        assert_eq!(set(&hardware, unlock.clone()).await, StatusCode::Ok);
        assert_eq!(set(&hardware, unlock).await, StatusCode::Ok);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].area_id, areas::DOOR_ROW_1_LEFT);
        assert_eq!(seen[0].value.int32_values, vec![0]);
        assert!(seen[0].timestamp > 0);
    }

    #[tokio::test]
    async fn test_batch_results_match_request_ids() {
        let hardware = FakeVehicleHardware::new();
        let (tx, rx) = completion_channel();
        let requests: Vec<GetValueRequest> = (0..6)
            .map(|i| get_request(100 + i, props::GEAR_SELECTION, GLOBAL_AREA_ID))
            .collect();
        hardware.get_values(tx, requests).await;

        let mut ids: Vec<i64> = rx.recv().await.unwrap().iter().map(|r| r.request_id).collect();
        ids.sort();
        assert_eq!(ids, (100..106).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_subscription_samples_at_clamped_rate() {
        let hardware = FakeVehicleHardware::new();
        let seen = counting(&hardware);

        let options = SubscribeOptions {
            prop_id: props::PERF_VEHICLE_SPEED,
            sample_rate: 100.0,
            ..Default::default()
        };
        assert_eq!(hardware.subscribe(options).await, StatusCode::Ok);
        assert_eq!(hardware.active_samplers(), 1);

        // Clamped to 10 Hz: first tick is immediate, then every 100 ms.
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(seen.lock().unwrap().len(), 5);

        assert_eq!(
            hardware
                .unsubscribe(props::PERF_VEHICLE_SPEED, GLOBAL_AREA_ID)
                .await,
            StatusCode::Ok
        );
        assert_eq!(hardware.active_samplers(), 0);
        let count = seen.lock().unwrap().len();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(seen.lock().unwrap().len(), count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_replaces_sampler() {
        let hardware = FakeVehicleHardware::new();
        let seen = counting(&hardware);

        let options = |rate| SubscribeOptions {
            prop_id: props::PERF_ODOMETER,
            area_ids: vec![GLOBAL_AREA_ID],
            sample_rate: rate,
            ..Default::default()
        };
        hardware.subscribe(options(1.0)).await;
        hardware.subscribe(options(10.0)).await;
        assert_eq!(hardware.active_samplers(), 1);

        tokio::time::sleep(Duration::from_millis(950)).await;
        assert_eq!(seen.lock().unwrap().len(), 10);

        assert_eq!(
            hardware
                .update_sample_rate(props::PERF_ODOMETER, GLOBAL_AREA_ID, 0.0)
                .await,
            StatusCode::Ok
        );
        assert_eq!(hardware.active_samplers(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_sample_rates_are_rejected() {
        let hardware = FakeVehicleHardware::new();

        for rate in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let options = SubscribeOptions {
                prop_id: props::PERF_VEHICLE_SPEED,
                sample_rate: rate,
                ..Default::default()
            };
            assert_eq!(hardware.subscribe(options).await, StatusCode::InvalidArg);
            assert_eq!(
                hardware
                    .update_sample_rate(props::PERF_VEHICLE_SPEED, GLOBAL_AREA_ID, rate)
                    .await,
                StatusCode::InvalidArg
            );
        }
        assert_eq!(hardware.active_samplers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_sample_rate_uses_slowest_period() {
        let hardware = FakeVehicleHardware::with_properties(vec![PropertyDefinition::new(
            VehiclePropConfig {
                prop: 0x21600101,
                access: VehiclePropertyAccess::Read,
                change_mode: VehiclePropertyChangeMode::Continuous,
                min_sample_rate: 0.0,
                max_sample_rate: 5.0,
                ..Default::default()
            },
            RawPropValues {
                float_values: vec![1.0],
                ..Default::default()
            },
        )]);
        let seen = counting(&hardware);

        assert_eq!(
            hardware
                .update_sample_rate(0x21600101, GLOBAL_AREA_ID, 1e-30)
                .await,
            StatusCode::Ok
        );
        assert_eq!(hardware.active_samplers(), 1);

        // 0.01 Hz: one immediate tick, the next after 100 s.
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
        tokio::time::sleep(Duration::from_secs(51)).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_sample_period_edges() {
        let config = |min, max| VehiclePropConfig {
            min_sample_rate: min,
            max_sample_rate: max,
            ..Default::default()
        };

        let fastest = sample_period(&config(1.0, 10.0), 100.0).unwrap();
        assert!((fastest.as_secs_f64() - 0.1).abs() < 1e-6, "{:?}", fastest);
        let slowest = sample_period(&config(0.0, 0.0), 1e-30).unwrap();
        assert!((slowest.as_secs_f64() - 100.0).abs() < 1e-3, "{:?}", slowest);
        assert_eq!(sample_period(&config(1.0, 10.0), f32::NAN), None);
        assert_eq!(sample_period(&config(f32::INFINITY, 0.0), 1.0), None);
        assert_eq!(sample_period(&config(0.0, f32::MAX), f32::MAX), None);
    }

    #[tokio::test]
    async fn test_subscribe_on_change_property_is_accepted() {
        let hardware = FakeVehicleHardware::new();
        let options = SubscribeOptions {
            prop_id: props::DOOR_LOCK,
            ..Default::default()
        };
        assert_eq!(hardware.subscribe(options).await, StatusCode::Ok);
        assert_eq!(hardware.active_samplers(), 0);

        let unknown = SubscribeOptions {
            prop_id: 0x0bad,
            ..Default::default()
        };
        assert_eq!(hardware.subscribe(unknown).await, StatusCode::InvalidArg);
    }

    #[tokio::test]
    async fn test_dump_options() {
        let hardware = FakeVehicleHardware::new();

        let all = hardware.dump(&[]).await;
        assert!(all.caller_should_dump_state);
        assert!(all.buffer.contains("0x11100101"));

        let list = hardware.dump(&["--list".to_string()]).await;
        assert!(!list.caller_should_dump_state);
        assert_eq!(list.buffer.lines().count(), 6);

        let one = hardware
            .dump(&["--get".to_string(), "0x16200b02".to_string()])
            .await;
        assert_eq!(one.buffer.lines().count(), 4);

        let help = hardware.dump(&["--bogus".to_string()]).await;
        assert!(help.buffer.starts_with("Usage:"));
    }

    #[tokio::test]
    async fn test_inject_and_set_error_reach_callbacks() {
        let hardware = FakeVehicleHardware::new();
        let seen = counting(&hardware);

        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        hardware.register_on_property_set_error_event(Box::new(move |events: Vec<_>| {
            counter.fetch_add(events.len(), Ordering::SeqCst);
        }));

        hardware.inject(VehiclePropValue::new(props::PERF_VEHICLE_SPEED, 0).with_float(vec![27.0]));
        hardware.report_set_error(props::GEAR_SELECTION, 0, StatusCode::TryAgain);

        assert_eq!(seen.lock().unwrap()[0].value.float_values, vec![27.0]);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        let speed = get(&hardware, props::PERF_VEHICLE_SPEED, GLOBAL_AREA_ID).await;
        assert_eq!(speed.prop.unwrap().value.float_values, vec![27.0]);
    }

    #[test]
    fn test_parse_prop_id() {
        assert_eq!(parse_prop_id("0x11600207"), Some(0x11600207));
        assert_eq!(parse_prop_id("291504647"), Some(0x11600207));
        assert_eq!(parse_prop_id("speed"), None);
    }

    #[test]
    fn test_extra_properties_override_defaults() {
        let hardware = FakeVehicleHardware::with_extra_properties(vec![PropertyDefinition {
            config: VehiclePropConfig {
                prop: props::INFO_MAKE,
                access: VehiclePropertyAccess::Read,
                ..Default::default()
            },
            initial: Some(RawPropValues {
                string_value: "Other".to_string(),
                ..Default::default()
            }),
        }]);
        let values = hardware.inner.values.read().unwrap();
        assert_eq!(
            values[&(props::INFO_MAKE, GLOBAL_AREA_ID)].value.string_value,
            "Other"
        );
    }
}
