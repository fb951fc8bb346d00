//! Vehicle property data model.
//!
//! These are plain values: they are copied across the RPC boundary and never
//! shared between the proxy and its clients.

use serde::{Deserialize, Serialize};

use crate::status::StatusCode;

/// Area id used by global (non-zoned) properties
pub const GLOBAL_AREA_ID: i32 = 0;

/// Access mode of a property or of one of its areas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum VehiclePropertyAccess {
    #[default]
    None = 0,
    Read = 1,
    Write = 2,
    ReadWrite = 3,
}

impl VehiclePropertyAccess {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => VehiclePropertyAccess::Read,
            2 => VehiclePropertyAccess::Write,
            3 => VehiclePropertyAccess::ReadWrite,
            _ => VehiclePropertyAccess::None,
        }
    }

    pub fn is_readable(self) -> bool {
        matches!(
            self,
            VehiclePropertyAccess::Read | VehiclePropertyAccess::ReadWrite
        )
    }

    pub fn is_writable(self) -> bool {
        matches!(
            self,
            VehiclePropertyAccess::Write | VehiclePropertyAccess::ReadWrite
        )
    }
}

/// How a property reports changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum VehiclePropertyChangeMode {
    /// Never changes after boot
    #[default]
    Static = 0,
    /// Reported when the value changes
    OnChange = 1,
    /// Sampled at a client-requested rate
    Continuous = 2,
}

impl VehiclePropertyChangeMode {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => VehiclePropertyChangeMode::OnChange,
            2 => VehiclePropertyChangeMode::Continuous,
            _ => VehiclePropertyChangeMode::Static,
        }
    }
}

/// Availability of a reported value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum VehiclePropertyStatus {
    #[default]
    Available = 0,
    Unavailable = 1,
    Error = 2,
}

impl VehiclePropertyStatus {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => VehiclePropertyStatus::Unavailable,
            2 => VehiclePropertyStatus::Error,
            _ => VehiclePropertyStatus::Available,
        }
    }
}

/// Per-area limits and access of a property
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleAreaConfig {
    pub area_id: i32,
    /// Overrides the property-level access when not `None`
    pub access: VehiclePropertyAccess,
    pub min_int32_value: i32,
    pub max_int32_value: i32,
    pub min_int64_value: i64,
    pub max_int64_value: i64,
    pub min_float_value: f32,
    pub max_float_value: f32,
}

impl VehicleAreaConfig {
    pub fn new(area_id: i32) -> Self {
        Self {
            area_id,
            ..Default::default()
        }
    }

    pub fn has_int32_range(&self) -> bool {
        self.min_int32_value != 0 || self.max_int32_value != 0
    }

    pub fn has_float_range(&self) -> bool {
        self.min_float_value != 0.0 || self.max_float_value != 0.0
    }
}

/// Static descriptor of one vehicle property
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VehiclePropConfig {
    pub prop: i32,
    pub access: VehiclePropertyAccess,
    pub change_mode: VehiclePropertyChangeMode,
    pub area_configs: Vec<VehicleAreaConfig>,
    pub config_array: Vec<i32>,
    pub config_string: String,
    /// Lower sample rate bound in Hz, continuous properties only
    pub min_sample_rate: f32,
    /// Upper sample rate bound in Hz, continuous properties only
    pub max_sample_rate: f32,
}

impl VehiclePropConfig {
    /// Area ids of this property; global properties have the single area 0
    pub fn area_ids(&self) -> Vec<i32> {
        if self.area_configs.is_empty() {
            vec![GLOBAL_AREA_ID]
        } else {
            self.area_configs.iter().map(|a| a.area_id).collect()
        }
    }

    pub fn area_config(&self, area_id: i32) -> Option<&VehicleAreaConfig> {
        self.area_configs.iter().find(|a| a.area_id == area_id)
    }

    /// Effective access for one area
    pub fn access_for_area(&self, area_id: i32) -> VehiclePropertyAccess {
        match self.area_config(area_id) {
            Some(area) if area.access != VehiclePropertyAccess::None => area.access,
            _ => self.access,
        }
    }

    pub fn has_area(&self, area_id: i32) -> bool {
        if self.area_configs.is_empty() {
            area_id == GLOBAL_AREA_ID
        } else {
            self.area_config(area_id).is_some()
        }
    }
}

/// Raw payload of a property value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPropValues {
    pub int32_values: Vec<i32>,
    pub float_values: Vec<f32>,
    pub int64_values: Vec<i64>,
    pub byte_values: Vec<u8>,
    pub string_value: String,
}

/// Timestamped snapshot of one property/area pair
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VehiclePropValue {
    /// Elapsed realtime in nanoseconds
    pub timestamp: i64,
    pub area_id: i32,
    pub prop: i32,
    pub status: VehiclePropertyStatus,
    pub value: RawPropValues,
}

impl VehiclePropValue {
    /// Identity of a value without payload, used as a get request
    pub fn new(prop: i32, area_id: i32) -> Self {
        Self {
            prop,
            area_id,
            ..Default::default()
        }
    }

    pub fn with_int32(mut self, values: Vec<i32>) -> Self {
        self.value.int32_values = values;
        self
    }

    pub fn with_float(mut self, values: Vec<f32>) -> Self {
        self.value.float_values = values;
        self
    }

    pub fn with_int64(mut self, values: Vec<i64>) -> Self {
        self.value.int64_values = values;
        self
    }

    pub fn with_string(mut self, value: impl Into<String>) -> Self {
        self.value.string_value = value.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetValueRequest {
    /// Caller-assigned id echoed in the matching result
    pub request_id: i64,
    pub value: VehiclePropValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetValueResult {
    pub request_id: i64,
    pub status: StatusCode,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetValueRequest {
    pub request_id: i64,
    /// Property and area to read; the payload is ignored
    pub prop: VehiclePropValue,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetValueResult {
    pub request_id: i64,
    pub status: StatusCode,
    /// Present only when `status` is `Ok`
    pub prop: Option<VehiclePropValue>,
}

/// Desired event cadence for one property
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribeOptions {
    pub prop_id: i32,
    /// Empty means every area of the property
    pub area_ids: Vec<i32>,
    /// Hz; 0 for on-change properties
    pub sample_rate: f32,
    pub resolution: f32,
    pub enable_variable_update_rate: bool,
}

/// Out-of-band failure of a previously accepted set request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetValueErrorEvent {
    pub error_code: StatusCode,
    pub prop_id: i32,
    pub area_id: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DumpResult {
    /// Whether the caller should append its own state to the output
    pub caller_should_dump_state: bool,
    pub buffer: String,
}
