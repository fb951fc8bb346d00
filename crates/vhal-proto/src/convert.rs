//! Wire codec between the in-process property model and protobuf messages.
//!
//! Every conversion is total: enum values a peer sends that this side does
//! not know decode to a conservative default (`InternalError` for status
//! codes) instead of failing the whole message.

use crate::vhal::v1 as proto;
use vhal_core_interface as hal;

impl From<hal::VehicleAreaConfig> for proto::VehicleAreaConfig {
    fn from(area: hal::VehicleAreaConfig) -> Self {
        Self {
            area_id: area.area_id,
            access: area.access as i32,
            min_int32_value: area.min_int32_value,
            max_int32_value: area.max_int32_value,
            min_int64_value: area.min_int64_value,
            max_int64_value: area.max_int64_value,
            min_float_value: area.min_float_value,
            max_float_value: area.max_float_value,
        }
    }
}

impl From<proto::VehicleAreaConfig> for hal::VehicleAreaConfig {
    fn from(area: proto::VehicleAreaConfig) -> Self {
        Self {
            area_id: area.area_id,
            access: hal::VehiclePropertyAccess::from_i32(area.access),
            min_int32_value: area.min_int32_value,
            max_int32_value: area.max_int32_value,
            min_int64_value: area.min_int64_value,
            max_int64_value: area.max_int64_value,
            min_float_value: area.min_float_value,
            max_float_value: area.max_float_value,
        }
    }
}

impl From<hal::VehiclePropConfig> for proto::VehiclePropConfig {
    fn from(config: hal::VehiclePropConfig) -> Self {
        Self {
            prop: config.prop,
            access: config.access as i32,
            change_mode: config.change_mode as i32,
            area_configs: config.area_configs.into_iter().map(Into::into).collect(),
            config_array: config.config_array,
            config_string: config.config_string,
            min_sample_rate: config.min_sample_rate,
            max_sample_rate: config.max_sample_rate,
        }
    }
}

impl From<proto::VehiclePropConfig> for hal::VehiclePropConfig {
    fn from(config: proto::VehiclePropConfig) -> Self {
        Self {
            prop: config.prop,
            access: hal::VehiclePropertyAccess::from_i32(config.access),
            change_mode: hal::VehiclePropertyChangeMode::from_i32(config.change_mode),
            area_configs: config.area_configs.into_iter().map(Into::into).collect(),
            config_array: config.config_array,
            config_string: config.config_string,
            min_sample_rate: config.min_sample_rate,
            max_sample_rate: config.max_sample_rate,
        }
    }
}

impl From<hal::VehiclePropValue> for proto::VehiclePropValue {
    fn from(value: hal::VehiclePropValue) -> Self {
        Self {
            timestamp: value.timestamp,
            area_id: value.area_id,
            prop: value.prop,
            status: value.status as i32,
            int32_values: value.value.int32_values,
            float_values: value.value.float_values,
            int64_values: value.value.int64_values,
            byte_values: value.value.byte_values,
            string_value: value.value.string_value,
        }
    }
}

impl From<proto::VehiclePropValue> for hal::VehiclePropValue {
    fn from(value: proto::VehiclePropValue) -> Self {
        Self {
            timestamp: value.timestamp,
            area_id: value.area_id,
            prop: value.prop,
            status: hal::VehiclePropertyStatus::from_i32(value.status),
            value: hal::RawPropValues {
                int32_values: value.int32_values,
                float_values: value.float_values,
                int64_values: value.int64_values,
                byte_values: value.byte_values,
                string_value: value.string_value,
            },
        }
    }
}

/// Encode one batch of changed values
pub fn encode_values(values: Vec<hal::VehiclePropValue>) -> proto::VehiclePropValues {
    proto::VehiclePropValues {
        values: values.into_iter().map(Into::into).collect(),
    }
}

/// Decode one batch of changed values
pub fn decode_values(values: proto::VehiclePropValues) -> Vec<hal::VehiclePropValue> {
    values.values.into_iter().map(Into::into).collect()
}

impl From<hal::SetValueRequest> for proto::VehiclePropValueRequest {
    fn from(request: hal::SetValueRequest) -> Self {
        Self {
            request_id: request.request_id,
            value: Some(request.value.into()),
        }
    }
}

impl From<proto::VehiclePropValueRequest> for hal::SetValueRequest {
    fn from(request: proto::VehiclePropValueRequest) -> Self {
        Self {
            request_id: request.request_id,
            value: request.value.map(Into::into).unwrap_or_default(),
        }
    }
}

impl From<hal::GetValueRequest> for proto::VehiclePropValueRequest {
    fn from(request: hal::GetValueRequest) -> Self {
        Self {
            request_id: request.request_id,
            value: Some(request.prop.into()),
        }
    }
}

impl From<proto::VehiclePropValueRequest> for hal::GetValueRequest {
    fn from(request: proto::VehiclePropValueRequest) -> Self {
        Self {
            request_id: request.request_id,
            prop: request.value.map(Into::into).unwrap_or_default(),
        }
    }
}

impl From<hal::SetValueResult> for proto::SetValueResult {
    fn from(result: hal::SetValueResult) -> Self {
        Self {
            request_id: result.request_id,
            status: result.status.as_i32(),
        }
    }
}

impl From<proto::SetValueResult> for hal::SetValueResult {
    fn from(result: proto::SetValueResult) -> Self {
        Self {
            request_id: result.request_id,
            status: hal::StatusCode::from_i32(result.status),
        }
    }
}

impl From<hal::GetValueResult> for proto::GetValueResult {
    fn from(result: hal::GetValueResult) -> Self {
        Self {
            request_id: result.request_id,
            status: result.status.as_i32(),
            value: result.prop.map(Into::into),
        }
    }
}

impl From<proto::GetValueResult> for hal::GetValueResult {
    fn from(result: proto::GetValueResult) -> Self {
        Self {
            request_id: result.request_id,
            status: hal::StatusCode::from_i32(result.status),
            prop: result.value.map(Into::into),
        }
    }
}

impl From<hal::SubscribeOptions> for proto::SubscribeOptions {
    fn from(options: hal::SubscribeOptions) -> Self {
        Self {
            prop_id: options.prop_id,
            area_ids: options.area_ids,
            sample_rate: options.sample_rate,
            resolution: options.resolution,
            enable_variable_update_rate: options.enable_variable_update_rate,
        }
    }
}

impl From<proto::SubscribeOptions> for hal::SubscribeOptions {
    fn from(options: proto::SubscribeOptions) -> Self {
        Self {
            prop_id: options.prop_id,
            area_ids: options.area_ids,
            sample_rate: options.sample_rate,
            resolution: options.resolution,
            enable_variable_update_rate: options.enable_variable_update_rate,
        }
    }
}

impl From<hal::DumpResult> for proto::DumpResult {
    fn from(result: hal::DumpResult) -> Self {
        Self {
            caller_should_dump_state: result.caller_should_dump_state,
            buffer: result.buffer,
        }
    }
}

impl From<proto::DumpResult> for hal::DumpResult {
    fn from(result: proto::DumpResult) -> Self {
        Self {
            caller_should_dump_state: result.caller_should_dump_state,
            buffer: result.buffer,
        }
    }
}

impl From<hal::StatusCode> for proto::VehicleHalCallStatus {
    fn from(status: hal::StatusCode) -> Self {
        Self {
            status_code: status.as_i32(),
        }
    }
}

impl From<proto::VehicleHalCallStatus> for hal::StatusCode {
    fn from(status: proto::VehicleHalCallStatus) -> Self {
        hal::StatusCode::from_i32(status.status_code)
    }
}
