//! Status codes reported by vehicle hardware.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a vehicle hardware operation.
///
/// The numeric values are part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum StatusCode {
    #[default]
    Ok = 0,
    /// Try again later, the hardware is temporarily busy
    TryAgain = 1,
    InvalidArg = 2,
    /// The property is currently unavailable
    NotAvailable = 3,
    AccessDenied = 4,
    InternalError = 5,
    NotAvailableDisabled = 6,
    NotAvailableSpeedLow = 7,
    NotAvailableSpeedHigh = 8,
    NotAvailablePoorVisibility = 9,
    NotAvailableSafety = 10,
}

impl StatusCode {
    /// Decode a raw status value.
    ///
    /// Values outside the known range are reported as `InternalError`, a peer
    /// speaking a newer protocol revision must not be mistaken for success.
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => StatusCode::Ok,
            1 => StatusCode::TryAgain,
            2 => StatusCode::InvalidArg,
            3 => StatusCode::NotAvailable,
            4 => StatusCode::AccessDenied,
            5 => StatusCode::InternalError,
            6 => StatusCode::NotAvailableDisabled,
            7 => StatusCode::NotAvailableSpeedLow,
            8 => StatusCode::NotAvailableSpeedHigh,
            9 => StatusCode::NotAvailablePoorVisibility,
            10 => StatusCode::NotAvailableSafety,
            _ => StatusCode::InternalError,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::TryAgain => "TRY_AGAIN",
            StatusCode::InvalidArg => "INVALID_ARG",
            StatusCode::NotAvailable => "NOT_AVAILABLE",
            StatusCode::AccessDenied => "ACCESS_DENIED",
            StatusCode::InternalError => "INTERNAL_ERROR",
            StatusCode::NotAvailableDisabled => "NOT_AVAILABLE_DISABLED",
            StatusCode::NotAvailableSpeedLow => "NOT_AVAILABLE_SPEED_LOW",
            StatusCode::NotAvailableSpeedHigh => "NOT_AVAILABLE_SPEED_HIGH",
            StatusCode::NotAvailablePoorVisibility => "NOT_AVAILABLE_POOR_VISIBILITY",
            StatusCode::NotAvailableSafety => "NOT_AVAILABLE_SAFETY",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<StatusCode> for i32 {
    fn from(status: StatusCode) -> Self {
        status.as_i32()
    }
}
