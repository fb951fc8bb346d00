//! Client settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for `GrpcVehicleHardware`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Proxy address as `host:port`, or a full `http://` URI
    pub service_addr: String,

    /// Delay before the first attempt to reopen a lost value stream
    #[serde(with = "millis")]
    pub reconnect_backoff: Duration,

    /// Upper bound the reconnect delay doubles up to
    #[serde(with = "millis")]
    pub max_reconnect_backoff: Duration,

    /// Deadline attached to every unary call; none by default
    #[serde(with = "opt_millis")]
    pub rpc_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(service_addr: impl Into<String>) -> Self {
        Self {
            service_addr: service_addr.into(),
            ..Default::default()
        }
    }

    /// The address as a URI tonic can dial
    pub fn endpoint_uri(&self) -> String {
        if self.service_addr.contains("://") {
            self.service_addr.clone()
        } else {
            format!("http://{}", self.service_addr)
        }
    }

    /// Delay to use after `current`
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_reconnect_backoff)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_addr: "127.0.0.1:50051".to_string(),
            reconnect_backoff: Duration::from_millis(100),
            max_reconnect_backoff: Duration::from_secs(1),
            rpc_timeout: None,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
