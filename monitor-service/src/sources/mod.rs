pub mod blynk;
pub mod channel;
pub mod power;

pub use blynk::BlynkClient;
pub use channel::ChannelSource;
pub use power::EnergyFromPower;

use time::OffsetDateTime;

/// Where a reading comes from: a Blynk device token plus a virtual pin.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DeviceAddress {
    pub auth_token: String,
    pub pin: String,
}

impl DeviceAddress {
    pub fn new(auth_token: impl Into<String>, pin: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            pin: pin.into(),
        }
    }

    pub fn with_pin(&self, pin: impl Into<String>) -> Self {
        Self {
            auth_token: self.auth_token.clone(),
            pin: pin.into(),
        }
    }
}

// Tokens are credentials; keep them out of logs.
impl std::fmt::Debug for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAddress")
            .field("auth_token", &"<redacted>")
            .field("pin", &self.pin)
            .finish()
    }
}

/// One successful fetch.
///
/// `value` is what the accumulator adds (kWh). `power_w` is set when the
/// reading was derived from an instantaneous power channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub ts: OffsetDateTime,
    pub value: f64,
    pub power_w: Option<f64>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    #[error("device source unreachable: {0}")]
    Unreachable(String),
    #[error("device source timed out")]
    Timeout,
    #[error("bad response from device source: {0}")]
    BadResponse(String),
}

impl SampleError {
    /// Short label for the `reason` metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::Timeout => "timeout",
            Self::BadResponse(_) => "bad_response",
        }
    }
}

#[async_trait::async_trait]
pub trait Sampler: Send + Sync {
    async fn fetch(&self, address: &DeviceAddress) -> Result<Reading, SampleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Off = 0,
    On = 1,
}

impl TryFrom<i64> for SwitchState {
    type Error = i64;

    fn try_from(v: i64) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            other => Err(other),
        }
    }
}

/// On/off control of a device output pin.
#[async_trait::async_trait]
pub trait DeviceControl: Send + Sync {
    async fn set_state(&self, address: &DeviceAddress, state: SwitchState)
        -> Result<(), SampleError>;
}

#[async_trait::async_trait]
impl<T: Sampler + ?Sized> Sampler for std::sync::Arc<T> {
    async fn fetch(&self, address: &DeviceAddress) -> Result<Reading, SampleError> {
        (**self).fetch(address).await
    }
}
