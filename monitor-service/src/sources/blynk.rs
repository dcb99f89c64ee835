use std::time::Duration;

use reqwest::Url;
use time::OffsetDateTime;
use tracing::debug;

use super::{DeviceAddress, DeviceControl, Reading, SampleError, Sampler, SwitchState};

/// Regional endpoint used by the deployed devices.
pub const DEFAULT_BASE_URL: &str = "https://blr1.blynk.cloud/external/api";

/// HTTP client for the Blynk external API.
///
/// Reads are `GET {base}/get?token=..&V2` returning the pin value as plain
/// text; writes are `GET {base}/update?token=..&V4=1`.
#[derive(Debug, Clone)]
pub struct BlynkClient {
    client: reqwest::Client,
    base_url: String,
}

impl BlynkClient {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, SampleError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SampleError::Unreachable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, op: &str, query: &str) -> Result<Url, SampleError> {
        let mut url = Url::parse(&format!("{}/{op}", self.base_url))
            .map_err(|e| SampleError::Unreachable(format!("invalid Blynk base url: {e}")))?;
        url.set_query(Some(query));
        Ok(url)
    }

    async fn get_text(&self, url: Url) -> Result<String, SampleError> {
        let response = self.client.get(url).send().await.map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SampleError::BadResponse(format!("status {status}")));
        }

        response.text().await.map_err(map_transport)
    }

    /// Fetch the raw numeric value of one virtual pin.
    pub async fn read_pin(&self, address: &DeviceAddress) -> Result<f64, SampleError> {
        let url = self.endpoint("get", &format!("token={}&{}", address.auth_token, address.pin))?;
        let body = self.get_text(url).await?;
        parse_pin_value(&body)
    }
}

fn map_transport(e: reqwest::Error) -> SampleError {
    if e.is_timeout() {
        SampleError::Timeout
    } else {
        SampleError::Unreachable(e.to_string())
    }
}

/// Parse a pin body. Blynk returns either `231.4` or a one-element JSON
/// array such as `["231.4"]` for multi-value pins.
fn parse_pin_value(body: &str) -> Result<f64, SampleError> {
    let trimmed = body
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
        .trim_matches('"');

    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| SampleError::BadResponse(format!("non-numeric body '{}'", body.trim())))
}

#[async_trait::async_trait]
impl Sampler for BlynkClient {
    async fn fetch(&self, address: &DeviceAddress) -> Result<Reading, SampleError> {
        let value = self.read_pin(address).await?;
        debug!(pin = %address.pin, value, "blynk pin read");
        Ok(Reading {
            ts: OffsetDateTime::now_utc(),
            value,
            power_w: None,
        })
    }
}

#[async_trait::async_trait]
impl DeviceControl for BlynkClient {
    async fn set_state(
        &self,
        address: &DeviceAddress,
        state: SwitchState,
    ) -> Result<(), SampleError> {
        let url = self.endpoint(
            "update",
            &format!("token={}&{}={}", address.auth_token, address.pin, state as i64),
        )?;
        self.get_text(url).await.map(|_| ())
    }
}
