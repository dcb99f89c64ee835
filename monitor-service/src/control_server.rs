//! HTTP surface for inspecting and driving individual devices.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use energy_client::domain::{Bill, SlabCharge};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    accumulator::{Accumulator, AccumulatorState},
    advice::PowerLevel,
    sources::{DeviceAddress, DeviceControl, SampleError, Sampler, SwitchState},
    store::EnergyRepository,
    usage::{self, UsageBucket, UsagePeriod},
};

/// A device reachable from the control API.
pub struct ControlledDevice {
    pub accumulator: Arc<Accumulator>,
    pub power_address: DeviceAddress,
    pub switch_address: DeviceAddress,
    pub voltage_address: DeviceAddress,
    pub current_address: DeviceAddress,
}

#[derive(Clone)]
pub struct ControlState {
    devices: Arc<HashMap<i64, ControlledDevice>>,
    control: Arc<dyn DeviceControl>,
    pins: Arc<dyn Sampler>,
    repository: Arc<dyn EnergyRepository>,
    request_timeout: Duration,
    utc_offset: UtcOffset,
}

impl ControlState {
    /// `pins` must return the raw value of a device pin, e.g. watts for the
    /// power address. Usage buckets are cut at `utc_offset`.
    pub fn new(
        devices: HashMap<i64, ControlledDevice>,
        control: Arc<dyn DeviceControl>,
        pins: Arc<dyn Sampler>,
        repository: Arc<dyn EnergyRepository>,
        request_timeout: Duration,
        utc_offset: UtcOffset,
    ) -> Self {
        Self {
            devices: Arc::new(devices),
            control,
            pins,
            repository,
            request_timeout,
            utc_offset,
        }
    }

    fn device(&self, id: i64) -> Result<&ControlledDevice, StatusCode> {
        self.devices.get(&id).ok_or(StatusCode::NOT_FOUND)
    }

    async fn read_pin(&self, address: &DeviceAddress) -> Result<f64, SampleError> {
        tokio::time::timeout(self.request_timeout, self.pins.fetch(address))
            .await
            .unwrap_or(Err(SampleError::Timeout))
            .map(|r| r.value)
    }
}

fn upstream_status(e: &SampleError) -> StatusCode {
    match e {
        SampleError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TotalResponse {
    pub device_id: i64,
    pub total_kwh: f64,
    pub running: bool,
}

#[derive(Debug, Deserialize)]
pub struct SwitchRequest {
    pub state: i64,
}

#[derive(Debug, Serialize)]
pub struct SwitchStateResponse {
    pub state: i64,
}

#[derive(Debug, Serialize)]
pub struct AdviceResponse {
    pub status: PowerLevel,
    pub message: &'static str,
    pub power_w: f64,
}

/// A failed pin read is reported as `null`.
#[derive(Debug, Serialize)]
pub struct ElectricsResponse {
    pub voltage_v: Option<f64>,
    pub current_a: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UsageQuery {
    #[serde(default)]
    pub period: UsagePeriod,
}

#[derive(Debug, Serialize)]
pub struct BillResponse {
    pub id: i64,
    pub bill_date: String,
    pub total_energy_kwh: f64,
    pub total_cost: f64,
    pub co2_emission_kg: f64,
    pub cost_breakdown: Vec<SlabCharge>,
}

impl From<Bill> for BillResponse {
    fn from(b: Bill) -> Self {
        Self {
            id: b.id,
            bill_date: b.bill_date.to_string(),
            total_energy_kwh: b.total_energy_kwh,
            total_cost: b.total_cost,
            co2_emission_kg: b.co2_emission_kg,
            cost_breakdown: b.cost_breakdown.0,
        }
    }
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/devices/:id/total", get(device_total))
        .route("/devices/:id/reset", post(reset_total))
        .route("/devices/:id/switch", get(switch_state).post(switch_device))
        .route("/devices/:id/advice", get(power_advice))
        .route("/devices/:id/electrics", get(electrics))
        .route("/devices/:id/usage", get(device_usage))
        .route("/users/:id/bills", get(user_bills))
        .with_state(state)
}

/// Bind `bind_addr` and serve the control API until `shutdown` fires.
pub async fn spawn(
    bind_addr: &str,
    state: ControlState,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid control bind address '{bind_addr}'"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control listener on {addr}"))?;
    tracing::info!(%addr, "control API listening");

    let app = router(state);
    Ok(tokio::spawn(async move {
        let server = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(shutdown.cancelled_owned());
        if let Err(e) = server.await {
            tracing::error!(error = %e, "control server error");
        }
    }))
}

async fn device_total(
    State(state): State<ControlState>,
    Path(id): Path<i64>,
) -> Result<Json<TotalResponse>, StatusCode> {
    let device = state.device(id)?;
    Ok(Json(TotalResponse {
        device_id: id,
        total_kwh: device.accumulator.get_total(),
        running: device.accumulator.state().await == AccumulatorState::Running,
    }))
}

async fn reset_total(
    State(state): State<ControlState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    state.device(id)?.accumulator.reset_total();
    Ok(StatusCode::NO_CONTENT)
}

async fn switch_state(
    State(state): State<ControlState>,
    Path(id): Path<i64>,
) -> Result<Json<SwitchStateResponse>, StatusCode> {
    let device = state.device(id)?;
    let value = state.read_pin(&device.switch_address).await.map_err(|e| {
        tracing::warn!(device_id = id, error = %e, "switch state read failed");
        upstream_status(&e)
    })?;

    // Blynk reports the pin as a number; anything but 0 or 1 is garbage.
    let switch = match value {
        v if v == 0.0 => SwitchState::Off,
        v if v == 1.0 => SwitchState::On,
        other => {
            tracing::warn!(device_id = id, value = other, "unexpected switch pin value");
            return Err(StatusCode::BAD_GATEWAY);
        }
    };
    Ok(Json(SwitchStateResponse {
        state: switch as i64,
    }))
}

async fn switch_device(
    State(state): State<ControlState>,
    Path(id): Path<i64>,
    Json(req): Json<SwitchRequest>,
) -> Result<StatusCode, StatusCode> {
    let device = state.device(id)?;
    let switch = SwitchState::try_from(req.state).map_err(|_| StatusCode::BAD_REQUEST)?;

    state
        .control
        .set_state(&device.switch_address, switch)
        .await
        .map_err(|e| {
            tracing::warn!(device_id = id, error = %e, "device switch failed");
            StatusCode::BAD_GATEWAY
        })?;

    tracing::info!(device_id = id, state = ?switch, "device switched");
    Ok(StatusCode::NO_CONTENT)
}

async fn power_advice(
    State(state): State<ControlState>,
    Path(id): Path<i64>,
) -> Result<Json<AdviceResponse>, StatusCode> {
    let device = state.device(id)?;

    let watts = state.read_pin(&device.power_address).await.map_err(|e| {
        tracing::warn!(device_id = id, error = %e, "power read for advice failed");
        upstream_status(&e)
    })?;

    let level = PowerLevel::classify(watts);
    Ok(Json(AdviceResponse {
        status: level,
        message: level.advice(),
        power_w: watts,
    }))
}

async fn electrics(
    State(state): State<ControlState>,
    Path(id): Path<i64>,
) -> Result<Json<ElectricsResponse>, StatusCode> {
    let device = state.device(id)?;

    let (voltage, current) = tokio::join!(
        state.read_pin(&device.voltage_address),
        state.read_pin(&device.current_address),
    );
    if let (Err(e), Err(_)) = (&voltage, &current) {
        tracing::warn!(device_id = id, error = %e, "voltage and current reads failed");
        return Err(upstream_status(e));
    }

    Ok(Json(ElectricsResponse {
        voltage_v: voltage.ok(),
        current_a: current.ok(),
    }))
}

async fn device_usage(
    State(state): State<ControlState>,
    Path(id): Path<i64>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<Vec<UsageBucket>>, StatusCode> {
    state.device(id)?;

    let end = OffsetDateTime::now_utc();
    let start = end - query.period.window();
    let logs = state
        .repository
        .reading_logs_for_device(id, start, end)
        .await
        .map_err(|e| {
            tracing::error!(device_id = id, error = %e, "failed to load reading logs");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(usage::summarize(&logs, query.period, state.utc_offset)))
}

async fn user_bills(
    State(state): State<ControlState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<BillResponse>>, StatusCode> {
    let bills = state.repository.bills_for_user(user_id).await.map_err(|e| {
        tracing::error!(user_id, error = %e, "failed to load bills");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(bills.into_iter().map(BillResponse::from).collect()))
}
