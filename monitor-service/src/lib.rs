pub mod accumulator;
pub mod advice;
pub mod app;
pub mod billing;
pub mod config;
pub mod control_server;
pub mod metrics_server;
pub mod notify;
pub mod observability;
pub mod pipeline;
pub mod rates;
pub mod scheduler;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod transform;
pub mod usage;

pub use accumulator::Accumulator;
pub use pipeline::{Envelope, Pipeline};
