//! Energy dispatch optimization engine.
//!
//! Turns a portfolio of batteries, generators and grid connections plus load,
//! renewable and price forecasts into a cost-optimal dispatch schedule by
//! building a linear or mixed-integer program, handing it to a solver backend
//! and validating what comes back.

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod optimizer;
pub mod orchestrator;
pub mod repo;
pub mod telemetry;

pub use error::{EngineError, SpecificationError};
pub use orchestrator::{JobResult, JobStatus, Orchestrator};
