//! civic-intake library
//!
//! Intake and moderation core for user-submitted campaign flyers:
//! perceptual fingerprinting, multi-axis quotas, the intake decision
//! pipeline, human moderation and the SQLite repositories behind them.
//!
//! HTTP routing, the vision extraction model, object storage and geographic
//! reference data are collaborators reached through the traits in
//! [`collaborators`].

pub mod collaborators;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod text;
pub mod utils;

pub use crate::error::{IntakeError, IntakeResult};
pub use crate::services::intake_orchestrator::{IntakeOrchestrator, SubmitResponse};
pub use crate::services::moderation::ModerationWorkflow;
pub use crate::services::rate_limiter::RateLimiter;
