//! Intake services
//!
//! Leaves first: fingerprinting and municipality matching are pure; the rate
//! limiter owns the counter table; the orchestrator and moderation workflow
//! own the submission lifecycle.

pub mod fingerprinter;
pub mod intake_orchestrator;
pub mod moderation;
pub mod municipality_match;
pub mod rate_limiter;

pub use fingerprinter::{Fingerprint, Fingerprinter, ImageFingerprint};
pub use intake_orchestrator::{IntakeOrchestrator, IntakeOutcome, SubmissionRequest, SubmitResponse};
pub use moderation::{ModerationWorkflow, ReviewAction};
pub use rate_limiter::{ActionType, Identifier, IdentifierType, RateLimitDecision, RateLimiter};
