//! External collaborator contracts
//!
//! The intake core never talks to object storage, the vision extraction
//! model, the validation service or geographic reference data directly; it
//! goes through these traits. Concrete adapters live in the submodules.

pub mod decoder;
pub mod directory;
pub mod fs_storage;
pub mod http_extraction;
pub mod rule_validator;

use crate::models::{ExtractionResponse, ExtractionResult, ValidationReport};
use async_trait::async_trait;
use thiserror::Error;

pub use directory::StaticMunicipalityDirectory;
pub use fs_storage::FsObjectStorage;
pub use http_extraction::HttpExtractionClient;
pub use rule_validator::RuleBasedValidator;

/// Object storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    /// Key is taken; distinct from a failed write
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage failure: {0}")]
    Failed(String),
}

/// Extraction / validation collaborator failures
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Network, timeout or 5xx; worth retrying later
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Service answered, but not with anything we can use
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Service refused the request (4xx)
    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Reference record for a municipality
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Municipality {
    pub code: String,
    pub name: String,
    pub department_code: Option<String>,
}

/// Raw image persistence
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under `key` and return its public URL
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, StorageError>;

    /// Remove the object under `key`; a missing object is not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Vision-language extraction of flyer fields
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn analyze(
        &self,
        image: &[u8],
        municipality_name: &str,
        municipality_code: &str,
    ) -> Result<ExtractionResponse, CollaboratorError>;
}

/// Secondary validation producing the confidence score
#[async_trait]
pub trait ValidationService: Send + Sync {
    async fn validate(
        &self,
        municipality_name: &str,
        extraction: &ExtractionResult,
        department_hint: Option<&str>,
    ) -> Result<ValidationReport, CollaboratorError>;
}

/// Geographic reference data
#[async_trait]
pub trait MunicipalityDirectory: Send + Sync {
    async fn lookup(&self, code: &str) -> Option<Municipality>;
}
