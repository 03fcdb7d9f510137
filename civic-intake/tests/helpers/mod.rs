//! Test helper utilities
//!
//! Scripted collaborators, synthetic flyer images and a ready-wired harness
//! around the orchestrator and moderation workflow.

#![allow(dead_code)]

pub mod collaborators;
pub mod images;

use chrono::{DateTime, TimeZone, Utc};
use civic_common::time::ManualClock;
use civic_intake::collaborators::{Municipality, StaticMunicipalityDirectory};
use civic_intake::config::IntakeConfig;
use civic_intake::services::intake_orchestrator::Collaborators;
use civic_intake::services::ModerationWorkflow;
use civic_intake::IntakeOrchestrator;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

pub use collaborators::{MemoryStorage, ScriptedExtraction, ScriptedValidation};
pub use images::{flyer_png, flyer_png_with_speck, not_an_image};

pub const LYON: &str = "69123";
pub const GRENOBLE: &str = "38185";
pub const MARSEILLE: &str = "13055";

/// Fixed start time for harness clocks (mid-afternoon UTC)
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap()
}

pub fn directory() -> StaticMunicipalityDirectory {
    StaticMunicipalityDirectory::new(vec![
        Municipality {
            code: LYON.to_string(),
            name: "Lyon".to_string(),
            department_code: Some("69".to_string()),
        },
        Municipality {
            code: GRENOBLE.to_string(),
            name: "Grenoble".to_string(),
            department_code: Some("38".to_string()),
        },
        Municipality {
            code: MARSEILLE.to_string(),
            name: "Marseille".to_string(),
            department_code: Some("13".to_string()),
        },
    ])
}

/// Orchestrator, workflow and the scripted collaborators behind them
pub struct Harness {
    pub pool: SqlitePool,
    pub config: IntakeConfig,
    pub orchestrator: Arc<IntakeOrchestrator>,
    pub workflow: ModerationWorkflow,
    pub extraction: Arc<ScriptedExtraction>,
    pub validation: Arc<ScriptedValidation>,
    pub storage: Arc<MemoryStorage>,
    pub clock: Arc<ManualClock>,
    _temp_dir: Option<TempDir>,
}

impl Harness {
    /// Harness over a single-connection in-memory database
    pub async fn in_memory() -> Self {
        let pool = civic_common::db::init_memory_database().await.unwrap();
        Self::build(pool, None, IntakeConfig::default())
    }

    /// Harness over a WAL database file, for real concurrency
    pub async fn on_disk() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let pool = civic_common::db::init_database(&temp_dir.path().join("civic.db"))
            .await
            .unwrap();
        Self::build(pool, Some(temp_dir), IntakeConfig::default())
    }

    pub async fn with_config(config: IntakeConfig) -> Self {
        let pool = civic_common::db::init_memory_database().await.unwrap();
        Self::build(pool, None, config)
    }

    fn build(pool: SqlitePool, temp_dir: Option<TempDir>, config: IntakeConfig) -> Self {
        let extraction = Arc::new(ScriptedExtraction::new());
        let validation = Arc::new(ScriptedValidation::new());
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(start_time()));

        let collaborators = Collaborators {
            storage: storage.clone(),
            extraction: extraction.clone(),
            validation: validation.clone(),
            directory: Arc::new(directory()),
        };

        let orchestrator = Arc::new(IntakeOrchestrator::new(
            pool.clone(),
            config.clone(),
            collaborators,
            clock.clone(),
        ));
        let workflow = ModerationWorkflow::new(pool.clone(), &config, clock.clone());

        Self {
            pool,
            config,
            orchestrator,
            workflow,
            extraction,
            validation,
            storage,
            clock,
            _temp_dir: temp_dir,
        }
    }

    pub async fn count_submissions(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM submissions")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    pub async fn count_candidates(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM candidates")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}
