//! civic-intake - operator CLI
//!
//! Drives the intake pipeline and moderation workflow against the local
//! database. Maintenance subcommands (`purge-counters`, `expire-pending`) are
//! meant to be run by an external scheduler. Every subcommand prints JSON to
//! stdout; logs go to stderr or the configured log file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use civic_common::time::{Clock, SystemClock};
use civic_intake::collaborators::{
    FsObjectStorage, HttpExtractionClient, RuleBasedValidator, StaticMunicipalityDirectory,
};
use civic_intake::config::IntakeConfig;
use civic_intake::models::ExtractionOverrides;
use civic_intake::services::intake_orchestrator::Collaborators;
use civic_intake::services::{ModerationWorkflow, ReviewAction, SubmissionRequest};
use civic_intake::{IntakeOrchestrator, SubmitResponse};

/// Command-line arguments for civic-intake
#[derive(Parser, Debug)]
#[command(name = "civic-intake")]
#[command(about = "Campaign flyer intake and moderation")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CIVIC_CONFIG")]
    config: Option<PathBuf>,

    /// Data folder holding the database and stored images
    #[arg(short, long, env = "CIVIC_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and schema
    InitDb,

    /// Run one flyer image through the intake pipeline
    Submit {
        /// Image file
        #[arg(long)]
        image: PathBuf,

        /// Target municipality code
        #[arg(long)]
        municipality: String,

        /// Submitter address
        #[arg(long, default_value = "127.0.0.1")]
        ip: String,

        /// Submitter device fingerprint
        #[arg(long)]
        device: Option<String>,

        #[arg(long)]
        email: Option<String>,
    },

    /// List submissions awaiting review
    ListPending {
        #[arg(long)]
        municipality: Option<String>,

        #[arg(long, default_value = "50")]
        limit: u32,
    },

    /// Approve or reject a pending submission
    Review {
        id: Uuid,

        /// approve | reject
        action: String,

        /// Rejection reason
        #[arg(long)]
        reason: Option<String>,

        /// Corrections to the extracted fields, as JSON
        #[arg(long)]
        overrides_json: Option<String>,

        #[arg(long, default_value = "operator")]
        reviewer: String,
    },

    /// Delete rate limit counters past the retention period
    PurgeCounters,

    /// Reject pending submissions nobody reviewed in time
    ExpirePending,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = civic_common::config::resolve_config_path(args.config.as_deref());
    let config = IntakeConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    civic_common::logging::init(&config.logging).context("Failed to initialise logging")?;

    info!("Starting civic-intake {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        info!("Config: {}", path.display());
    }

    let root_folder = civic_common::config::resolve_root_folder(
        args.root_folder.as_deref(),
        config.root_folder.as_deref(),
    );
    let db_path = civic_common::config::prepare_root_folder(&root_folder)
        .context("Failed to initialise root folder")?;
    info!("Database: {}", db_path.display());

    let pool = civic_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let output = match args.command {
        Command::InitDb => json!({
            "database": db_path.display().to_string(),
            "schema_version": civic_common::db::SCHEMA_VERSION,
        }),

        Command::Submit {
            image,
            municipality,
            ip,
            device,
            email,
        } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("Failed to read {}", image.display()))?;
            let orchestrator = build_orchestrator(pool.clone(), &config, &root_folder, clock.clone())?;

            let mut request = SubmissionRequest::new(bytes, municipality, ip);
            if let Some(device) = device {
                request = request.with_device(device);
            }
            if let Some(email) = email {
                request = request.with_email(email);
            }

            let result = orchestrator.submit(request).await;
            serde_json::to_value(SubmitResponse::from_result(&result))?
        }

        Command::ListPending { municipality, limit } => {
            let workflow = ModerationWorkflow::new(pool.clone(), &config, clock.clone());
            let pending = workflow.list_pending(municipality.as_deref(), limit).await?;
            serde_json::to_value(pending)?
        }

        Command::Review {
            id,
            action,
            reason,
            overrides_json,
            reviewer,
        } => {
            let action = ReviewAction::parse(&action)
                .ok_or_else(|| anyhow!("Unknown review action '{}', expected approve or reject", action))?;
            let overrides = overrides_json
                .map(|raw| serde_json::from_str::<ExtractionOverrides>(&raw))
                .transpose()
                .context("Invalid --overrides-json")?;

            let workflow = ModerationWorkflow::new(pool.clone(), &config, clock.clone());
            let decided = workflow.review(id, action, overrides, reason, &reviewer).await?;
            json!({
                "submission_id": decided.id,
                "status": decided.status,
                "rejection_reason": decided.rejection_reason,
                "reviewer_id": decided.reviewer_id,
            })
        }

        Command::PurgeCounters => {
            let limiter = civic_intake::RateLimiter::new(
                pool.clone(),
                config.quotas.clone(),
                clock.clone(),
            )
            .with_max_lock_wait(config.database.max_lock_wait_ms);
            let removed = limiter.purge_stale(clock.now()).await?;
            json!({ "removed": removed })
        }

        Command::ExpirePending => {
            let workflow = ModerationWorkflow::new(pool.clone(), &config, clock.clone());
            let expired = workflow.expire_stale_pending(clock.now()).await?;
            json!({ "expired": expired })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    pool.close().await;
    Ok(())
}

fn build_orchestrator(
    pool: SqlitePool,
    config: &IntakeConfig,
    root_folder: &Path,
    clock: Arc<dyn Clock>,
) -> Result<IntakeOrchestrator> {
    let Some(extraction_url) = config.services.extraction_url.as_deref() else {
        bail!("services.extraction_url is not configured");
    };
    let Some(municipalities_file) = config.municipalities_file.as_deref() else {
        bail!("municipalities_file is not configured");
    };

    let directory = StaticMunicipalityDirectory::load(municipalities_file)
        .with_context(|| format!("Failed to load {}", municipalities_file.display()))?;
    info!("Loaded {} municipalities", directory.len());

    let extraction = HttpExtractionClient::new(
        extraction_url,
        Duration::from_secs(config.services.extraction_timeout_secs),
        config.services.extraction_requests_per_second,
    )
    .map_err(|e| anyhow!("Failed to build extraction client: {}", e))?;

    let collaborators = Collaborators {
        storage: Arc::new(FsObjectStorage::new(
            root_folder.join("flyers"),
            config.services.public_base_url.clone(),
        )),
        extraction: Arc::new(extraction),
        validation: Arc::new(RuleBasedValidator::new()),
        directory: Arc::new(directory),
    };

    Ok(IntakeOrchestrator::new(pool, config.clone(), collaborators, clock))
}
