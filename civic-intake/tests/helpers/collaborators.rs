//! Scripted collaborators
//!
//! Each mock answers with whatever the test last scripted and counts its
//! calls, so tests can assert that rejected attempts never reached them.

use async_trait::async_trait;
use civic_intake::collaborators::{
    CollaboratorError, ExtractionService, ObjectStorage, StorageError, ValidationService,
};
use civic_intake::models::{
    CriteriaBreakdown, CriterionScore, ExtractedCandidate, ExtractionOutcome, ExtractionResponse,
    ExtractionResult, ValidationReport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

/// Flyer naming one candidate for `municipality` with `statements` statements
pub fn flyer(municipality: &str, statements: usize) -> ExtractionResult {
    ExtractionResult {
        candidates: vec![ExtractedCandidate {
            last_name: "Durand".to_string(),
            first_name: Some("Amélie".to_string()),
            role_hint: Some("tête de liste".to_string()),
            position: Some(1),
            ..Default::default()
        }],
        common_party: Some("Ensemble pour la Ville".to_string()),
        common_list: Some("Liste citoyenne".to_string()),
        program_statements: (1..=statements).map(|i| format!("Engagement n°{}", i)).collect(),
        mentions_target_election: true,
        municipality_mentioned: Some(municipality.to_string()),
        ..Default::default()
    }
}

#[derive(Debug, Clone)]
pub enum ExtractionScript {
    Document(ExtractionResult),
    NotADocument,
    Unavailable,
    Malformed,
}

pub struct ScriptedExtraction {
    script: Mutex<ExtractionScript>,
    calls: AtomicUsize,
    rendezvous: Mutex<Option<Arc<Barrier>>>,
}

impl ScriptedExtraction {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(ExtractionScript::Document(flyer("Lyon", 3))),
            calls: AtomicUsize::new(0),
            rendezvous: Mutex::new(None),
        }
    }

    /// Hold every call until `parties` calls are in flight
    pub fn rendezvous(&self, parties: usize) {
        *self.rendezvous.lock().unwrap() = Some(Arc::new(Barrier::new(parties)));
    }

    pub fn set(&self, script: ExtractionScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn answer(&self, result: ExtractionResult) {
        self.set(ExtractionScript::Document(result));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionService for ScriptedExtraction {
    async fn analyze(
        &self,
        _image: &[u8],
        _municipality_name: &str,
        _municipality_code: &str,
    ) -> Result<ExtractionResponse, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let barrier = self.rendezvous.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        let script = self.script.lock().unwrap().clone();
        match script {
            ExtractionScript::Document(result) => Ok(ExtractionResponse {
                raw: serde_json::to_value(&result).unwrap(),
                outcome: ExtractionOutcome::Document(result),
            }),
            ExtractionScript::NotADocument => Ok(ExtractionResponse {
                raw: serde_json::json!({"is_campaign_document": false}),
                outcome: ExtractionOutcome::NotADocument {
                    reason: Some("restaurant menu".to_string()),
                },
            }),
            ExtractionScript::Unavailable => Err(CollaboratorError::Unavailable(
                "connect timeout after 60s".to_string(),
            )),
            ExtractionScript::Malformed => Err(CollaboratorError::Malformed(
                "no JSON object in model output".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ValidationScript {
    Report { confidence: f32, valid: bool },
    Unavailable,
}

pub struct ScriptedValidation {
    script: Mutex<ValidationScript>,
    calls: AtomicUsize,
}

impl ScriptedValidation {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(ValidationScript::Report {
                confidence: 0.95,
                valid: true,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, script: ValidationScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn score(&self, confidence: f32, valid: bool) {
        self.set(ValidationScript::Report { confidence, valid });
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ValidationService for ScriptedValidation {
    async fn validate(
        &self,
        _municipality_name: &str,
        _extraction: &ExtractionResult,
        _department_hint: Option<&str>,
    ) -> Result<ValidationReport, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = *self.script.lock().unwrap();
        match script {
            ValidationScript::Report { confidence, valid } => Ok(ValidationReport {
                is_valid: valid,
                confidence_score: confidence,
                criteria: CriteriaBreakdown::uniform(CriterionScore::new(valid, confidence, None)),
                needs_human_review: !valid || confidence < 0.9,
                review_reason: None,
            }),
            ValidationScript::Unavailable => {
                Err(CollaboratorError::Unavailable("503 Service Unavailable".to_string()))
            }
        }
    }
}

/// Object storage kept in memory
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<bool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            failing: Mutex::new(false),
        }
    }

    pub fn fail(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<String, StorageError> {
        if *self.failing.lock().unwrap() {
            return Err(StorageError::Failed("bucket unreachable".to_string()));
        }
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(key) {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(format!("memory://{}", key))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if *self.failing.lock().unwrap() {
            return Err(StorageError::Failed("bucket unreachable".to_string()));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}
