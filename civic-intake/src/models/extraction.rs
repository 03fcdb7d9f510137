//! Structured data extracted from a flyer image, and its validation report

use serde::{Deserialize, Serialize};

/// One candidate named on a flyer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCandidate {
    pub last_name: String,
    #[serde(default)]
    pub first_name: Option<String>,
    /// Free-text role, e.g. "tête de liste"
    #[serde(default)]
    pub role_hint: Option<String>,
    #[serde(default)]
    pub party: Option<String>,
    #[serde(default)]
    pub list_name: Option<String>,
    /// Order on the list, 1-based
    #[serde(default)]
    pub position: Option<u32>,
    /// Statements attributed to this candidate specifically
    #[serde(default)]
    pub program_statements: Vec<String>,
}

impl ExtractedCandidate {
    pub fn display_name(&self) -> String {
        match self.first_name.as_deref().map(str::trim) {
            Some(first) if !first.is_empty() => format!("{} {}", first, self.last_name.trim()),
            _ => self.last_name.trim().to_string(),
        }
    }

    pub fn normalized_name(&self) -> String {
        crate::text::normalize_person_name(self.first_name.as_deref(), &self.last_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Normalized extraction fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub candidates: Vec<ExtractedCandidate>,
    /// Party label printed once for the whole flyer
    #[serde(default)]
    pub common_party: Option<String>,
    /// List name printed once for the whole flyer
    #[serde(default)]
    pub common_list: Option<String>,
    /// Statements not attributed to a single candidate
    #[serde(default)]
    pub program_statements: Vec<String>,
    /// The flyer explicitly names the target election cycle
    #[serde(default)]
    pub mentions_target_election: bool,
    /// Municipality named on the flyer, verbatim
    #[serde(default)]
    pub municipality_mentioned: Option<String>,
    #[serde(default)]
    pub department_hint: Option<String>,
    #[serde(default)]
    pub postal_code_hint: Option<String>,
    #[serde(default)]
    pub contact: Option<ContactInfo>,
    #[serde(default)]
    pub slogan: Option<String>,
}

impl ExtractionResult {
    /// Party for a candidate, falling back to the flyer-wide label
    pub fn party_for<'a>(&'a self, candidate: &'a ExtractedCandidate) -> Option<&'a str> {
        non_blank(candidate.party.as_deref()).or_else(|| non_blank(self.common_party.as_deref()))
    }

    /// List name for a candidate, falling back to the flyer-wide list
    pub fn list_for<'a>(&'a self, candidate: &'a ExtractedCandidate) -> Option<&'a str> {
        non_blank(candidate.list_name.as_deref()).or_else(|| non_blank(self.common_list.as_deref()))
    }

    /// Candidate's own statements, or the flyer-wide ones when it has none
    pub fn statements_for(&self, candidate: &ExtractedCandidate) -> Vec<String> {
        let own: Vec<String> = candidate
            .program_statements
            .iter()
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect();
        if own.is_empty() {
            self.program_statements
                .iter()
                .filter(|s| !s.trim().is_empty())
                .cloned()
                .collect()
        } else {
            own
        }
    }

    /// Apply reviewer corrections; absent override fields keep the original
    pub fn merged_with(&self, overrides: &ExtractionOverrides) -> ExtractionResult {
        let mut merged = self.clone();
        if let Some(candidates) = &overrides.candidates {
            merged.candidates = candidates.clone();
        }
        if let Some(party) = &overrides.common_party {
            merged.common_party = Some(party.clone());
        }
        if let Some(list) = &overrides.common_list {
            merged.common_list = Some(list.clone());
        }
        if let Some(statements) = &overrides.program_statements {
            merged.program_statements = statements.clone();
        }
        if let Some(contact) = &overrides.contact {
            merged.contact = Some(contact.clone());
        }
        if let Some(slogan) = &overrides.slogan {
            merged.slogan = Some(slogan.clone());
        }
        merged
    }

    /// Short, user-facing summary of what was read
    pub fn summary(&self) -> ExtractionSummary {
        ExtractionSummary {
            candidate_names: self.candidates.iter().map(|c| c.display_name()).collect(),
            party: non_blank(self.common_party.as_deref())
                .or_else(|| self.candidates.iter().find_map(|c| non_blank(c.party.as_deref())))
                .map(str::to_string),
            program_statement_count: self.program_statements.len()
                + self
                    .candidates
                    .iter()
                    .map(|c| c.program_statements.len())
                    .sum::<usize>(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Reviewer corrections applied on manual approval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOverrides {
    #[serde(default)]
    pub candidates: Option<Vec<ExtractedCandidate>>,
    #[serde(default)]
    pub common_party: Option<String>,
    #[serde(default)]
    pub common_list: Option<String>,
    #[serde(default)]
    pub program_statements: Option<Vec<String>>,
    #[serde(default)]
    pub contact: Option<ContactInfo>,
    #[serde(default)]
    pub slogan: Option<String>,
}

/// What the extraction collaborator concluded about the image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    Document(ExtractionResult),
    NotADocument { reason: Option<String> },
}

/// Decoded extraction plus the raw payload kept for audit
#[derive(Debug, Clone)]
pub struct ExtractionResponse {
    pub outcome: ExtractionOutcome,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub candidate_names: Vec<String>,
    pub party: Option<String>,
    pub program_statement_count: usize,
}

/// Result of one validation criterion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub passed: bool,
    /// 0.0-1.0
    pub score: f32,
    #[serde(default)]
    pub note: Option<String>,
}

impl CriterionScore {
    pub fn new(passed: bool, score: f32, note: Option<String>) -> Self {
        Self {
            passed,
            score: clamp_unit(score),
            note,
        }
    }
}

/// Per-criterion validation breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriteriaBreakdown {
    pub document_type: CriterionScore,
    pub cycle_mention: CriterionScore,
    pub municipality_match: CriterionScore,
    pub content_appropriateness: CriterionScore,
    pub data_completeness: CriterionScore,
}

impl CriteriaBreakdown {
    /// Same score on every criterion
    pub fn uniform(score: CriterionScore) -> Self {
        Self {
            document_type: score.clone(),
            cycle_mention: score.clone(),
            municipality_match: score.clone(),
            content_appropriateness: score.clone(),
            data_completeness: score,
        }
    }
}

/// Secondary validation verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub confidence_score: f32,
    pub criteria: CriteriaBreakdown,
    #[serde(default)]
    pub needs_human_review: bool,
    #[serde(default)]
    pub review_reason: Option<String>,
}

/// Clamp into 0.0-1.0; NaN becomes 0.0
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
