//! Rule-based validation service
//!
//! Local stand-in for the remote validation service. Scores the five
//! criteria from the extraction alone and combines them with fixed weights.
//!
//! # Scoring
//! | criterion               | weight |
//! |-------------------------|--------|
//! | document type           | 0.25   |
//! | cycle mention           | 0.20   |
//! | municipality match      | 0.20   |
//! | content appropriateness | 0.15   |
//! | data completeness       | 0.20   |
//!
//! The report is valid only when the first four criteria pass.

use super::{CollaboratorError, ValidationService};
use crate::models::{CriteriaBreakdown, CriterionScore, ExtractionResult, ValidationReport};
use crate::services::municipality_match::{self, MunicipalityMatch};
use async_trait::async_trait;

const DOCUMENT_TYPE_WEIGHT: f32 = 0.25;
const CYCLE_WEIGHT: f32 = 0.20;
const MUNICIPALITY_WEIGHT: f32 = 0.20;
const CONTENT_WEIGHT: f32 = 0.15;
const COMPLETENESS_WEIGHT: f32 = 0.20;

/// Completeness below this fails the criterion
const COMPLETENESS_PASS: f32 = 0.4;

const DEFAULT_BLOCKED_TERMS: &[&str] = &["casino", "viagra", "bitcoin", "crypto", "xxx", "porn"];

pub struct RuleBasedValidator {
    blocked_terms: Vec<String>,
}

impl RuleBasedValidator {
    pub fn new() -> Self {
        Self {
            blocked_terms: DEFAULT_BLOCKED_TERMS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_blocked_terms(terms: impl IntoIterator<Item = String>) -> Self {
        Self {
            blocked_terms: terms.into_iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    fn score_document_type(&self, extraction: &ExtractionResult) -> CriterionScore {
        if !extraction.candidates.is_empty() {
            CriterionScore::new(true, 1.0, None)
        } else if extraction.common_list.is_some() || extraction.common_party.is_some() {
            CriterionScore::new(true, 0.6, Some("list or party without named candidates".to_string()))
        } else {
            CriterionScore::new(false, 0.0, Some("no candidate, list or party found".to_string()))
        }
    }

    fn score_cycle(&self, extraction: &ExtractionResult) -> CriterionScore {
        if extraction.mentions_target_election {
            CriterionScore::new(true, 1.0, None)
        } else {
            CriterionScore::new(false, 0.0, Some("target election not mentioned".to_string()))
        }
    }

    fn score_municipality(
        &self,
        municipality_name: &str,
        extraction: &ExtractionResult,
        department_hint: Option<&str>,
    ) -> CriterionScore {
        match municipality_match::compare(municipality_name, extraction.municipality_mentioned.as_deref()) {
            MunicipalityMatch::Match => CriterionScore::new(true, 1.0, None),
            MunicipalityMatch::Mismatch => CriterionScore::new(
                false,
                0.0,
                extraction
                    .municipality_mentioned
                    .as_ref()
                    .map(|m| format!("flyer names '{}'", m)),
            ),
            MunicipalityMatch::Unnamed => {
                let departments = department_hint.zip(extraction.department_hint.as_deref());
                match departments {
                    Some((expected, found)) if expected.trim() == found.trim() => CriterionScore::new(
                        true,
                        0.85,
                        Some("no municipality named; department matches".to_string()),
                    ),
                    Some((_, found)) => CriterionScore::new(
                        true,
                        0.4,
                        Some(format!("no municipality named; department hint '{}' differs", found)),
                    ),
                    None => CriterionScore::new(true, 0.7, Some("no municipality named".to_string())),
                }
            }
        }
    }

    fn score_content(&self, extraction: &ExtractionResult) -> CriterionScore {
        let texts = extraction
            .program_statements
            .iter()
            .chain(extraction.candidates.iter().flat_map(|c| c.program_statements.iter()))
            .chain(extraction.slogan.iter());

        for text in texts {
            let lowered = text.to_lowercase();
            if let Some(term) = self.blocked_terms.iter().find(|t| lowered.contains(t.as_str())) {
                return CriterionScore::new(false, 0.0, Some(format!("blocked term '{}'", term)));
            }
        }
        CriterionScore::new(true, 1.0, None)
    }

    fn score_completeness(&self, extraction: &ExtractionResult) -> CriterionScore {
        let checks = [
            !extraction.candidates.is_empty(),
            !extraction.candidates.is_empty()
                && extraction
                    .candidates
                    .iter()
                    .all(|c| c.first_name.as_deref().is_some_and(|f| !f.trim().is_empty())),
            extraction.common_party.is_some()
                || extraction.common_list.is_some()
                || extraction.candidates.iter().any(|c| c.party.is_some() || c.list_name.is_some()),
            !extraction.program_statements.is_empty()
                || extraction.candidates.iter().any(|c| !c.program_statements.is_empty()),
            extraction.contact.is_some() || extraction.slogan.is_some(),
        ];
        let met = checks.iter().filter(|&&ok| ok).count();
        let score = met as f32 / checks.len() as f32;
        let note = (met < checks.len()).then(|| format!("{}/{} completeness checks met", met, checks.len()));
        CriterionScore::new(score >= COMPLETENESS_PASS, score, note)
    }
}

impl Default for RuleBasedValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValidationService for RuleBasedValidator {
    async fn validate(
        &self,
        municipality_name: &str,
        extraction: &ExtractionResult,
        department_hint: Option<&str>,
    ) -> Result<ValidationReport, CollaboratorError> {
        let criteria = CriteriaBreakdown {
            document_type: self.score_document_type(extraction),
            cycle_mention: self.score_cycle(extraction),
            municipality_match: self.score_municipality(municipality_name, extraction, department_hint),
            content_appropriateness: self.score_content(extraction),
            data_completeness: self.score_completeness(extraction),
        };

        let confidence = criteria.document_type.score * DOCUMENT_TYPE_WEIGHT
            + criteria.cycle_mention.score * CYCLE_WEIGHT
            + criteria.municipality_match.score * MUNICIPALITY_WEIGHT
            + criteria.content_appropriateness.score * CONTENT_WEIGHT
            + criteria.data_completeness.score * COMPLETENESS_WEIGHT;

        let is_valid = criteria.document_type.passed
            && criteria.cycle_mention.passed
            && criteria.municipality_match.passed
            && criteria.content_appropriateness.passed;

        let review_reason = [
            &criteria.document_type,
            &criteria.cycle_mention,
            &criteria.municipality_match,
            &criteria.content_appropriateness,
            &criteria.data_completeness,
        ]
        .iter()
        .filter(|c| !c.passed || c.score < 1.0)
        .find_map(|c| c.note.clone());

        Ok(ValidationReport {
            is_valid,
            confidence_score: crate::models::extraction::clamp_unit(confidence),
            needs_human_review: !is_valid || review_reason.is_some(),
            review_reason,
            criteria,
        })
    }
}
