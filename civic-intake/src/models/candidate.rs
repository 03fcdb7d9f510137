//! Published candidate records

use super::extraction::{ExtractedCandidate, ExtractionResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a candidate record was populated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Published by the intake pipeline without human review
    FlyerAuto,
    /// Published by a moderator's approval
    FlyerManual,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::FlyerAuto => "flyer_auto",
            Provenance::FlyerManual => "flyer_manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "flyer_auto" => Some(Provenance::FlyerAuto),
            "flyer_manual" => Some(Provenance::FlyerManual),
            _ => None,
        }
    }
}

/// Candidate record keyed by (municipality code, normalized name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub municipality_code: String,
    pub normalized_name: String,
    pub display_name: String,
    pub first_name: Option<String>,
    pub last_name: String,
    pub role_hint: Option<String>,
    pub party: Option<String>,
    pub list_name: Option<String>,
    pub program_statements: Vec<String>,
    pub provenance: Provenance,
    pub source_submission_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl CandidateRecord {
    /// Build the record for one extracted candidate
    ///
    /// Party, list and statements fall back to the flyer-wide values when the
    /// candidate has none of its own. Returns `None` for a blank name.
    pub fn from_extraction(
        municipality_code: &str,
        candidate: &ExtractedCandidate,
        extraction: &ExtractionResult,
        provenance: Provenance,
        submission_id: Uuid,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let normalized_name = candidate.normalized_name();
        if normalized_name.is_empty() {
            return None;
        }

        Some(Self {
            municipality_code: municipality_code.to_string(),
            normalized_name,
            display_name: candidate.display_name(),
            first_name: candidate
                .first_name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            last_name: candidate.last_name.trim().to_string(),
            role_hint: candidate.role_hint.clone(),
            party: extraction.party_for(candidate).map(str::to_string),
            list_name: extraction.list_for(candidate).map(str::to_string),
            program_statements: extraction.statements_for(candidate),
            provenance,
            source_submission_id: Some(submission_id),
            updated_at: now,
        })
    }

    /// Records for every candidate on the flyer, one per normalized name
    pub fn all_from_extraction(
        municipality_code: &str,
        extraction: &ExtractionResult,
        provenance: Provenance,
        submission_id: Uuid,
        now: DateTime<Utc>,
    ) -> Vec<Self> {
        let mut records: Vec<Self> = Vec::new();
        for candidate in &extraction.candidates {
            let Some(record) = Self::from_extraction(
                municipality_code,
                candidate,
                extraction,
                provenance,
                submission_id,
                now,
            ) else {
                continue;
            };
            // A name printed twice on one flyer is still one record
            if let Some(existing) = records
                .iter_mut()
                .find(|r| r.normalized_name == record.normalized_name)
            {
                *existing = record;
            } else {
                records.push(record);
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_on_one_flyer_collapse() {
        let extraction = ExtractionResult {
            candidates: vec![
                ExtractedCandidate {
                    last_name: "DUPONT".to_string(),
                    first_name: Some("Claire".to_string()),
                    ..Default::default()
                },
                ExtractedCandidate {
                    last_name: "Dupont".to_string(),
                    first_name: Some("claire".to_string()),
                    party: Some("Renouveau".to_string()),
                    ..Default::default()
                },
                ExtractedCandidate {
                    last_name: "   ".to_string(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let records = CandidateRecord::all_from_extraction(
            "75056",
            &extraction,
            Provenance::FlyerAuto,
            Uuid::new_v4(),
            Utc::now(),
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].normalized_name, "claire dupont");
        assert_eq!(records[0].party.as_deref(), Some("Renouveau"));
    }

    #[test]
    fn provenance_strings_roundtrip() {
        for p in [Provenance::FlyerAuto, Provenance::FlyerManual] {
            assert_eq!(Provenance::parse(p.as_str()), Some(p));
        }
    }
}
