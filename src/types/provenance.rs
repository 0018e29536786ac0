//! Provenance records for admitted districts.
//!
//! Append-only: a district's provenance is written once at admission and
//! never rewritten. Supersession happens by publishing a new snapshot whose
//! records carry a fresh `effective_from`, with the prior record gaining an
//! `effective_to` transition.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::candidate::AuthorityLevel;
use crate::types::district::DistrictId;

/// Full provenance for one admitted district.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// The district this record covers.
    pub district_id: DistrictId,
    /// Upstream source URL.
    pub source_url: String,
    /// Authority level of the source.
    pub authority_level: AuthorityLevel,
    /// When the source response was fetched.
    pub acquired_at: DateTime<Utc>,
    /// SHA-256 of the upstream response body.
    pub response_content_hash: String,
    /// The source record's raw attribute bag, preserved verbatim.
    /// Excluded from the leaf hash.
    pub source_attributes: BTreeMap<String, serde_json::Value>,
    /// Start of validity (snapshot generation time).
    pub effective_from: DateTime<Utc>,
    /// End of validity, set when a successor snapshot supersedes this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_to: Option<DateTime<Utc>>,
}

impl Provenance {
    /// The compact summary returned in lookup responses.
    pub fn summary(&self) -> ProvenanceSummary {
        ProvenanceSummary {
            source_url: self.source_url.clone(),
            authority_level: self.authority_level,
            acquired_at: self.acquired_at,
        }
    }
}

/// What a lookup response discloses about a district's origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceSummary {
    /// Upstream source URL.
    pub source_url: String,
    /// Authority level of the source.
    pub authority_level: AuthorityLevel,
    /// When the source response was fetched.
    pub acquired_at: DateTime<Utc>,
}
