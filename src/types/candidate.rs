//! Candidate district sets as delivered by upstream fetchers.
//!
//! This is the boundary between the fetch/parse collaborators and the core:
//! a fetcher hands over one [`CandidateDistrictSet`] per jurisdiction and
//! the core takes it from there. Transport and source format end here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::geometry::{repair, RawGeometry};
use crate::types::district::DistrictLevel;
use crate::types::jurisdiction::JurisdictionId;

/// Authority level of the source that published the boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityLevel {
    /// Community-maintained data.
    Community,
    /// Regional body (COG, MPO).
    Regional,
    /// Municipal open-data portal.
    Municipal,
    /// State GIS clearinghouse.
    State,
    /// Federal source (census, national map).
    Federal,
}

/// Errors raised while decoding a candidate into workable geometry.
///
/// An ingestion error rejects the candidate without retry; it never aborts
/// the surrounding build.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IngestionError {
    /// The geometry is structurally invalid.
    #[error("malformed candidate polygon: {detail}")]
    MalformedGeometry {
        /// What was wrong.
        detail: String,
    },
    /// Coordinates fall outside WGS84 ranges (likely a projected CRS).
    #[error("non-WGS84 coordinate ({lon}, {lat})")]
    NonWgs84 {
        /// Offending longitude.
        lon: f64,
        /// Offending latitude.
        lat: f64,
    },
}

/// One raw district feature within a candidate set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateDistrict {
    /// Local district number.
    pub local_number: u32,
    /// Display name from the source record.
    pub display_name: String,
    /// Raw GeoJSON geometry in WGS84.
    pub raw_polygon: RawGeometry,
    /// The source record's attribute bag, untouched.
    pub raw_attributes: BTreeMap<String, serde_json::Value>,
}

/// A candidate district set for one jurisdiction, as fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateDistrictSet {
    /// Target jurisdiction.
    pub jurisdiction_id: JurisdictionId,
    /// District level this set describes.
    pub level: DistrictLevel,
    /// Where the data came from.
    pub source_url: String,
    /// When it was fetched.
    pub acquired_at: DateTime<Utc>,
    /// SHA-256 of the upstream response body.
    pub response_content_hash: String,
    /// Authority level of the source.
    pub authority_level: AuthorityLevel,
    /// The raw district features.
    pub districts: Vec<CandidateDistrict>,
}

/// A candidate district with decoded, repaired geometry.
#[derive(Debug, Clone)]
pub struct DecodedDistrict {
    /// Local district number.
    pub local_number: u32,
    /// Display name from the source record.
    pub display_name: String,
    /// Decoded geometry, orientation-normalized.
    pub geometry: MultiPolygon<f64>,
    /// True when the repair pass refused to alter the geometry.
    pub repair_refused: bool,
    /// The source attribute bag.
    pub raw_attributes: BTreeMap<String, serde_json::Value>,
}

impl DecodedDistrict {
    /// Canonical attribute subset: the fixed small schema that enters the
    /// leaf hash. The full raw bag stays in provenance only.
    pub fn canonical_attributes(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for key in ["representative", "rep_name", "member_name", "incumbent"] {
            if let Some(serde_json::Value::String(name)) = self.raw_attributes.get(key) {
                if !name.trim().is_empty() {
                    out.insert("representative".to_string(), name.trim().to_string());
                    break;
                }
            }
        }
        out
    }
}

impl CandidateDistrictSet {
    /// Decode every feature's geometry, applying the repair pass.
    ///
    /// Fails on the first malformed feature; a candidate with any
    /// undecodable geometry is rejected whole, not patched.
    pub fn decode(&self) -> Result<Vec<DecodedDistrict>, IngestionError> {
        self.districts
            .iter()
            .map(|d| {
                let decoded = d.raw_polygon.decode()?;
                let outcome = repair(&decoded);
                Ok(DecodedDistrict {
                    local_number: d.local_number,
                    display_name: d.display_name.clone(),
                    geometry: outcome.geometry,
                    repair_refused: outcome.repair_refused,
                    raw_attributes: d.raw_attributes.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate_with(geometry: &str) -> CandidateDistrictSet {
        CandidateDistrictSet {
            jurisdiction_id: JurisdictionId::new("0667000"),
            level: DistrictLevel::Council,
            source_url: "https://data.example.gov/districts.geojson".to_string(),
            acquired_at: Utc::now(),
            response_content_hash: "ab".repeat(32),
            authority_level: AuthorityLevel::Municipal,
            districts: vec![CandidateDistrict {
                local_number: 1,
                display_name: "District 1".to_string(),
                raw_polygon: RawGeometry::from_json(geometry).unwrap(),
                raw_attributes: BTreeMap::from([(
                    "representative".to_string(),
                    serde_json::Value::String("B. Example".to_string()),
                )]),
            }],
        }
    }

    #[test]
    fn test_decode_valid_candidate() {
        let set = candidate_with(
            r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#,
        );
        let decoded = set.decode().unwrap();
        assert_eq!(decoded.len(), 1);
        assert!(!decoded[0].repair_refused);
    }

    #[test]
    fn test_decode_rejects_bad_feature() {
        let set = candidate_with(r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1]]]}"#);
        assert!(set.decode().is_err());
    }

    #[test]
    fn test_canonical_attributes_extracts_representative() {
        let set = candidate_with(
            r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#,
        );
        let decoded = set.decode().unwrap();
        let attrs = decoded[0].canonical_attributes();
        assert_eq!(attrs.get("representative").map(String::as_str), Some("B. Example"));
    }

    #[test]
    fn test_candidate_set_serde_roundtrip() {
        let set = candidate_with(
            r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#,
        );
        let json = serde_json::to_string(&set).unwrap();
        let back: CandidateDistrictSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back.districts.len(), 1);
        assert_eq!(back.districts[0].local_number, 1);
    }
}
