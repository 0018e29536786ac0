//! Jurisdictions: the governing units whose territory a tessellation covers.

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

/// FIPS code (or equivalent) identifying a jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JurisdictionId(String);

impl JurisdictionId {
    /// Wrap a FIPS code or equivalent identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JurisdictionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a jurisdiction elects its representatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernanceKind {
    /// One representative per geographic district; tessellation applies.
    DistrictBased,
    /// Representatives elected jurisdiction-wide; no tessellation exists.
    AtLarge,
    /// Consolidated city-county / city-parish: district-based, but the
    /// council's territory legitimately extends beyond the census place
    /// boundary.
    ConsolidatedCityCounty,
}

impl GovernanceKind {
    /// Whether geographic districts exist for this kind at all.
    pub fn has_districts(&self) -> bool {
        matches!(self, Self::DistrictBased | Self::ConsolidatedCityCounty)
    }
}

/// Level of the jurisdiction itself (not of its districts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JurisdictionLevel {
    /// Incorporated place (city, town, village).
    Municipality,
    /// County or county-equivalent.
    County,
    /// State or state-equivalent.
    State,
}

/// Declared expectations for one jurisdiction.
///
/// This is the registry's authoritative record: what the validator checks
/// candidates against. The boundary polygon is loaded from the polygon
/// archive, not from the JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jurisdiction {
    /// FIPS or equivalent identifier.
    pub id: JurisdictionId,
    /// Human-readable name.
    pub display_name: String,
    /// ISO country code.
    pub country: String,
    /// Two-letter state/province code.
    pub state: String,
    /// Level of this jurisdiction.
    pub level: JurisdictionLevel,
    /// Parent jurisdiction (county for a city, state for a county).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<JurisdictionId>,
    /// Expected number of districts, when declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_district_count: Option<u32>,
    /// Governance kind.
    pub governance_kind: GovernanceKind,
    /// Documented overflow exception: maximum legitimate fraction of the
    /// district union lying outside the census place boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_overflow_ratio: Option<f64>,
    /// Water fraction of the jurisdiction's total area, from census data.
    #[serde(default)]
    pub water_ratio: f64,
    /// Redistricting cycle label (e.g. "2020").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redistricting_cycle: Option<String>,
    /// Municipal/county outline used by the containment axiom. Loaded from
    /// the boundary archive at registry startup.
    #[serde(skip)]
    pub boundary_polygon: Option<MultiPolygon<f64>>,
}

impl Jurisdiction {
    /// Whether this jurisdiction is coastal under the given threshold.
    pub fn is_coastal(&self, coastal_water_ratio: f64) -> bool {
        self.water_ratio > coastal_water_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governance_has_districts() {
        assert!(GovernanceKind::DistrictBased.has_districts());
        assert!(GovernanceKind::ConsolidatedCityCounty.has_districts());
        assert!(!GovernanceKind::AtLarge.has_districts());
    }

    #[test]
    fn test_jurisdiction_document_roundtrip() {
        let j = Jurisdiction {
            id: JurisdictionId::new("2205000"),
            display_name: "Baton Rouge".to_string(),
            country: "US".to_string(),
            state: "LA".to_string(),
            level: JurisdictionLevel::Municipality,
            parent_id: None,
            expected_district_count: Some(12),
            governance_kind: GovernanceKind::ConsolidatedCityCounty,
            known_overflow_ratio: Some(0.82),
            water_ratio: 0.04,
            redistricting_cycle: Some("2020".to_string()),
            boundary_polygon: None,
        };
        let json = serde_json::to_string(&j).unwrap();
        assert!(json.contains("\"governance_kind\":\"consolidated_city_county\""));
        let back: Jurisdiction = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, j.id);
        assert_eq!(back.known_overflow_ratio, Some(0.82));
        assert!(back.boundary_polygon.is_none());
    }
}
