//! Districts and their identifiers.
//!
//! A district is one electoral subdivision of a jurisdiction at a given
//! level. Its canonical byte form (one NDJSON line) is what the snapshot
//! commits to; the same bytes are what the leaf hash covers, so encoding
//! here is part of the commitment scheme.

use std::collections::BTreeMap;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::geometry::{encode_canonical, RawGeometry};
use crate::types::candidate::IngestionError;
use crate::types::jurisdiction::JurisdictionId;

/// District level within a jurisdiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistrictLevel {
    /// City council district.
    Council,
    /// County commission district.
    County,
    /// U.S. congressional district.
    Congressional,
    /// State senate district.
    StateUpper,
    /// State house district.
    StateLower,
    /// School board district.
    School,
    /// Ward (where distinct from council districts).
    Ward,
    /// Any other level.
    Other,
}

impl DistrictLevel {
    /// Stable string form, used inside district ids and canonical lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Council => "council",
            Self::County => "county",
            Self::Congressional => "congressional",
            Self::StateUpper => "state_upper",
            Self::StateLower => "state_lower",
            Self::School => "school",
            Self::Ward => "ward",
            Self::Other => "other",
        }
    }

    /// Compact code for fixed-size index records.
    pub fn code(&self) -> u8 {
        match self {
            Self::Council => 0,
            Self::County => 1,
            Self::Congressional => 2,
            Self::StateUpper => 3,
            Self::StateLower => 4,
            Self::School => 5,
            Self::Ward => 6,
            Self::Other => 7,
        }
    }

    /// Inverse of [`DistrictLevel::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Council),
            1 => Some(Self::County),
            2 => Some(Self::Congressional),
            3 => Some(Self::StateUpper),
            4 => Some(Self::StateLower),
            5 => Some(Self::School),
            6 => Some(Self::Ward),
            7 => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for DistrictLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable, opaque district identifier, unique within a snapshot.
///
/// Constructed from `{jurisdiction_fips}/{level}/{local_number}`; the
/// derived `Ord` over the string form is the canonical tie-break order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DistrictId(String);

impl DistrictId {
    /// Build the id from its parts.
    pub fn new(jurisdiction: &JurisdictionId, level: DistrictLevel, local_number: u32) -> Self {
        Self(format!("{}/{}/{}", jurisdiction.as_str(), level, local_number))
    }

    /// Wrap an already-formatted id (from a canonical line).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DistrictId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An admitted district with topology-normalized geometry.
///
/// The source polygon as fetched lives in the provenance record, not here.
#[derive(Debug, Clone)]
pub struct District {
    /// Stable identifier.
    pub id: DistrictId,
    /// Owning jurisdiction.
    pub jurisdiction_id: JurisdictionId,
    /// District level.
    pub level: DistrictLevel,
    /// Local district number within the jurisdiction and level.
    pub local_number: u32,
    /// Human-readable name.
    pub display_name: String,
    /// Admitted geometry, exterior-CCW / holes-CW.
    pub polygon: MultiPolygon<f64>,
    /// Canonical attributes: a normalized, stable-ordered subset of the
    /// source record (e.g. representative name when present).
    pub canonical_attributes: BTreeMap<String, String>,
}

/// Serde shape of one canonical district line.
///
/// Field order here IS the canonical key order; geometry is injected as a
/// pre-encoded canonical value.
#[derive(Serialize)]
struct CanonicalLineOut<'a> {
    id: &'a str,
    jurisdiction_id: &'a str,
    level: DistrictLevel,
    local_number: u32,
    display_name: &'a str,
    attributes: &'a BTreeMap<String, String>,
    geometry: &'a serde_json::value::RawValue,
}

#[derive(Deserialize)]
struct CanonicalLineIn {
    id: String,
    jurisdiction_id: String,
    level: DistrictLevel,
    local_number: u32,
    display_name: String,
    attributes: BTreeMap<String, String>,
    geometry: RawGeometry,
}

impl District {
    /// Encode the canonical NDJSON line (without trailing newline).
    ///
    /// These bytes are committed: they are what the leaf hash covers and
    /// what `districts.ndjson` stores, byte for byte.
    pub fn canonical_line(&self) -> String {
        let geometry = encode_canonical(&self.polygon);
        let raw = serde_json::value::RawValue::from_string(geometry)
            .expect("canonical geometry is valid JSON");
        let line = CanonicalLineOut {
            id: self.id.as_str(),
            jurisdiction_id: self.jurisdiction_id.as_str(),
            level: self.level,
            local_number: self.local_number,
            display_name: &self.display_name,
            attributes: &self.canonical_attributes,
            geometry: &raw,
        };
        serde_json::to_string(&line).expect("canonical line serialization failed")
    }

    /// Decode a canonical line back into a district.
    ///
    /// Round-trips with [`District::canonical_line`]: canonical coordinates
    /// are already quantized, so re-encoding reproduces the input bytes.
    pub fn from_canonical_line(line: &str) -> Result<Self, IngestionError> {
        let parsed: CanonicalLineIn =
            serde_json::from_str(line).map_err(|e| IngestionError::MalformedGeometry {
                detail: format!("canonical line: {e}"),
            })?;
        Ok(Self {
            id: DistrictId::from_string(parsed.id),
            jurisdiction_id: JurisdictionId::new(parsed.jurisdiction_id),
            level: parsed.level,
            local_number: parsed.local_number,
            display_name: parsed.display_name,
            polygon: parsed.geometry.decode()?,
            canonical_attributes: parsed.attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_district() -> District {
        let geometry = RawGeometry::from_json(
            r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#,
        )
        .unwrap()
        .decode()
        .unwrap();
        let jurisdiction = JurisdictionId::new("0667000");
        District {
            id: DistrictId::new(&jurisdiction, DistrictLevel::Council, 5),
            jurisdiction_id: jurisdiction,
            level: DistrictLevel::Council,
            local_number: 5,
            display_name: "District 5".to_string(),
            polygon: geometry,
            canonical_attributes: BTreeMap::from([(
                "representative".to_string(),
                "A. Example".to_string(),
            )]),
        }
    }

    #[test]
    fn test_district_id_format_and_order() {
        let j = JurisdictionId::new("0667000");
        let a = DistrictId::new(&j, DistrictLevel::Council, 5);
        let b = DistrictId::new(&j, DistrictLevel::Council, 6);
        assert_eq!(a.as_str(), "0667000/council/5");
        assert!(a < b);
    }

    #[test]
    fn test_level_code_roundtrip() {
        for level in [
            DistrictLevel::Council,
            DistrictLevel::County,
            DistrictLevel::Congressional,
            DistrictLevel::StateUpper,
            DistrictLevel::StateLower,
            DistrictLevel::School,
            DistrictLevel::Ward,
            DistrictLevel::Other,
        ] {
            assert_eq!(DistrictLevel::from_code(level.code()), Some(level));
        }
        assert_eq!(DistrictLevel::from_code(99), None);
    }

    #[test]
    fn test_canonical_line_fixed_key_order() {
        let line = test_district().canonical_line();
        let id_pos = line.find("\"id\"").unwrap();
        let geom_pos = line.find("\"geometry\"").unwrap();
        assert!(id_pos < geom_pos);
        assert!(line.starts_with("{\"id\":"));
        assert!(!line.contains(": "));
    }

    #[test]
    fn test_canonical_line_roundtrip_byte_exact() {
        let district = test_district();
        let line = district.canonical_line();
        let reparsed = District::from_canonical_line(&line).unwrap();
        assert_eq!(reparsed.canonical_line(), line);
        assert_eq!(reparsed.id, district.id);
        assert_eq!(reparsed.local_number, 5);
    }
}
