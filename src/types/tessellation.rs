//! Tessellation verdicts.
//!
//! The validator's verdict is a value, never an exception: a rejection is
//! ordinary data that flows to the quarantine ledger, and an admission
//! carries the measured evidence either way.

use serde::{Deserialize, Serialize};

use crate::types::district::DistrictId;

/// Whether a candidate passed the tessellation axioms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TessellationStatus {
    /// All applicable gates and axioms held.
    Passed,
    /// Some gate or axiom failed.
    Failed,
}

/// The four necessary conditions on a candidate tessellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axiom {
    /// District count matches the declared expectation.
    Cardinality,
    /// No material pairwise overlap.
    Exclusivity,
    /// The union covers the jurisdiction boundary.
    Exhaustivity,
    /// The union stays within the jurisdiction boundary.
    Containment,
}

impl std::fmt::Display for Axiom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cardinality => write!(f, "cardinality"),
            Self::Exclusivity => write!(f, "exclusivity"),
            Self::Exhaustivity => write!(f, "exhaustivity"),
            Self::Containment => write!(f, "containment"),
        }
    }
}

/// Why a subject was quarantined.
///
/// Serializes as its stable code string (`wrong_governance`, `exclusivity`,
/// ...) so ledger records stay greppable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuarantineReason {
    /// Candidate offered for a jurisdiction that does not elect by district.
    WrongGovernance,
    /// Feature count is not plausibly a district set.
    CardinalitySanity,
    /// The candidate covers the wrong geographic area entirely.
    WrongGeographicArea,
    /// Attribute names indicate a different dataset kind (precincts, ZIP
    /// areas, census blocks).
    WrongDataType,
    /// The registry has no boundary polygon for the jurisdiction, so the
    /// geometric axioms cannot run.
    MissingBoundary,
    /// The named axiom failed.
    AxiomFailed(Axiom),
    /// Geometry could not be decoded.
    IngestionFailed,
}

impl QuarantineReason {
    /// Stable reason-code string for ledger records and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WrongGovernance => "wrong_governance",
            Self::CardinalitySanity => "cardinality_sanity",
            Self::WrongGeographicArea => "wrong_geographic_area",
            Self::WrongDataType => "wrong_data_type",
            Self::MissingBoundary => "missing_boundary",
            Self::AxiomFailed(Axiom::Cardinality) => "cardinality",
            Self::AxiomFailed(Axiom::Exclusivity) => "exclusivity",
            Self::AxiomFailed(Axiom::Exhaustivity) => "exhaustivity",
            Self::AxiomFailed(Axiom::Containment) => "containment",
            Self::IngestionFailed => "ingestion_failed",
        }
    }

    /// Parse a stable code string back into a reason.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "wrong_governance" => Some(Self::WrongGovernance),
            "cardinality_sanity" => Some(Self::CardinalitySanity),
            "wrong_geographic_area" => Some(Self::WrongGeographicArea),
            "wrong_data_type" => Some(Self::WrongDataType),
            "missing_boundary" => Some(Self::MissingBoundary),
            "cardinality" => Some(Self::AxiomFailed(Axiom::Cardinality)),
            "exclusivity" => Some(Self::AxiomFailed(Axiom::Exclusivity)),
            "exhaustivity" => Some(Self::AxiomFailed(Axiom::Exhaustivity)),
            "containment" => Some(Self::AxiomFailed(Axiom::Containment)),
            "ingestion_failed" => Some(Self::IngestionFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuarantineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for QuarantineReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for QuarantineReason {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Self::from_code(&code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown reason code: {code}")))
    }
}

/// The structured verdict from the tessellation validator.
///
/// Every measured quantity that fed the decision is recorded, so a review
/// of a quarantined set never needs to re-run the geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TessellationProof {
    /// Overall outcome.
    pub status: TessellationStatus,
    /// The first axiom that failed, when status is `Failed` past the gates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_axiom: Option<Axiom>,
    /// Number of districts in the candidate.
    pub district_count: u32,
    /// Declared expectation, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_count: Option<u32>,
    /// Geodesic area of the jurisdiction boundary, m².
    pub municipal_area_m2: f64,
    /// Geodesic area of the district union, m².
    pub district_union_area_m2: f64,
    /// Total non-sliver pairwise overlap, m².
    pub total_overlap_area_m2: f64,
    /// Boundary interior not covered by any district, m².
    pub uncovered_interior_area_m2: f64,
    /// District union area outside the boundary, m².
    pub outside_boundary_area_m2: f64,
    /// Water fraction of the jurisdiction.
    pub water_ratio: f64,
    /// union area / boundary area.
    pub coverage_ratio: f64,
    /// Districts whose removal would restore admissibility.
    pub problematic_district_ids: Vec<DistrictId>,
    /// Free-form notes (tolerated deviations, skip markers, exceptions).
    pub notes: Vec<String>,
}

impl TessellationProof {
    /// An empty proof for verdicts reached before any geometry ran
    /// (pre-gate rejections and the at-large bypass).
    pub fn pre_geometric(district_count: u32, expected_count: Option<u32>) -> Self {
        Self {
            status: TessellationStatus::Failed,
            failed_axiom: None,
            district_count,
            expected_count,
            municipal_area_m2: 0.0,
            district_union_area_m2: 0.0,
            total_overlap_area_m2: 0.0,
            uncovered_interior_area_m2: 0.0,
            outside_boundary_area_m2: 0.0,
            water_ratio: 0.0,
            coverage_ratio: 0.0,
            problematic_district_ids: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Add a note, builder-style.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}
