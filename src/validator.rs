//! Tessellation validator.
//!
//! Decides whether a candidate district set is admissible for one
//! jurisdiction. The verdict is always a value: data-quality problems
//! produce rejections that flow to quarantine, never errors.
//!
//! ## Decision order
//!
//! Pre-gates run first and short-circuit to a specific reason code:
//! at-large bypass, governance, feature-count sanity, centroid sanity,
//! attribute sanity. Only when every gate passes do the four axioms run:
//! cardinality, exclusivity, exhaustivity, containment. The first failure
//! wins; later axioms are not evaluated.

use geo::{BooleanOps, MultiPolygon};
use rstar::{RTree, AABB};

use crate::config::ToleranceConfig;
use crate::geometry::{
    area_m2, bounding_box, centroid, difference_area_m2, distance_m, is_sliver, union_all,
    BoundingBox,
};
use crate::registry::{AtLargeRegistry, BoundaryRegistry};
use crate::types::{
    Axiom, CandidateDistrictSet, DecodedDistrict, District, DistrictId, Jurisdiction,
    QuarantineReason, TessellationProof, TessellationStatus,
};

/// Verdict from the validator.
#[derive(Debug, Clone)]
pub enum TessellationResult {
    /// The candidate is admissible; `districts` carries the materialized,
    /// topology-normalized records (empty for an at-large bypass).
    Admitted {
        /// Evidence for the admission.
        proof: TessellationProof,
        /// The admitted districts.
        districts: Vec<District>,
    },
    /// The candidate is not admissible.
    Rejected {
        /// Evidence for the rejection.
        proof: TessellationProof,
        /// Stable reason code for the quarantine ledger.
        reason: QuarantineReason,
    },
}

impl TessellationResult {
    /// Whether the candidate was admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    /// The proof, whichever way the verdict went.
    pub fn proof(&self) -> &TessellationProof {
        match self {
            Self::Admitted { proof, .. } => proof,
            Self::Rejected { proof, .. } => proof,
        }
    }
}

/// Attribute-name tokens that indicate a non-district dataset.
const FOREIGN_TOKENS: &str = r"precinct|zip|zcta|census|block|tract";
/// Attribute-name tokens that indicate a district dataset.
const DISTRICT_TOKENS: &str = r"council|ward|district|commission|supervisor|seat";

/// The tessellation validator.
///
/// Holds read-only references to the declared expectations; all mutable
/// state (quarantine, snapshot assembly) belongs to the pipeline around it.
pub struct TessellationValidator<'a> {
    registry: &'a BoundaryRegistry,
    at_large: &'a AtLargeRegistry,
    tolerances: &'a ToleranceConfig,
}

impl<'a> TessellationValidator<'a> {
    /// Create a validator over the given registries and tolerances.
    pub fn new(
        registry: &'a BoundaryRegistry,
        at_large: &'a AtLargeRegistry,
        tolerances: &'a ToleranceConfig,
    ) -> Self {
        Self {
            registry,
            at_large,
            tolerances,
        }
    }

    /// Validate one candidate set.
    pub fn validate(&self, candidate: &CandidateDistrictSet) -> TessellationResult {
        let count = candidate.districts.len() as u32;
        let expected = self.registry.expected_count(&candidate.jurisdiction_id);

        // At-large bypass: consulted before any geometric work. The
        // admission carries zero districts; nothing geographic exists to
        // commit.
        if self.at_large.contains(&candidate.jurisdiction_id) {
            let proof = TessellationProof {
                status: TessellationStatus::Passed,
                ..TessellationProof::pre_geometric(count, expected)
            }
            .with_note("skip: at-large");
            return TessellationResult::Admitted {
                proof,
                districts: Vec::new(),
            };
        }

        let Some(jurisdiction) = self.registry.get(&candidate.jurisdiction_id) else {
            let proof = TessellationProof::pre_geometric(count, expected)
                .with_note("jurisdiction not in registry");
            return self.reject(candidate, proof, QuarantineReason::WrongGovernance);
        };

        if !jurisdiction.governance_kind.has_districts() {
            let proof = TessellationProof::pre_geometric(count, expected);
            return self.reject(candidate, proof, QuarantineReason::WrongGovernance);
        }

        // Feature-count sanity: wildly wrong counts are a different dataset,
        // not a cardinality violation.
        if let Some(expected) = expected {
            let deviation = count.abs_diff(expected);
            let budget = 2u32.max(expected / 2);
            if deviation > budget || (expected > 0 && count > 3 * expected) {
                let proof = TessellationProof::pre_geometric(count, Some(expected));
                return self.reject(candidate, proof, QuarantineReason::CardinalitySanity);
            }
        }
        if count == 0 {
            let proof = TessellationProof::pre_geometric(0, expected);
            return self.reject(candidate, proof, QuarantineReason::CardinalitySanity);
        }

        let decoded = match candidate.decode() {
            Ok(d) => d,
            Err(e) => {
                let proof =
                    TessellationProof::pre_geometric(count, expected).with_note(e.to_string());
                return self.reject(candidate, proof, QuarantineReason::IngestionFailed);
            }
        };

        let Some(boundary) = jurisdiction.boundary_polygon.as_ref() else {
            let proof = TessellationProof::pre_geometric(count, expected);
            return self.reject(candidate, proof, QuarantineReason::MissingBoundary);
        };

        // Centroid sanity: right count, wrong place — a different city's
        // districts under the wrong FIPS.
        let union = union_all(&decoded.iter().map(|d| d.geometry.clone()).collect::<Vec<_>>());
        if let (Some(union_centroid), Some(boundary_centroid)) = (centroid(&union), centroid(boundary))
        {
            let displacement_km = distance_m(union_centroid, boundary_centroid) / 1000.0;
            if displacement_km > self.tolerances.centroid_displacement_km {
                let proof = TessellationProof::pre_geometric(count, expected).with_note(format!(
                    "union centroid displaced {displacement_km:.1} km from municipal centroid"
                ));
                return self.reject(candidate, proof, QuarantineReason::WrongGeographicArea);
            }
        }

        // Attribute sanity: the last pre-gate before the axioms.
        if self.attributes_look_foreign(candidate) {
            let proof = TessellationProof::pre_geometric(count, expected)
                .with_note("attribute names indicate precinct/zip/census data");
            return self.reject(candidate, proof, QuarantineReason::WrongDataType);
        }

        self.validate_geometry(candidate, jurisdiction, boundary, union, &decoded)
    }

    fn reject(
        &self,
        candidate: &CandidateDistrictSet,
        proof: TessellationProof,
        reason: QuarantineReason,
    ) -> TessellationResult {
        tracing::warn!(
            jurisdiction = %candidate.jurisdiction_id,
            level = %candidate.level,
            reason = %reason,
            count = candidate.districts.len(),
            "candidate rejected"
        );
        TessellationResult::Rejected { proof, reason }
    }

    fn attributes_look_foreign(&self, candidate: &CandidateDistrictSet) -> bool {
        let foreign = regex_lite::Regex::new(FOREIGN_TOKENS).expect("static pattern");
        let district = regex_lite::Regex::new(DISTRICT_TOKENS).expect("static pattern");
        let mut saw_foreign = false;
        for d in &candidate.districts {
            for key in d.raw_attributes.keys() {
                let key = key.to_lowercase();
                if district.is_match(&key) {
                    return false;
                }
                if foreign.is_match(&key) {
                    saw_foreign = true;
                }
            }
        }
        saw_foreign
    }

    fn validate_geometry(
        &self,
        candidate: &CandidateDistrictSet,
        jurisdiction: &Jurisdiction,
        boundary: &MultiPolygon<f64>,
        union: MultiPolygon<f64>,
        decoded: &[DecodedDistrict],
    ) -> TessellationResult {
        let count = decoded.len() as u32;
        let expected = jurisdiction.expected_district_count;
        let tol = self.tolerances;

        let ids: Vec<DistrictId> = decoded
            .iter()
            .map(|d| DistrictId::new(&candidate.jurisdiction_id, candidate.level, d.local_number))
            .collect();
        let geometries: Vec<&MultiPolygon<f64>> = decoded.iter().map(|d| &d.geometry).collect();

        let mut notes: Vec<String> = decoded
            .iter()
            .filter(|d| d.repair_refused)
            .map(|d| format!("repair_refused: district {}", d.local_number))
            .collect();

        let municipal_area_m2 = area_m2(boundary);
        let district_union_area_m2 = area_m2(&union);
        let outside_boundary_area_m2 = difference_area_m2(&union, boundary);
        let uncovered_interior_area_m2 = difference_area_m2(boundary, &union);
        let coverage_ratio = if municipal_area_m2 > 0.0 {
            district_union_area_m2 / municipal_area_m2
        } else {
            0.0
        };
        let water_ratio = jurisdiction.water_ratio;

        let mut proof = TessellationProof {
            status: TessellationStatus::Passed,
            failed_axiom: None,
            district_count: count,
            expected_count: expected,
            municipal_area_m2,
            district_union_area_m2,
            total_overlap_area_m2: 0.0,
            uncovered_interior_area_m2,
            outside_boundary_area_m2,
            water_ratio,
            coverage_ratio,
            problematic_district_ids: Vec::new(),
            notes: Vec::new(),
        };

        // Axiom 1: cardinality. Small councils tolerate ±2 with a note.
        if let Some(expected) = expected {
            if count != expected {
                let deviation = count.abs_diff(expected);
                if expected < 10 && deviation <= 2 {
                    notes.push(format!(
                        "cardinality deviation tolerated: {count} districts, {expected} expected"
                    ));
                } else {
                    proof.status = TessellationStatus::Failed;
                    proof.failed_axiom = Some(Axiom::Cardinality);
                    proof.notes = notes;
                    return self.reject(
                        candidate,
                        proof,
                        QuarantineReason::AxiomFailed(Axiom::Cardinality),
                    );
                }
            }
        }

        // Axiom 2: exclusivity. R-tree-pruned pairwise intersection; thin
        // slivers never count against the budget.
        let overlaps = pairwise_overlaps(&geometries);
        let total_overlap_area_m2: f64 = overlaps.iter().map(|o| o.area_m2).sum();
        proof.total_overlap_area_m2 = total_overlap_area_m2;
        if let Some(worst) = overlaps
            .iter()
            .filter(|o| o.area_m2 > tol.overlap_epsilon_m2)
            .max_by(|a, b| a.area_m2.total_cmp(&b.area_m2))
        {
            proof.status = TessellationStatus::Failed;
            proof.failed_axiom = Some(Axiom::Exclusivity);
            proof.problematic_district_ids =
                greedy_overlap_removal(&overlaps, &ids, tol.overlap_epsilon_m2);
            notes.push(format!(
                "largest overlap {:.0} m2 between districts {} and {}",
                worst.area_m2, ids[worst.i], ids[worst.j]
            ));
            proof.notes = notes;
            return self.reject(
                candidate,
                proof,
                QuarantineReason::AxiomFailed(Axiom::Exclusivity),
            );
        }

        // Axiom 3: exhaustivity, with the coastal upper bound when the
        // jurisdiction's water fraction crosses the threshold. A documented
        // consolidated overflow also lifts the ceiling to the coverage it
        // implies: a council whose territory legitimately extends r beyond
        // the census place has union area 1/(1-r) times the boundary.
        let overflow_exception = jurisdiction.known_overflow_ratio;
        let plain_coverage_max = tol.coverage_max(water_ratio);
        let coverage_max = match overflow_exception {
            Some(r) if r < 1.0 => plain_coverage_max.max(1.0 / (1.0 - r)),
            _ => plain_coverage_max,
        };
        if jurisdiction.is_coastal(tol.coastal_water_ratio) {
            notes.push(format!(
                "coastal jurisdiction (water_ratio {water_ratio:.2}); coverage bound {coverage_max:.2}"
            ));
        }
        if coverage_ratio < tol.coverage_min || coverage_ratio > coverage_max {
            proof.status = TessellationStatus::Failed;
            proof.failed_axiom = Some(Axiom::Exhaustivity);
            proof.notes = notes;
            proof = proof.with_note(format!(
                "coverage {coverage_ratio:.3} outside [{:.2}, {coverage_max:.2}]",
                tol.coverage_min
            ));
            return self.reject(
                candidate,
                proof,
                QuarantineReason::AxiomFailed(Axiom::Exhaustivity),
            );
        }

        // Axiom 4: containment, modulo a documented consolidated exception.
        let outside_ratio = if district_union_area_m2 > 0.0 {
            outside_boundary_area_m2 / district_union_area_m2
        } else {
            0.0
        };
        let base_budget = 1.0 - 1.0 / coverage_max;
        let allowed = overflow_exception.map_or(base_budget, |r| r.max(base_budget));
        if outside_ratio > allowed {
            proof.status = TessellationStatus::Failed;
            proof.failed_axiom = Some(Axiom::Containment);
            proof.problematic_district_ids =
                greedy_outside_removal(&geometries, &ids, boundary, allowed);
            proof.notes = notes;
            proof = proof.with_note(format!(
                "outside-boundary ratio {outside_ratio:.3} exceeds budget {allowed:.3}"
            ));
            return self.reject(
                candidate,
                proof,
                QuarantineReason::AxiomFailed(Axiom::Containment),
            );
        }
        let plain_budget = 1.0 - 1.0 / plain_coverage_max;
        if overflow_exception.is_some() && outside_ratio > plain_budget {
            notes.push(format!(
                "consolidated exception applied: outside ratio {outside_ratio:.3} within documented {:.2}",
                overflow_exception.unwrap_or_default()
            ));
        }

        proof.notes = notes;
        tracing::info!(
            jurisdiction = %candidate.jurisdiction_id,
            level = %candidate.level,
            districts = count,
            coverage = format!("{coverage_ratio:.3}"),
            "candidate admitted"
        );

        let districts = decoded
            .iter()
            .zip(ids)
            .map(|(d, id)| District {
                id,
                jurisdiction_id: candidate.jurisdiction_id.clone(),
                level: candidate.level,
                local_number: d.local_number,
                display_name: d.display_name.clone(),
                polygon: d.geometry.clone(),
                canonical_attributes: d.canonical_attributes(),
            })
            .collect();

        TessellationResult::Admitted { proof, districts }
    }
}

/// One measured, non-sliver pairwise overlap.
#[derive(Debug, Clone)]
struct Overlap {
    i: usize,
    j: usize,
    area_m2: f64,
}

/// All non-sliver pairwise overlaps, pruned by bounding box.
fn pairwise_overlaps(geometries: &[&MultiPolygon<f64>]) -> Vec<Overlap> {
    let entries: Vec<BoundingBox> = geometries
        .iter()
        .enumerate()
        .filter_map(|(i, mp)| bounding_box(mp).map(|rect| BoundingBox::new(i, rect)))
        .collect();
    let rtree = RTree::bulk_load(entries);

    let mut overlaps = Vec::new();
    for (i, mp) in geometries.iter().enumerate() {
        let Some(rect) = bounding_box(mp) else { continue };
        let search = AABB::from_corners(rect.min().into(), rect.max().into());
        for other in rtree.locate_in_envelope_intersecting(&search) {
            let j = other.idx();
            if j <= i {
                continue;
            }
            let region = mp.intersection(geometries[j]);
            let area = area_m2(&region);
            if area <= 0.0 || is_sliver(&region) {
                continue;
            }
            overlaps.push(Overlap { i, j, area_m2: area });
        }
    }
    overlaps
}

/// Greedily pick the districts whose removal restores exclusivity,
/// largest marginal overlap contribution first.
fn greedy_overlap_removal(
    overlaps: &[Overlap],
    ids: &[DistrictId],
    epsilon_m2: f64,
) -> Vec<DistrictId> {
    let mut live: Vec<Overlap> = overlaps.to_vec();
    let mut removed = Vec::new();
    loop {
        if !live.iter().any(|o| o.area_m2 > epsilon_m2) {
            break;
        }
        let mut contribution: std::collections::BTreeMap<usize, f64> = Default::default();
        for o in &live {
            *contribution.entry(o.i).or_default() += o.area_m2;
            *contribution.entry(o.j).or_default() += o.area_m2;
        }
        let Some((&worst, _)) = contribution
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(a.0)))
        else {
            break;
        };
        removed.push(ids[worst].clone());
        live.retain(|o| o.i != worst && o.j != worst);
    }
    removed.sort();
    removed
}

/// Greedily pick the districts whose removal brings the outside-boundary
/// ratio back under budget.
fn greedy_outside_removal(
    geometries: &[&MultiPolygon<f64>],
    ids: &[DistrictId],
    boundary: &MultiPolygon<f64>,
    allowed_ratio: f64,
) -> Vec<DistrictId> {
    let mut stats: Vec<(usize, f64, f64)> = geometries
        .iter()
        .enumerate()
        .map(|(i, mp)| {
            let total = area_m2(mp);
            let outside = difference_area_m2(mp, boundary);
            (i, total, outside)
        })
        .collect();
    stats.sort_by(|a, b| b.2.total_cmp(&a.2));

    let mut union_area: f64 = stats.iter().map(|s| s.1).sum();
    let mut outside_area: f64 = stats.iter().map(|s| s.2).sum();
    let mut removed = Vec::new();
    for (i, total, outside) in stats {
        if union_area <= 0.0 || outside_area / union_area <= allowed_ratio {
            break;
        }
        if outside <= 0.0 {
            break;
        }
        removed.push(ids[i].clone());
        union_area -= total;
        outside_area -= outside;
    }
    removed.sort();
    removed
}
