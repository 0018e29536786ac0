//! Snapshot builder: canonical ordering, leaf hashing, tree and proof
//! assembly, coverage reporting.
//!
//! Single-threaded on purpose. Everything here must be a deterministic
//! function of the admitted inputs: re-running the build with identical
//! inputs yields byte-identical `districts.ndjson`, the same `content_id`,
//! the same root, and the same proofs.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::canonical::sha256_hex;
use crate::config::LeafHashAlgorithm;
use crate::registry::BoundaryRegistry;
use crate::snapshot::tree::MerkleTree;
use crate::snapshot::{
    CoverageSummary, SnapshotBuildError, SnapshotManifest, SNAPSHOT_SCHEMA_VERSION,
};
use crate::types::{
    hash_leaf, District, JurisdictionId, MerkleProof, Provenance, TessellationProof,
};

/// How a jurisdiction's records entered this snapshot generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionOrigin {
    /// Freshly validated this generation.
    Fresh,
    /// The fresh candidate was rejected; the prior snapshot's records were
    /// carried forward unchanged.
    CarriedForward,
    /// At-large bypass: admitted with zero polygons.
    AtLargeBypass,
}

/// One jurisdiction's admitted outcome, as handed to the builder.
#[derive(Debug, Clone)]
pub struct AdmittedSet {
    /// The jurisdiction.
    pub jurisdiction_id: JurisdictionId,
    /// The validator's evidence.
    pub proof: TessellationProof,
    /// Admitted districts (empty for an at-large bypass).
    pub districts: Vec<District>,
    /// Provenance records, aligned index-for-index with `districts`.
    pub provenance: Vec<Provenance>,
    /// How these records entered the generation.
    pub origin: AdmissionOrigin,
}

/// Per-jurisdiction coverage entry written to `coverage.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionCoverage {
    /// Admitted district count.
    pub district_count: u32,
    /// union area / boundary area.
    pub coverage_ratio: f64,
    /// Water fraction used for threshold selection.
    pub water_ratio: f64,
    /// Whether a documented consolidated exception was applied.
    pub consolidated_exception: bool,
    /// How the records entered this generation.
    pub origin: AdmissionOrigin,
    /// Validator notes.
    pub notes: Vec<String>,
}

/// The full `coverage.json` artifact.
pub type CoverageReport = BTreeMap<JurisdictionId, JurisdictionCoverage>;

/// Everything a build produces, ready for the store to publish.
#[derive(Debug)]
pub struct BuiltSnapshot {
    /// The manifest.
    pub manifest: SnapshotManifest,
    /// Districts in canonical order.
    pub districts: Vec<District>,
    /// Canonical NDJSON lines, aligned with `districts`.
    pub canonical_lines: Vec<String>,
    /// Provenance records, aligned with `districts`.
    pub provenance: Vec<Provenance>,
    /// The Merkle tree.
    pub tree: MerkleTree,
    /// Pre-computed proofs, one per leaf, aligned with `districts`.
    pub proofs: Vec<MerkleProof>,
    /// Per-jurisdiction coverage.
    pub coverage: CoverageReport,
}

/// The snapshot builder.
pub struct SnapshotBuilder {
    snapshot_id: String,
    algorithm: LeafHashAlgorithm,
}

impl SnapshotBuilder {
    /// Create a builder for the given quarterly id.
    pub fn new(snapshot_id: impl Into<String>, algorithm: LeafHashAlgorithm) -> Self {
        Self {
            snapshot_id: snapshot_id.into(),
            algorithm,
        }
    }

    /// Assemble the snapshot from admitted sets.
    ///
    /// Empty snapshots are rejected: a commitment over nothing protects
    /// nothing.
    pub fn build(
        &self,
        sets: Vec<AdmittedSet>,
        registry: &BoundaryRegistry,
    ) -> Result<BuiltSnapshot, SnapshotBuildError> {
        // Canonical order: (country, state, jurisdiction_id, level,
        // local_number, id). Country and state come from the registry.
        let mut keyed: Vec<(SortKey, District, Provenance)> = Vec::new();
        for set in &sets {
            for (district, provenance) in set.districts.iter().zip(&set.provenance) {
                let Some(jurisdiction) = registry.get(&district.jurisdiction_id) else {
                    return Err(SnapshotBuildError::UnknownJurisdiction {
                        district: district.id.to_string(),
                        jurisdiction: district.jurisdiction_id.to_string(),
                    });
                };
                keyed.push((
                    SortKey {
                        country: jurisdiction.country.clone(),
                        state: jurisdiction.state.clone(),
                        jurisdiction_id: district.jurisdiction_id.clone(),
                        level: district.level,
                        local_number: district.local_number,
                        id: district.id.clone(),
                    },
                    district.clone(),
                    provenance.clone(),
                ));
            }
        }
        if keyed.is_empty() {
            return Err(SnapshotBuildError::EmptyAdmittedSet);
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        for pair in keyed.windows(2) {
            if pair[0].1.id == pair[1].1.id {
                return Err(SnapshotBuildError::DuplicateDistrict(pair[0].1.id.to_string()));
            }
        }

        let districts: Vec<District> = keyed.iter().map(|k| k.1.clone()).collect();
        let provenance: Vec<Provenance> = keyed.into_iter().map(|k| k.2).collect();
        let canonical_lines: Vec<String> = districts.iter().map(|d| d.canonical_line()).collect();

        // Leaf hashing with collision surveillance; a collision on
        // canonical bytes means the commitment cannot distinguish two
        // districts and the build must die.
        let mut leaves = Vec::with_capacity(canonical_lines.len());
        let mut seen = BTreeMap::new();
        for (district, line) in districts.iter().zip(&canonical_lines) {
            let leaf = hash_leaf(self.algorithm, line.as_bytes());
            if let Some(prior) = seen.insert(leaf, district.id.clone()) {
                return Err(SnapshotBuildError::LeafCollision {
                    left: prior.to_string(),
                    right: district.id.to_string(),
                });
            }
            leaves.push(leaf);
        }

        let tree = MerkleTree::from_leaves(self.algorithm, &leaves)?;
        let proofs: Vec<MerkleProof> = (0..tree.leaf_count())
            .map(|i| tree.proof(i).expect("index within leaf count"))
            .collect();

        let mut ndjson = String::new();
        for line in &canonical_lines {
            ndjson.push_str(line);
            ndjson.push('\n');
        }
        let content_id = sha256_hex(ndjson.as_bytes());

        let coverage = coverage_report(&sets);
        let summary = summarize(&sets, districts.len() as u32);

        let manifest = SnapshotManifest {
            snapshot_id: self.snapshot_id.clone(),
            content_id,
            merkle_root: tree.root(),
            generated_at: Utc::now(),
            district_count: districts.len() as u32,
            tree_depth: tree.depth(),
            schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            coverage_summary: summary,
        };

        tracing::info!(
            snapshot = %manifest.snapshot_id,
            districts = manifest.district_count,
            depth = manifest.tree_depth,
            root = %manifest.merkle_root,
            "snapshot built"
        );

        Ok(BuiltSnapshot {
            manifest,
            districts,
            canonical_lines,
            provenance,
            tree,
            proofs,
            coverage,
        })
    }
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    country: String,
    state: String,
    jurisdiction_id: JurisdictionId,
    level: crate::types::DistrictLevel,
    local_number: u32,
    id: crate::types::DistrictId,
}

fn coverage_report(sets: &[AdmittedSet]) -> CoverageReport {
    sets.iter()
        .map(|set| {
            let consolidated = set
                .proof
                .notes
                .iter()
                .any(|n| n.contains("consolidated exception applied"));
            (
                set.jurisdiction_id.clone(),
                JurisdictionCoverage {
                    district_count: set.districts.len() as u32,
                    coverage_ratio: set.proof.coverage_ratio,
                    water_ratio: set.proof.water_ratio,
                    consolidated_exception: consolidated,
                    origin: set.origin,
                    notes: set.proof.notes.clone(),
                },
            )
        })
        .collect()
}

fn summarize(sets: &[AdmittedSet], district_count: u32) -> CoverageSummary {
    CoverageSummary {
        jurisdiction_count: sets.iter().filter(|s| !s.districts.is_empty()).count() as u32,
        district_count,
        at_large_count: sets
            .iter()
            .filter(|s| s.origin == AdmissionOrigin::AtLargeBypass)
            .count() as u32,
        carried_forward_count: sets
            .iter()
            .filter(|s| s.origin == AdmissionOrigin::CarriedForward)
            .count() as u32,
        consolidated_exception_count: sets
            .iter()
            .filter(|s| {
                s.proof
                    .notes
                    .iter()
                    .any(|n| n.contains("consolidated exception applied"))
            })
            .count() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::RawGeometry;
    use crate::types::{
        AuthorityLevel, DistrictId, DistrictLevel, GovernanceKind, Jurisdiction, JurisdictionLevel,
        TessellationStatus,
    };
    use std::collections::BTreeMap as Map;

    const ALGO: LeafHashAlgorithm = LeafHashAlgorithm::Sha256_31;

    fn jurisdiction(id: &str, state: &str) -> Jurisdiction {
        Jurisdiction {
            id: JurisdictionId::new(id),
            display_name: format!("Test {id}"),
            country: "US".to_string(),
            state: state.to_string(),
            level: JurisdictionLevel::Municipality,
            parent_id: None,
            expected_district_count: None,
            governance_kind: GovernanceKind::DistrictBased,
            known_overflow_ratio: None,
            water_ratio: 0.0,
            redistricting_cycle: None,
            boundary_polygon: None,
        }
    }

    fn district(jid: &str, n: u32, x0: f64) -> District {
        let j = JurisdictionId::new(jid);
        District {
            id: DistrictId::new(&j, DistrictLevel::Council, n),
            jurisdiction_id: j,
            level: DistrictLevel::Council,
            local_number: n,
            display_name: format!("District {n}"),
            polygon: RawGeometry::from_json(&format!(
                r#"{{"type":"Polygon","coordinates":[[[{x0},0],[{x1},0],[{x1},1],[{x0},1],[{x0},0]]]}}"#,
                x0 = x0,
                x1 = x0 + 0.1,
            ))
            .unwrap()
            .decode()
            .unwrap(),
            canonical_attributes: Map::new(),
        }
    }

    fn provenance_for(d: &District) -> Provenance {
        Provenance {
            district_id: d.id.clone(),
            source_url: "https://data.example.gov/d.geojson".to_string(),
            authority_level: AuthorityLevel::Municipal,
            acquired_at: Utc::now(),
            response_content_hash: "11".repeat(32),
            source_attributes: Map::new(),
            effective_from: Utc::now(),
            effective_to: None,
        }
    }

    fn passed_proof(count: u32) -> TessellationProof {
        TessellationProof {
            status: TessellationStatus::Passed,
            ..TessellationProof::pre_geometric(count, Some(count))
        }
    }

    fn admitted(jid: &str, districts: Vec<District>) -> AdmittedSet {
        let provenance = districts.iter().map(provenance_for).collect();
        AdmittedSet {
            jurisdiction_id: JurisdictionId::new(jid),
            proof: passed_proof(districts.len() as u32),
            districts,
            provenance,
            origin: AdmissionOrigin::Fresh,
        }
    }

    fn registry() -> BoundaryRegistry {
        BoundaryRegistry::from_jurisdictions([
            jurisdiction("0667000", "CA"),
            jurisdiction("4805000", "TX"),
        ])
    }

    #[test]
    fn test_canonical_order_by_state_then_number() {
        let builder = SnapshotBuilder::new("2026-Q1", ALGO);
        // Offer Texas first; California must sort ahead of it.
        let sets = vec![
            admitted("4805000", vec![district("4805000", 1, 0.0)]),
            admitted("0667000", vec![district("0667000", 2, 0.2), district("0667000", 1, 0.1)]),
        ];
        let built = builder.build(sets, &registry()).unwrap();
        let ids: Vec<&str> = built.districts.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["0667000/council/1", "0667000/council/2", "4805000/council/1"]
        );
        assert_eq!(built.manifest.district_count, 3);
        assert_eq!(built.manifest.tree_depth, 2);
    }

    #[test]
    fn test_build_deterministic_across_input_order() {
        let builder = SnapshotBuilder::new("2026-Q1", ALGO);
        let sets_a = vec![
            admitted("0667000", vec![district("0667000", 1, 0.0)]),
            admitted("4805000", vec![district("4805000", 1, 0.5)]),
        ];
        let sets_b = vec![
            admitted("4805000", vec![district("4805000", 1, 0.5)]),
            admitted("0667000", vec![district("0667000", 1, 0.0)]),
        ];
        let a = builder.build(sets_a, &registry()).unwrap();
        let b = builder.build(sets_b, &registry()).unwrap();
        assert_eq!(a.manifest.merkle_root, b.manifest.merkle_root);
        assert_eq!(a.manifest.content_id, b.manifest.content_id);
        assert_eq!(a.canonical_lines, b.canonical_lines);
        assert_eq!(a.tree.flatten(), b.tree.flatten());
    }

    #[test]
    fn test_every_proof_verifies_against_root() {
        let builder = SnapshotBuilder::new("2026-Q1", ALGO);
        let sets = vec![admitted(
            "0667000",
            (1..=5).map(|n| district("0667000", n, 0.1 * n as f64)).collect(),
        )];
        let built = builder.build(sets, &registry()).unwrap();
        assert_eq!(built.proofs.len(), 5);
        for (i, proof) in built.proofs.iter().enumerate() {
            assert_eq!(proof.leaf_index as usize, i);
            assert!(proof.verify(ALGO));
            assert_eq!(proof.merkle_root, built.manifest.merkle_root);
        }
    }

    #[test]
    fn test_empty_build_rejected() {
        let builder = SnapshotBuilder::new("2026-Q1", ALGO);
        let err = builder.build(vec![], &registry()).unwrap_err();
        assert!(matches!(err, SnapshotBuildError::EmptyAdmittedSet));

        // At-large-only input is empty too: zero polygons were admitted.
        let at_large_only = vec![AdmittedSet {
            jurisdiction_id: JurisdictionId::new("0667000"),
            proof: passed_proof(0),
            districts: vec![],
            provenance: vec![],
            origin: AdmissionOrigin::AtLargeBypass,
        }];
        assert!(matches!(
            builder.build(at_large_only, &registry()),
            Err(SnapshotBuildError::EmptyAdmittedSet)
        ));
    }

    #[test]
    fn test_duplicate_district_rejected() {
        let builder = SnapshotBuilder::new("2026-Q1", ALGO);
        let sets = vec![
            admitted("0667000", vec![district("0667000", 1, 0.0)]),
            admitted("0667000", vec![district("0667000", 1, 0.0)]),
        ];
        assert!(matches!(
            builder.build(sets, &registry()),
            Err(SnapshotBuildError::DuplicateDistrict(_))
        ));
    }

    #[test]
    fn test_unknown_jurisdiction_rejected() {
        let builder = SnapshotBuilder::new("2026-Q1", ALGO);
        let sets = vec![admitted("9999999", vec![district("9999999", 1, 0.0)])];
        assert!(matches!(
            builder.build(sets, &registry()),
            Err(SnapshotBuildError::UnknownJurisdiction { .. })
        ));
    }

    #[test]
    fn test_content_id_covers_ndjson_bytes() {
        let builder = SnapshotBuilder::new("2026-Q1", ALGO);
        let sets = vec![admitted("0667000", vec![district("0667000", 1, 0.0)])];
        let built = builder.build(sets, &registry()).unwrap();
        let ndjson = format!("{}\n", built.canonical_lines.join("\n"));
        assert_eq!(built.manifest.content_id, sha256_hex(ndjson.as_bytes()));
    }

    #[test]
    fn test_coverage_report_origins() {
        let builder = SnapshotBuilder::new("2026-Q1", ALGO);
        let mut carried = admitted("4805000", vec![district("4805000", 1, 0.5)]);
        carried.origin = AdmissionOrigin::CarriedForward;
        let sets = vec![admitted("0667000", vec![district("0667000", 1, 0.0)]), carried];
        let built = builder.build(sets, &registry()).unwrap();
        assert_eq!(built.manifest.coverage_summary.carried_forward_count, 1);
        assert_eq!(
            built.coverage[&JurisdictionId::new("4805000")].origin,
            AdmissionOrigin::CarriedForward
        );
    }
}
