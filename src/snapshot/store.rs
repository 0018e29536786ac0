//! Snapshot storage: on-disk layout, atomic publication, integrity
//! checking, and the read path the lookup service runs on.
//!
//! ## Layout
//!
//! ```text
//! <snapshot_dir>/
//!   <snapshot_id>/
//!     manifest.json       SnapshotManifest
//!     districts.ndjson    one canonical District per line, canonical order
//!     provenance.ndjson   one Provenance per line, same order
//!     tree.bin            depth-prefixed array of node hashes
//!     proofs.bin          fixed-size records, one per leaf index
//!     coverage.json       per-jurisdiction coverage summary
//!     index.bin           fixed-size spatial index records
//!   current -> <snapshot_id>
//! ```
//!
//! Publication writes the new directory on a scratch path, renames it into
//! place, then atomically replaces the `current` symlink. Readers opening
//! `current` observe either the old or the new snapshot, never a torn
//! state; old snapshot files stay on disk while any handle is live.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write as _;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use geo::{Intersects, Rect};

use crate::config::LeafHashAlgorithm;
use crate::geometry::{contains, minimum_distance_m, on_boundary, Coordinate};
use crate::index::{build_records, decode_index, encode_index, IndexRecord, SpatialIndex};
use crate::canonical::{digests_equal, sha256_hex};
use crate::snapshot::tree::MerkleTree;
use crate::snapshot::{BuiltSnapshot, SnapshotBuildError, SnapshotManifest};
use crate::types::{hash_leaf, District, DistrictLevel, LeafHash, MerkleProof, Provenance};

/// Name of the `current` symlink.
pub const CURRENT_LINK: &str = "current";
/// Marker file written when a snapshot fails its integrity check.
pub const UNUSABLE_MARKER: &str = "unusable";

/// Integrity and read-path failures.
///
/// An integrity failure demotes the snapshot; it is never retried silently.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    /// Filesystem failure.
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
    /// The requested snapshot does not exist.
    #[error("snapshot {0} not found")]
    NotFound(String),
    /// No usable snapshot exists at all.
    #[error("no usable snapshot available")]
    NoUsableSnapshot,
    /// An artifact failed to parse.
    #[error("snapshot {snapshot_id}: corrupt {artifact}: {detail}")]
    Corrupt {
        /// Which snapshot.
        snapshot_id: String,
        /// Which artifact file.
        artifact: &'static str,
        /// What was wrong.
        detail: String,
    },
    /// The stored tree does not rehash to the committed root.
    #[error("snapshot {snapshot_id}: merkle tree does not rehash to {expected_root}")]
    RootMismatch {
        /// Which snapshot.
        snapshot_id: String,
        /// The root the manifest commits to.
        expected_root: LeafHash,
    },
    /// `districts.ndjson` does not hash to the committed content id.
    #[error("snapshot {snapshot_id}: districts.ndjson does not hash to content_id")]
    ContentMismatch {
        /// Which snapshot.
        snapshot_id: String,
    },
}

/// Store rooted at the configured snapshot directory.
pub struct SnapshotStore {
    root: PathBuf,
    algorithm: LeafHashAlgorithm,
}

impl SnapshotStore {
    /// Create a store over `snapshot_dir`.
    pub fn new(snapshot_dir: impl Into<PathBuf>, algorithm: LeafHashAlgorithm) -> Self {
        Self {
            root: snapshot_dir.into(),
            algorithm,
        }
    }

    /// The store's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Published snapshot ids in ascending (chronological) order.
    ///
    /// Quarterly ids sort lexically in time order, so no timestamps are
    /// consulted.
    pub fn list(&self) -> std::io::Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == CURRENT_LINK || name.starts_with('.') {
                continue;
            }
            if entry.file_type()?.is_dir() {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    /// The id `current` points at, if the link exists.
    pub fn current_id(&self) -> Option<String> {
        let link = self.root.join(CURRENT_LINK);
        fs::read_link(link)
            .ok()
            .map(|target| target.to_string_lossy().into_owned())
    }

    /// Publish a built snapshot: write everything to a scratch directory,
    /// rename into place, then swap `current`.
    pub fn publish(&self, built: &BuiltSnapshot) -> Result<(), SnapshotBuildError> {
        let id = &built.manifest.snapshot_id;
        let final_dir = self.root.join(id);
        if final_dir.exists() {
            return Err(SnapshotBuildError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("snapshot {id} is already published and immutable"),
            )));
        }

        let scratch = tempfile::Builder::new()
            .prefix(".publish-")
            .tempdir_in(&self.root)?;
        write_artifacts(scratch.path(), built)?;

        // Scratch → final is a same-filesystem rename: all-or-nothing.
        fs::rename(scratch.into_path(), &final_dir)?;
        self.point_current(id)?;

        tracing::info!(
            snapshot = %id,
            root = %built.manifest.merkle_root,
            "snapshot published"
        );
        Ok(())
    }

    /// Atomically repoint `current` at the given id.
    pub fn point_current(&self, id: &str) -> std::io::Result<()> {
        let staging = self.root.join(format!(".current-{}", std::process::id()));
        let _ = fs::remove_file(&staging);
        std::os::unix::fs::symlink(id, &staging)?;
        fs::rename(&staging, self.root.join(CURRENT_LINK))
    }

    /// Open one snapshot by id, running the full integrity check.
    pub fn open(&self, id: &str) -> Result<LoadedSnapshot, IntegrityError> {
        let dir = self.root.join(id);
        if !dir.is_dir() {
            return Err(IntegrityError::NotFound(id.to_string()));
        }
        LoadedSnapshot::open(&dir, id, self.algorithm)
    }

    /// Open whatever `current` points at.
    pub fn open_current(&self) -> Result<LoadedSnapshot, IntegrityError> {
        let id = self
            .current_id()
            .ok_or(IntegrityError::NoUsableSnapshot)?;
        self.open(&id)
    }

    /// Whether a snapshot carries the unusable marker.
    pub fn is_unusable(&self, id: &str) -> bool {
        self.root.join(id).join(UNUSABLE_MARKER).is_file()
    }

    /// Mark a snapshot unusable after an integrity failure.
    pub fn mark_unusable(&self, id: &str, reason: &str) -> std::io::Result<()> {
        let mut file = fs::File::create(self.root.join(id).join(UNUSABLE_MARKER))?;
        writeln!(file, "{reason}")?;
        Ok(())
    }

    /// Load the freshest usable snapshot, demoting corrupt ones.
    ///
    /// Tries `current` first; on an integrity failure the snapshot is
    /// marked unusable, the event is logged at high severity, and `current`
    /// is atomically redirected to the most recent prior snapshot that
    /// loads cleanly.
    pub fn load_active(&self) -> Result<LoadedSnapshot, IntegrityError> {
        let mut candidates: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|id| !self.is_unusable(id))
            .collect();
        // Freshest first; current (when set and usable) takes precedence.
        candidates.reverse();
        if let Some(current) = self.current_id() {
            if let Some(pos) = candidates.iter().position(|c| *c == current) {
                let current = candidates.remove(pos);
                candidates.insert(0, current);
            }
        }

        for id in candidates {
            match self.open(&id) {
                Ok(snapshot) => {
                    if self.current_id().as_deref() != Some(id.as_str()) {
                        self.point_current(&id)?;
                        tracing::warn!(snapshot = %id, "promoted prior snapshot to current");
                    }
                    return Ok(snapshot);
                }
                Err(IntegrityError::NotFound(_)) => continue,
                Err(e) => {
                    tracing::error!(snapshot = %id, error = %e, "integrity failure; demoting snapshot");
                    self.mark_unusable(&id, &e.to_string())?;
                }
            }
        }
        Err(IntegrityError::NoUsableSnapshot)
    }
}

fn write_artifacts(dir: &Path, built: &BuiltSnapshot) -> std::io::Result<()> {
    let manifest =
        serde_json::to_vec(&built.manifest).expect("manifest serialization failed");
    fs::write(dir.join("manifest.json"), manifest)?;

    let mut ndjson = String::new();
    for line in &built.canonical_lines {
        ndjson.push_str(line);
        ndjson.push('\n');
    }
    fs::write(dir.join("districts.ndjson"), ndjson)?;

    let mut prov = String::new();
    for record in &built.provenance {
        prov.push_str(&serde_json::to_string(record).expect("provenance serialization failed"));
        prov.push('\n');
    }
    fs::write(dir.join("provenance.ndjson"), prov)?;

    fs::write(dir.join("tree.bin"), encode_tree(&built.tree))?;
    fs::write(dir.join("proofs.bin"), encode_proofs(&built.proofs))?;

    let coverage =
        serde_json::to_vec(&built.coverage).expect("coverage serialization failed");
    fs::write(dir.join("coverage.json"), coverage)?;

    let records = build_records(&built.districts, &built.canonical_lines);
    fs::write(dir.join("index.bin"), encode_index(&records))?;
    Ok(())
}

/// `tree.bin`: `[u32 depth][u32 leaf_count]` then every node hash,
/// leaves-first level order.
fn encode_tree(tree: &MerkleTree) -> Vec<u8> {
    let nodes = tree.flatten();
    let mut out = Vec::with_capacity(8 + nodes.len() * 32);
    out.extend_from_slice(&tree.depth().to_le_bytes());
    out.extend_from_slice(&tree.leaf_count().to_le_bytes());
    for node in nodes {
        out.extend_from_slice(&node.0);
    }
    out
}

fn decode_tree(
    bytes: &[u8],
    algorithm: LeafHashAlgorithm,
) -> Result<MerkleTree, &'static str> {
    if bytes.len() < 8 {
        return Err("truncated header");
    }
    let depth = u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes"));
    let leaf_count = u32::from_le_bytes(bytes[4..8].try_into().expect("4 bytes"));
    let body = &bytes[8..];
    if body.len() % 32 != 0 {
        return Err("node array not a multiple of 32 bytes");
    }
    let nodes: Vec<LeafHash> = body
        .chunks_exact(32)
        .map(|c| LeafHash(c.try_into().expect("32 bytes")))
        .collect();
    MerkleTree::from_flat(algorithm, depth, leaf_count, &nodes).ok_or("node count mismatch")
}

/// `proofs.bin`: `[u32 depth][u32 leaf_count]` then one fixed-size record
/// per leaf: leaf hash, `depth` sibling hashes, `depth` path bytes.
fn encode_proofs(proofs: &[MerkleProof]) -> Vec<u8> {
    let depth = proofs.first().map(|p| p.depth).unwrap_or(0) as usize;
    let record = 32 + depth * 32 + depth;
    let mut out = Vec::with_capacity(8 + record * proofs.len());
    out.extend_from_slice(&(depth as u32).to_le_bytes());
    out.extend_from_slice(&(proofs.len() as u32).to_le_bytes());
    for proof in proofs {
        out.extend_from_slice(&proof.leaf_hash.0);
        for sibling in &proof.siblings {
            out.extend_from_slice(&sibling.0);
        }
        out.extend_from_slice(&proof.path_indices);
    }
    out
}

fn decode_proofs(bytes: &[u8], merkle_root: LeafHash) -> Result<Vec<MerkleProof>, &'static str> {
    if bytes.len() < 8 {
        return Err("truncated header");
    }
    let depth = u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes")) as usize;
    let count = u32::from_le_bytes(bytes[4..8].try_into().expect("4 bytes")) as usize;
    let record = 32 + depth * 32 + depth;
    let body = &bytes[8..];
    if body.len() != record * count {
        return Err("record array length mismatch");
    }
    let mut proofs = Vec::with_capacity(count);
    for (i, chunk) in body.chunks_exact(record).enumerate() {
        let leaf_hash = LeafHash(chunk[0..32].try_into().expect("32 bytes"));
        let siblings: Vec<LeafHash> = chunk[32..32 + depth * 32]
            .chunks_exact(32)
            .map(|c| LeafHash(c.try_into().expect("32 bytes")))
            .collect();
        let path_indices = chunk[32 + depth * 32..].to_vec();
        proofs.push(MerkleProof {
            leaf_hash,
            leaf_index: i as u32,
            siblings,
            path_indices,
            depth: depth as u32,
            merkle_root,
        });
    }
    Ok(proofs)
}

/// A fully integrity-checked, immutable snapshot handle.
///
/// Holds the manifest, proofs, provenance, and the spatial index in
/// memory; polygon bodies stay in `districts.ndjson` and materialize
/// lazily on match.
pub struct LoadedSnapshot {
    manifest: SnapshotManifest,
    records: Vec<IndexRecord>,
    index: SpatialIndex,
    proofs: Vec<MerkleProof>,
    provenance: Vec<Provenance>,
    districts_file: fs::File,
}

impl LoadedSnapshot {
    fn open(
        dir: &Path,
        id: &str,
        algorithm: LeafHashAlgorithm,
    ) -> Result<Self, IntegrityError> {
        let corrupt = |artifact: &'static str, detail: String| IntegrityError::Corrupt {
            snapshot_id: id.to_string(),
            artifact,
            detail,
        };

        let manifest: SnapshotManifest =
            serde_json::from_slice(&fs::read(dir.join("manifest.json"))?)
                .map_err(|e| corrupt("manifest.json", e.to_string()))?;

        // Content check: the ndjson bytes are the commitment's preimage.
        let ndjson = fs::read(dir.join("districts.ndjson"))?;
        if !digests_equal(&sha256_hex(&ndjson), &manifest.content_id) {
            return Err(IntegrityError::ContentMismatch {
                snapshot_id: id.to_string(),
            });
        }

        // Tree check: stored nodes must rehash level by level to the
        // committed root, and the leaf level must match the ndjson lines.
        let tree = decode_tree(&fs::read(dir.join("tree.bin"))?, algorithm)
            .map_err(|e| corrupt("tree.bin", e.to_string()))?;
        let root_ok = tree.root() == manifest.merkle_root && tree.verify_internal_consistency();
        if !root_ok {
            return Err(IntegrityError::RootMismatch {
                snapshot_id: id.to_string(),
                expected_root: manifest.merkle_root,
            });
        }
        let text = std::str::from_utf8(&ndjson)
            .map_err(|e| corrupt("districts.ndjson", e.to_string()))?;
        for (i, line) in text.lines().enumerate() {
            let expected = tree
                .proof(i as u32)
                .map(|p| p.leaf_hash)
                .ok_or_else(|| corrupt("tree.bin", format!("missing leaf {i}")))?;
            if hash_leaf(algorithm, line.as_bytes()) != expected {
                return Err(IntegrityError::RootMismatch {
                    snapshot_id: id.to_string(),
                    expected_root: manifest.merkle_root,
                });
            }
        }

        let proofs = decode_proofs(&fs::read(dir.join("proofs.bin"))?, manifest.merkle_root)
            .map_err(|e| corrupt("proofs.bin", e.to_string()))?;

        let records = decode_index(fs::read(dir.join("index.bin"))?.as_slice())
            .map_err(|e| corrupt("index.bin", e.to_string()))?;

        let mut provenance = Vec::new();
        for (i, line) in fs::read_to_string(dir.join("provenance.ndjson"))?
            .lines()
            .enumerate()
        {
            if line.trim().is_empty() {
                continue;
            }
            provenance.push(
                serde_json::from_str(line)
                    .map_err(|e| corrupt("provenance.ndjson", format!("line {}: {e}", i + 1)))?,
            );
        }

        let districts_file = fs::File::open(dir.join("districts.ndjson"))?;
        let index = SpatialIndex::from_records(records.clone());

        Ok(Self {
            manifest,
            records,
            index,
            proofs,
            provenance,
            districts_file,
        })
    }

    /// The manifest.
    pub fn manifest(&self) -> &SnapshotManifest {
        &self.manifest
    }

    /// Committed district count.
    pub fn district_count(&self) -> u32 {
        self.manifest.district_count
    }

    /// O(1) pre-computed proof by leaf index.
    pub fn proof(&self, leaf_index: u32) -> Option<&MerkleProof> {
        self.proofs.get(leaf_index as usize)
    }

    /// Provenance summary by leaf index.
    pub fn provenance(&self, leaf_index: u32) -> Option<&Provenance> {
        self.provenance.get(leaf_index as usize)
    }

    /// Read and parse one district's canonical line from disk.
    pub fn materialize(&self, record: &IndexRecord) -> Result<District, IntegrityError> {
        let mut buf = vec![0u8; record.len as usize];
        self.districts_file.read_exact_at(&mut buf, record.offset)?;
        let line = std::str::from_utf8(&buf).map_err(|e| IntegrityError::Corrupt {
            snapshot_id: self.manifest.snapshot_id.clone(),
            artifact: "districts.ndjson",
            detail: e.to_string(),
        })?;
        District::from_canonical_line(line).map_err(|e| IntegrityError::Corrupt {
            snapshot_id: self.manifest.snapshot_id.clone(),
            artifact: "districts.ndjson",
            detail: e.to_string(),
        })
    }

    /// The single district containing the point, lowest canonical id on a
    /// tie (a point on a shared edge is contained by the lower-id side).
    pub fn locate(
        &self,
        point: Coordinate,
        levels: Option<&BTreeSet<DistrictLevel>>,
    ) -> Result<Option<(IndexRecord, District)>, IntegrityError> {
        let matches = self.matches_at(point, levels)?;
        Ok(matches.into_iter().min_by(|a, b| a.1.id.cmp(&b.1.id)))
    }

    /// Every district containing the point, ascending canonical id.
    pub fn matches_at(
        &self,
        point: Coordinate,
        levels: Option<&BTreeSet<DistrictLevel>>,
    ) -> Result<Vec<(IndexRecord, District)>, IntegrityError> {
        let mut out = Vec::new();
        for record in self.index.candidates_at_point(point, levels) {
            let district = self.materialize(&record)?;
            if contains(&district.polygon, point) || on_boundary(&district.polygon, point) {
                out.push((record, district));
            }
        }
        out.sort_by(|a, b| a.1.id.cmp(&b.1.id));
        Ok(out)
    }

    /// Districts whose polygon intersects the bounding box.
    pub fn query_bbox(
        &self,
        min: [f64; 2],
        max: [f64; 2],
        levels: Option<&BTreeSet<DistrictLevel>>,
    ) -> Result<Vec<(IndexRecord, District)>, IntegrityError> {
        let rect = Rect::new(
            geo::Coord { x: min[0], y: min[1] },
            geo::Coord { x: max[0], y: max[1] },
        );
        let mut out = Vec::new();
        for record in self.index.candidates_in_bbox(min, max, levels) {
            let district = self.materialize(&record)?;
            if district.polygon.intersects(&rect) {
                out.push((record, district));
            }
        }
        Ok(out)
    }

    /// Districts within `radius_m` of the point.
    pub fn query_radius(
        &self,
        point: Coordinate,
        radius_m: f64,
        levels: Option<&BTreeSet<DistrictLevel>>,
    ) -> Result<Vec<(IndexRecord, District)>, IntegrityError> {
        // Degree-space prefilter box around the point, padded for latitude
        // distortion.
        let lat_pad = radius_m / 110_574.0;
        let lon_pad = radius_m / (111_320.0 * point.lat.to_radians().cos().max(1e-6));
        let min = [point.lon - lon_pad, point.lat - lat_pad];
        let max = [point.lon + lon_pad, point.lat + lat_pad];
        let mut out = Vec::new();
        for record in self.index.candidates_in_bbox(min, max, levels) {
            let district = self.materialize(&record)?;
            if minimum_distance_m(&district.polygon, point) <= radius_m {
                out.push((record, district));
            }
        }
        Ok(out)
    }

    /// The `k` nearest districts with their distances in meters.
    pub fn nearest(
        &self,
        point: Coordinate,
        k: usize,
        levels: Option<&BTreeSet<DistrictLevel>>,
    ) -> Result<Vec<(District, f64)>, IntegrityError> {
        // Envelope distance orders the candidate stream; the true polygon
        // distance decides. Scanning 4k candidates absorbs bbox/polygon
        // disagreement.
        let candidates = self
            .index
            .nearest_candidates(point, levels, (4 * k).max(16));
        let mut scored = Vec::with_capacity(candidates.len());
        for record in candidates {
            let district = self.materialize(&record)?;
            let d = minimum_distance_m(&district.polygon, point);
            scored.push((district, d));
        }
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Whether any committed district carries the given level.
    pub fn has_level(&self, level: DistrictLevel) -> bool {
        self.records.iter().any(|r| r.level == level)
    }

    /// Materialize every district of one jurisdiction (and level), paired
    /// with its provenance. Used to carry a jurisdiction's prior records
    /// forward when a fresh candidate is rejected.
    pub fn districts_for_jurisdiction(
        &self,
        jurisdiction_id: &crate::types::JurisdictionId,
        level: DistrictLevel,
    ) -> Result<Vec<(District, Provenance)>, IntegrityError> {
        let mut out = Vec::new();
        for record in &self.records {
            if record.level != level {
                continue;
            }
            let district = self.materialize(record)?;
            if &district.jurisdiction_id != jurisdiction_id {
                continue;
            }
            let provenance = self.provenance(record.leaf_index).cloned().ok_or_else(|| {
                IntegrityError::Corrupt {
                    snapshot_id: self.manifest.snapshot_id.clone(),
                    artifact: "provenance.ndjson",
                    detail: format!("missing record for leaf {}", record.leaf_index),
                }
            })?;
            out.push((district, provenance));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::builder::{AdmissionOrigin, AdmittedSet, SnapshotBuilder};
    use crate::geometry::RawGeometry;
    use crate::registry::BoundaryRegistry;
    use crate::types::{
        AuthorityLevel, DistrictId, GovernanceKind, Jurisdiction, JurisdictionId,
        JurisdictionLevel, TessellationProof, TessellationStatus,
    };
    use chrono::Utc;
    use std::collections::BTreeMap;

    const ALGO: LeafHashAlgorithm = LeafHashAlgorithm::Sha256_31;

    fn jurisdiction(id: &str) -> Jurisdiction {
        Jurisdiction {
            id: JurisdictionId::new(id),
            display_name: format!("Test {id}"),
            country: "US".to_string(),
            state: "CA".to_string(),
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
                x1 = x0 + 1.0,
            ))
            .unwrap()
            .decode()
            .unwrap(),
            canonical_attributes: BTreeMap::new(),
        }
    }

    fn built(id: &str, count: u32) -> BuiltSnapshot {
        let districts: Vec<District> = (1..=count)
            .map(|n| district("0667000", n, (n - 1) as f64))
            .collect();
        let provenance = districts
            .iter()
            .map(|d| Provenance {
                district_id: d.id.clone(),
                source_url: "https://data.example.gov/d.geojson".to_string(),
                authority_level: AuthorityLevel::Municipal,
                acquired_at: Utc::now(),
                response_content_hash: "22".repeat(32),
                source_attributes: BTreeMap::new(),
                effective_from: Utc::now(),
                effective_to: None,
            })
            .collect();
        let set = AdmittedSet {
            jurisdiction_id: JurisdictionId::new("0667000"),
            proof: TessellationProof {
                status: TessellationStatus::Passed,
                ..TessellationProof::pre_geometric(count, Some(count))
            },
            districts,
            provenance,
            origin: AdmissionOrigin::Fresh,
        };
        let registry = BoundaryRegistry::from_jurisdictions([jurisdiction("0667000")]);
        SnapshotBuilder::new(id, ALGO).build(vec![set], &registry).unwrap()
    }

    fn store(dir: &Path) -> SnapshotStore {
        SnapshotStore::new(dir, ALGO)
    }

    #[test]
    fn test_publish_and_open_current() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.publish(&built("2026-Q1", 3)).unwrap();

        assert_eq!(store.current_id().as_deref(), Some("2026-Q1"));
        let snapshot = store.open_current().unwrap();
        assert_eq!(snapshot.district_count(), 3);
        assert_eq!(snapshot.manifest().snapshot_id, "2026-Q1");
    }

    #[test]
    fn test_published_snapshot_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.publish(&built("2026-Q1", 2)).unwrap();
        assert!(store.publish(&built("2026-Q1", 2)).is_err());
    }

    #[test]
    fn test_current_swap_is_atomic_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.publish(&built("2026-Q1", 2)).unwrap();
        store.publish(&built("2026-Q2", 3)).unwrap();
        assert_eq!(store.current_id().as_deref(), Some("2026-Q2"));
        assert_eq!(store.list().unwrap(), vec!["2026-Q1", "2026-Q2"]);
        // The old snapshot remains readable for live handles.
        assert!(store.open("2026-Q1").is_ok());
    }

    #[test]
    fn test_locate_and_tie_break() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.publish(&built("2026-Q1", 3)).unwrap();
        let snapshot = store.open_current().unwrap();

        let hit = snapshot
            .locate(Coordinate::new(0.5, 0.5), None)
            .unwrap()
            .expect("point inside district 1");
        assert_eq!(hit.1.id.as_str(), "0667000/council/1");

        // A point on the shared edge of districts 1 and 2 resolves to the
        // lower canonical id.
        let edge = snapshot
            .locate(Coordinate::new(0.5, 1.0), None)
            .unwrap()
            .expect("edge point matches");
        assert_eq!(edge.1.id.as_str(), "0667000/council/1");

        assert!(snapshot
            .locate(Coordinate::new(0.5, 9.0), None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_query_radius_and_nearest() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.publish(&built("2026-Q1", 3)).unwrap();
        let snapshot = store.open_current().unwrap();

        // ~30 km south of district 1's edge.
        let point = Coordinate::new(-0.27, 0.5);
        let within_50k = snapshot.query_radius(point, 50_000.0, None).unwrap();
        assert_eq!(within_50k.len(), 1);

        let nearest = snapshot.nearest(point, 2, None).unwrap();
        assert_eq!(nearest.len(), 2);
        assert_eq!(nearest[0].0.id.as_str(), "0667000/council/1");
        assert!(nearest[0].1 < nearest[1].1);
    }

    #[test]
    fn test_integrity_corruption_demotes_to_prior() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.publish(&built("2026-Q1", 2)).unwrap();
        store.publish(&built("2026-Q2", 3)).unwrap();

        // Flip one byte in the newest tree.bin.
        let tree_path = dir.path().join("2026-Q2").join("tree.bin");
        let mut bytes = fs::read(&tree_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        fs::write(&tree_path, bytes).unwrap();

        let active = store.load_active().unwrap();
        assert_eq!(active.manifest().snapshot_id, "2026-Q1");
        assert_eq!(store.current_id().as_deref(), Some("2026-Q1"));
        assert!(store.is_unusable("2026-Q2"));
    }

    #[test]
    fn test_rebuild_from_ndjson_reproduces_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let original = built("2026-Q1", 4);
        store.publish(&original).unwrap();

        // Re-hash the published ndjson lines and rebuild the tree.
        let text =
            fs::read_to_string(dir.path().join("2026-Q1").join("districts.ndjson")).unwrap();
        let leaves: Vec<LeafHash> = text
            .lines()
            .map(|line| hash_leaf(ALGO, line.as_bytes()))
            .collect();
        let rebuilt = MerkleTree::from_leaves(ALGO, &leaves).unwrap();
        assert_eq!(rebuilt.root(), original.manifest.merkle_root);
    }

    #[test]
    fn test_proofs_loaded_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let original = built("2026-Q1", 5);
        store.publish(&original).unwrap();
        let snapshot = store.open_current().unwrap();

        for i in 0..5u32 {
            let loaded = snapshot.proof(i).unwrap();
            assert!(loaded.verify(ALGO));
            assert_eq!(loaded.leaf_hash, original.proofs[i as usize].leaf_hash);
            assert_eq!(loaded.siblings, original.proofs[i as usize].siblings);
        }
        assert!(snapshot.proof(5).is_none());
    }
}
