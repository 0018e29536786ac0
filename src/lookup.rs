//! Lookup service: point → {districts, proofs, snapshot header}.
//!
//! ## Caching tiers
//!
//! 1. **Immutable artifact cache** — assembled responses keyed by
//!    `(rounded point, filters, snapshot_id)`. Snapshots are immutable, so
//!    entries stay valid until a new snapshot is published, at which point
//!    the whole cache is dropped.
//! 2. **Hot index cache** — the R-tree inside each [`LoadedSnapshot`].
//! 3. **Cold store** — the snapshot artifacts on disk.
//!
//! The cache key folds in every field that affects the response, mirroring
//! how the admission evidence itself is keyed: any parameter change is a
//! cache miss, never a stale hit.

use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::Xxh64;

use crate::geometry::{encode_canonical, Coordinate};
use crate::snapshot::{IntegrityError, LoadedSnapshot, SnapshotStore};
use crate::types::{DistrictId, DistrictLevel, JurisdictionId, LeafHash, MerkleProof, ProvenanceSummary};

/// Lookup failures.
///
/// A point matching nothing is NOT an error; it is an empty response.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The requested `as_of` snapshot does not exist. Fatal for this
    /// request only.
    #[error("snapshot {0} does not exist")]
    SnapshotMissing(String),
    /// The snapshot failed its read-path checks.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

/// Query filters. Every option is enumerated; there is no attribute bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupFilters {
    /// District levels to consider (`None` = all).
    #[serde(default)]
    pub levels: Option<BTreeSet<DistrictLevel>>,
    /// Snapshot selector (`None` = current).
    #[serde(default)]
    pub as_of: Option<String>,
    /// Include canonical geometry in the response (default false).
    #[serde(default)]
    pub include_geometry: bool,
    /// Include Merkle proofs in the response (default true).
    #[serde(default = "default_true")]
    pub include_proof: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LookupFilters {
    fn default() -> Self {
        Self {
            levels: None,
            as_of: None,
            include_geometry: false,
            include_proof: true,
        }
    }
}

/// District fields disclosed in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistrictPayload {
    /// Stable district id.
    pub id: DistrictId,
    /// Owning jurisdiction.
    pub jurisdiction_id: JurisdictionId,
    /// District level.
    pub level: DistrictLevel,
    /// Local district number.
    pub local_number: u32,
    /// Display name.
    pub display_name: String,
    /// Canonical attributes.
    pub canonical_attributes: BTreeMap<String, String>,
    /// Canonical GeoJSON, only when `include_geometry` was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
}

/// One matched district with its evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupMatch {
    /// The district.
    pub district: DistrictPayload,
    /// Inclusion proof against the snapshot's Merkle root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<MerkleProof>,
    /// Where the district's data came from.
    pub provenance_summary: ProvenanceSummary,
}

/// Snapshot identity echoed in every response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Snapshot id.
    pub snapshot_id: String,
    /// Content address of the committed districts.
    pub content_id: String,
    /// Merkle root.
    pub merkle_root: LeafHash,
    /// Build time.
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// Committed district count.
    pub district_count: u32,
    /// Artifact schema version.
    pub schema_version: String,
}

/// Cache disclosure in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    /// Whether this response came from the artifact cache.
    pub hit: bool,
    /// Age of the cached entry in seconds (0 on miss).
    pub age_s: u64,
    /// Maximum age the cache will serve before recomputing.
    pub max_age_s: u64,
}

/// The lookup response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResponse {
    /// Matched districts, ascending canonical id.
    pub matches: Vec<LookupMatch>,
    /// Which snapshot answered.
    pub snapshot: SnapshotHeader,
    /// Cache disclosure.
    pub cache: CacheInfo,
    /// Service-side latency in milliseconds.
    pub latency_ms: u32,
    /// Soft warnings (e.g. a requested level with zero districts).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Artifact cache sizing.
#[derive(Debug, Clone)]
pub struct LookupCacheConfig {
    /// Maximum number of cached responses.
    pub max_entries: usize,
    /// Whether the cache is enabled.
    pub enabled: bool,
    /// Maximum entry age served before recomputation.
    pub max_age_s: u64,
}

impl Default for LookupCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            enabled: true,
            max_age_s: 86_400,
        }
    }
}

struct CachedBody {
    matches: Vec<LookupMatch>,
    snapshot: SnapshotHeader,
    warnings: Vec<String>,
    inserted_at: Instant,
}

/// The serving facade over the snapshot store.
pub struct LookupService {
    store: SnapshotStore,
    active: RwLock<Arc<LoadedSnapshot>>,
    /// Non-current snapshots opened for `as_of` queries, kept by id.
    archived: RwLock<BTreeMap<String, Arc<LoadedSnapshot>>>,
    cache: Mutex<LruCache<u64, Arc<CachedBody>>>,
    cache_config: LookupCacheConfig,
}

impl LookupService {
    /// Open the service over the store's freshest usable snapshot.
    pub fn open(store: SnapshotStore) -> Result<Self, IntegrityError> {
        Self::open_with_cache(store, LookupCacheConfig::default())
    }

    /// Open with explicit cache sizing.
    pub fn open_with_cache(
        store: SnapshotStore,
        cache_config: LookupCacheConfig,
    ) -> Result<Self, IntegrityError> {
        let active = Arc::new(store.load_active()?);
        let capacity =
            NonZeroUsize::new(cache_config.max_entries.max(1)).expect("max(1) is non-zero");
        Ok(Self {
            store,
            active: RwLock::new(active),
            archived: RwLock::new(BTreeMap::new()),
            cache: Mutex::new(LruCache::new(capacity)),
            cache_config,
        })
    }

    /// The currently active snapshot handle.
    pub fn active(&self) -> Arc<LoadedSnapshot> {
        self.active.read().clone()
    }

    /// Re-resolve `current` and swap the active handle.
    ///
    /// Outstanding readers keep their old `Arc`; the artifact cache is
    /// dropped because its entries are keyed to the superseded snapshot.
    pub fn reload(&self) -> Result<(), IntegrityError> {
        let fresh = Arc::new(self.store.load_active()?);
        let changed = {
            let mut active = self.active.write();
            let changed = active.manifest().snapshot_id != fresh.manifest().snapshot_id;
            *active = fresh;
            changed
        };
        if changed {
            self.cache.lock().clear();
            tracing::info!(
                snapshot = %self.active().manifest().snapshot_id,
                "lookup service swapped to new snapshot"
            );
        }
        Ok(())
    }

    /// Resolve a point to its containing districts.
    pub fn lookup(
        &self,
        point: Coordinate,
        filters: &LookupFilters,
    ) -> Result<LookupResponse, LookupError> {
        let started = Instant::now();
        let point = point.rounded();
        let snapshot = self.resolve_snapshot(filters.as_of.as_deref())?;
        let key = cache_key(point, filters, &snapshot.manifest().snapshot_id);

        if self.cache_config.enabled {
            let mut cache = self.cache.lock();
            if let Some(body) = cache.get(&key) {
                let age_s = body.inserted_at.elapsed().as_secs();
                if age_s <= self.cache_config.max_age_s {
                    let body = body.clone();
                    return Ok(LookupResponse {
                        matches: body.matches.clone(),
                        snapshot: body.snapshot.clone(),
                        cache: CacheInfo {
                            hit: true,
                            age_s,
                            max_age_s: self.cache_config.max_age_s,
                        },
                        latency_ms: elapsed_ms(started),
                        warnings: body.warnings.clone(),
                    });
                }
                cache.pop(&key);
            }
        }

        let (matches, warnings) = self.compute_matches(&snapshot, point, filters)?;
        let header = header_of(&snapshot);

        if self.cache_config.enabled {
            self.cache.lock().put(
                key,
                Arc::new(CachedBody {
                    matches: matches.clone(),
                    snapshot: header.clone(),
                    warnings: warnings.clone(),
                    inserted_at: Instant::now(),
                }),
            );
        }

        Ok(LookupResponse {
            matches,
            snapshot: header,
            cache: CacheInfo {
                hit: false,
                age_s: 0,
                max_age_s: self.cache_config.max_age_s,
            },
            latency_ms: elapsed_ms(started),
            warnings,
        })
    }

    fn resolve_snapshot(&self, as_of: Option<&str>) -> Result<Arc<LoadedSnapshot>, LookupError> {
        let active = self.active();
        let Some(requested) = as_of else {
            return Ok(active);
        };
        if requested == active.manifest().snapshot_id {
            return Ok(active);
        }
        if let Some(found) = self.archived.read().get(requested) {
            return Ok(found.clone());
        }
        let opened = match self.store.open(requested) {
            Ok(s) => Arc::new(s),
            Err(IntegrityError::NotFound(id)) => return Err(LookupError::SnapshotMissing(id)),
            Err(e) => return Err(LookupError::Integrity(e)),
        };
        self.archived
            .write()
            .insert(requested.to_string(), opened.clone());
        Ok(opened)
    }

    fn compute_matches(
        &self,
        snapshot: &LoadedSnapshot,
        point: Coordinate,
        filters: &LookupFilters,
    ) -> Result<(Vec<LookupMatch>, Vec<String>), LookupError> {
        let mut warnings = Vec::new();
        if let Some(levels) = &filters.levels {
            let missing: Vec<&DistrictLevel> = levels
                .iter()
                .filter(|l| !snapshot.has_level(**l))
                .collect();
            for level in missing {
                warnings.push(format!("no districts admitted at level {level}"));
            }
        }

        let raw = snapshot.matches_at(point, filters.levels.as_ref())?;

        // A pathological same-level overlap within epsilon resolves to the
        // lowest canonical id; distinct levels all report.
        let mut best: BTreeMap<(JurisdictionId, DistrictLevel), usize> = BTreeMap::new();
        for (i, (_, district)) in raw.iter().enumerate() {
            let key = (district.jurisdiction_id.clone(), district.level);
            match best.get(&key) {
                Some(&prior) if raw[prior].1.id <= district.id => {}
                _ => {
                    best.insert(key, i);
                }
            }
        }
        let mut keep: Vec<usize> = best.into_values().collect();
        keep.sort_unstable();

        let mut matches = Vec::with_capacity(keep.len());
        for i in keep {
            let (record, district) = &raw[i];
            let provenance_summary = snapshot
                .provenance(record.leaf_index)
                .map(|p| p.summary())
                .ok_or_else(|| {
                    LookupError::Integrity(IntegrityError::Corrupt {
                        snapshot_id: snapshot.manifest().snapshot_id.clone(),
                        artifact: "provenance.ndjson",
                        detail: format!("missing record for leaf {}", record.leaf_index),
                    })
                })?;
            let proof = if filters.include_proof {
                Some(
                    snapshot
                        .proof(record.leaf_index)
                        .cloned()
                        .ok_or_else(|| {
                            LookupError::Integrity(IntegrityError::Corrupt {
                                snapshot_id: snapshot.manifest().snapshot_id.clone(),
                                artifact: "proofs.bin",
                                detail: format!("missing proof for leaf {}", record.leaf_index),
                            })
                        })?,
                )
            } else {
                None
            };
            matches.push(LookupMatch {
                district: DistrictPayload {
                    id: district.id.clone(),
                    jurisdiction_id: district.jurisdiction_id.clone(),
                    level: district.level,
                    local_number: district.local_number,
                    display_name: district.display_name.clone(),
                    canonical_attributes: district.canonical_attributes.clone(),
                    geometry: filters
                        .include_geometry
                        .then(|| encode_canonical(&district.polygon)),
                },
                proof,
                provenance_summary,
            });
        }
        matches.sort_by(|a, b| a.district.id.cmp(&b.district.id));
        Ok((matches, warnings))
    }
}

fn header_of(snapshot: &LoadedSnapshot) -> SnapshotHeader {
    let m = snapshot.manifest();
    SnapshotHeader {
        snapshot_id: m.snapshot_id.clone(),
        content_id: m.content_id.clone(),
        merkle_root: m.merkle_root,
        generated_at: m.generated_at,
        district_count: m.district_count,
        schema_version: m.schema_version.clone(),
    }
}

fn elapsed_ms(started: Instant) -> u32 {
    started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32
}

/// Fold every response-affecting field into the cache key.
fn cache_key(point: Coordinate, filters: &LookupFilters, snapshot_id: &str) -> u64 {
    use std::hash::Hasher as _;
    let mut hasher = Xxh64::new(0);
    let (lat_ud, lon_ud) = point.to_microdegrees();
    hasher.write(&lat_ud.to_le_bytes());
    hasher.write(&lon_ud.to_le_bytes());
    match &filters.levels {
        None => hasher.write_u8(0xFF),
        Some(levels) => {
            for level in levels {
                hasher.write_u8(level.code());
            }
        }
    }
    hasher.write_u8(filters.include_geometry as u8);
    hasher.write_u8(filters.include_proof as u8);
    hasher.write(snapshot_id.as_bytes());
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_default_shape() {
        let f = LookupFilters::default();
        assert!(f.levels.is_none());
        assert!(f.as_of.is_none());
        assert!(!f.include_geometry);
        assert!(f.include_proof);
    }

    #[test]
    fn test_cache_key_sensitive_to_each_input() {
        let p = Coordinate::new(37.774900, -122.419400);
        let base = cache_key(p, &LookupFilters::default(), "2026-Q1");

        let moved = cache_key(Coordinate::new(37.774901, -122.419400), &LookupFilters::default(), "2026-Q1");
        assert_ne!(base, moved);

        let mut filtered = LookupFilters::default();
        filtered.levels = Some(BTreeSet::from([DistrictLevel::Council]));
        assert_ne!(base, cache_key(p, &filtered, "2026-Q1"));

        let mut no_proof = LookupFilters::default();
        no_proof.include_proof = false;
        assert_ne!(base, cache_key(p, &no_proof, "2026-Q1"));

        assert_ne!(base, cache_key(p, &LookupFilters::default(), "2026-Q2"));
    }

    #[test]
    fn test_cache_key_rounding_collapses_drift() {
        // Sub-rounding jitter maps to the same key.
        let a = cache_key(
            Coordinate::new(37.7749004, -122.4194004),
            &LookupFilters::default(),
            "2026-Q1",
        );
        let b = cache_key(
            Coordinate::new(37.7749001, -122.4193999),
            &LookupFilters::default(),
            "2026-Q1",
        );
        assert_eq!(a, b);
    }
}
