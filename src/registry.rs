//! Boundary registry and at-large registry.
//!
//! The registry is the authoritative statement of what each jurisdiction is
//! supposed to look like: expected district count, governance kind,
//! documented overflow exceptions, and the boundary polygon the containment
//! axiom measures against.
//!
//! Read-mostly: the whole registry (order 10⁴ entries) loads at startup
//! into an immutable view. Mutations go through [`RegistryWriter`], which
//! appends a versioned revision record; a freshly loaded view replays the
//! revision log, so readers always see a point-in-time consistent state.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::canonical::fingerprint_hex;
use crate::geometry::{repair, RawGeometry};
use crate::types::{Jurisdiction, JurisdictionId};

/// File holding one canonical `Jurisdiction` document per line.
pub const JURISDICTIONS_FILE: &str = "jurisdictions.ndjson";
/// Directory of `<id>.geojson` boundary polygons.
pub const BOUNDARIES_DIR: &str = "boundaries";
/// File listing jurisdiction ids that elect at large.
pub const AT_LARGE_FILE: &str = "at_large.json";
/// Append-only revision log.
pub const REVISIONS_FILE: &str = "revisions.ndjson";

/// Errors from registry loading and mutation.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Filesystem failure.
    #[error("registry io: {0}")]
    Io(#[from] std::io::Error),
    /// A document failed to parse.
    #[error("registry document {file}:{line}: {detail}")]
    Parse {
        /// File the document came from.
        file: String,
        /// 1-based line number.
        line: usize,
        /// Parser message.
        detail: String,
    },
    /// A revision references a jurisdiction that does not exist.
    #[error("revision references unknown jurisdiction {0}")]
    UnknownJurisdiction(JurisdictionId),
}

/// A single versioned change to a jurisdiction's declared expectations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryRevision {
    /// Unique revision id.
    pub id: String,
    /// The jurisdiction being amended.
    pub jurisdiction_id: JurisdictionId,
    /// The change itself.
    pub change: RevisionChange,
    /// Operator or process that recorded the change.
    pub recorded_by: String,
    /// When the change was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Why.
    pub note: String,
}

/// The fields a revision may amend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum RevisionChange {
    /// Remediate the expected district count.
    ExpectedDistrictCount {
        /// Previous value.
        from: Option<u32>,
        /// New value.
        to: u32,
    },
    /// Record or amend a consolidated-government overflow exception.
    KnownOverflowRatio {
        /// Previous value.
        from: Option<f64>,
        /// New value.
        to: f64,
    },
}

/// Immutable, point-in-time view of all jurisdiction records.
#[derive(Debug, Clone)]
pub struct BoundaryRegistry {
    jurisdictions: BTreeMap<JurisdictionId, Jurisdiction>,
    fingerprint: String,
}

impl BoundaryRegistry {
    /// Load the registry from `registry_dir`, replaying the revision log.
    pub fn load(registry_dir: &Path) -> Result<Self, RegistryError> {
        let file = registry_dir.join(JURISDICTIONS_FILE);
        let text = fs::read_to_string(&file)?;
        let mut jurisdictions = BTreeMap::new();

        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mut j: Jurisdiction =
                serde_json::from_str(line).map_err(|e| RegistryError::Parse {
                    file: JURISDICTIONS_FILE.to_string(),
                    line: i + 1,
                    detail: e.to_string(),
                })?;
            j.boundary_polygon = load_boundary(registry_dir, &j.id)?;
            jurisdictions.insert(j.id.clone(), j);
        }

        let revisions = read_revisions(registry_dir)?;
        for revision in &revisions {
            let Some(j) = jurisdictions.get_mut(&revision.jurisdiction_id) else {
                return Err(RegistryError::UnknownJurisdiction(
                    revision.jurisdiction_id.clone(),
                ));
            };
            match revision.change {
                RevisionChange::ExpectedDistrictCount { to, .. } => {
                    j.expected_district_count = Some(to);
                }
                RevisionChange::KnownOverflowRatio { to, .. } => {
                    j.known_overflow_ratio = Some(to);
                }
            }
        }

        let registry = Self::from_jurisdictions(jurisdictions.into_values());
        tracing::info!(
            jurisdictions = registry.len(),
            revisions = revisions.len(),
            fingerprint = %registry.fingerprint(),
            "boundary registry loaded"
        );
        Ok(registry)
    }

    /// Build a view directly from records. Used by tests and by builds that
    /// assemble registries programmatically.
    pub fn from_jurisdictions(records: impl IntoIterator<Item = Jurisdiction>) -> Self {
        let jurisdictions: BTreeMap<JurisdictionId, Jurisdiction> =
            records.into_iter().map(|j| (j.id.clone(), j)).collect();
        let fingerprint = fingerprint_hex(&jurisdictions);
        Self {
            jurisdictions,
            fingerprint,
        }
    }

    /// Look up a jurisdiction.
    pub fn get(&self, id: &JurisdictionId) -> Option<&Jurisdiction> {
        self.jurisdictions.get(id)
    }

    /// Declared district count, when known.
    pub fn expected_count(&self, id: &JurisdictionId) -> Option<u32> {
        self.get(id).and_then(|j| j.expected_district_count)
    }

    /// Whether the registry declares this jurisdiction at-large.
    ///
    /// The at-large *bypass* is governed by the separate [`AtLargeRegistry`];
    /// this answers what the jurisdiction document itself declares.
    pub fn is_at_large(&self, id: &JurisdictionId) -> bool {
        self.get(id)
            .map(|j| !j.governance_kind.has_districts())
            .unwrap_or(false)
    }

    /// Documented consolidated-government overflow exception.
    pub fn overflow_exception(&self, id: &JurisdictionId) -> Option<f64> {
        self.get(id).and_then(|j| j.known_overflow_ratio)
    }

    /// Number of jurisdictions in the view.
    pub fn len(&self) -> usize {
        self.jurisdictions.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.jurisdictions.is_empty()
    }

    /// xxh64 fingerprint of the loaded view, for build logs.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Iterate jurisdictions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Jurisdiction> {
        self.jurisdictions.values()
    }
}

fn load_boundary(
    registry_dir: &Path,
    id: &JurisdictionId,
) -> Result<Option<geo::MultiPolygon<f64>>, RegistryError> {
    let path = registry_dir
        .join(BOUNDARIES_DIR)
        .join(format!("{}.geojson", id.as_str()));
    if !path.is_file() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path)?;
    let raw = RawGeometry::from_json(&text).map_err(|e| RegistryError::Parse {
        file: path.display().to_string(),
        line: 1,
        detail: e.to_string(),
    })?;
    let decoded = raw.decode().map_err(|e| RegistryError::Parse {
        file: path.display().to_string(),
        line: 1,
        detail: e.to_string(),
    })?;
    Ok(Some(repair(&decoded).geometry))
}

fn read_revisions(registry_dir: &Path) -> Result<Vec<RegistryRevision>, RegistryError> {
    let path = registry_dir.join(REVISIONS_FILE);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(&path)?;
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        out.push(
            serde_json::from_str(line).map_err(|e| RegistryError::Parse {
                file: REVISIONS_FILE.to_string(),
                line: i + 1,
                detail: e.to_string(),
            })?,
        );
    }
    Ok(out)
}

/// Single writer for registry mutations.
///
/// Appends revision records; it never edits the base documents in place.
/// Loaded views pick the revisions up on their next load.
pub struct RegistryWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RegistryWriter {
    /// Create a writer for the given registry directory.
    pub fn new(registry_dir: &Path) -> Self {
        Self {
            path: registry_dir.join(REVISIONS_FILE),
            lock: Mutex::new(()),
        }
    }

    /// Append a revision record.
    pub fn append(
        &self,
        jurisdiction_id: JurisdictionId,
        change: RevisionChange,
        recorded_by: impl Into<String>,
        note: impl Into<String>,
    ) -> Result<RegistryRevision, RegistryError> {
        let revision = RegistryRevision {
            id: uuid::Uuid::new_v4().to_string(),
            jurisdiction_id,
            change,
            recorded_by: recorded_by.into(),
            recorded_at: Utc::now(),
            note: note.into(),
        };
        let line = serde_json::to_string(&revision).expect("revision serialization failed");

        let _guard = self.lock.lock();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(revision)
    }
}

/// The set of jurisdictions for which geographic tessellation is
/// nonsensical. Consulted before any geometric work.
#[derive(Debug, Clone, Default)]
pub struct AtLargeRegistry {
    ids: BTreeSet<JurisdictionId>,
}

impl AtLargeRegistry {
    /// Load from `at_large.json` (a JSON array of jurisdiction ids).
    /// A missing file is an empty registry.
    pub fn load(registry_dir: &Path) -> Result<Self, RegistryError> {
        let path = registry_dir.join(AT_LARGE_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)?;
        let ids: BTreeSet<JurisdictionId> =
            serde_json::from_str(&text).map_err(|e| RegistryError::Parse {
                file: AT_LARGE_FILE.to_string(),
                line: 1,
                detail: e.to_string(),
            })?;
        Ok(Self { ids })
    }

    /// Build from an explicit id set.
    pub fn from_ids(ids: impl IntoIterator<Item = JurisdictionId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Whether the jurisdiction bypasses tessellation.
    pub fn contains(&self, id: &JurisdictionId) -> bool {
        self.ids.contains(id)
    }

    /// Iterate registered ids.
    pub fn iter(&self) -> impl Iterator<Item = &JurisdictionId> {
        self.ids.iter()
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
