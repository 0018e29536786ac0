//! Append-only quarantine ledger.
//!
//! Rejected subjects land here with their full snapshot and the verdict
//! that rejected them, so review never re-fetches anything. Records are
//! newline-delimited canonical JSON and are never rewritten: a review or a
//! restoration is a new subordinate record, not an edit.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::types::{DistrictId, JurisdictionId, QuarantineReason, TessellationProof};

/// Ledger file name inside the quarantine directory.
pub const LEDGER_FILE: &str = "ledger.ndjson";

/// Errors from ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum QuarantineError {
    /// Filesystem failure.
    #[error("quarantine io: {0}")]
    Io(#[from] std::io::Error),
    /// A ledger line failed to parse.
    #[error("quarantine ledger line {line}: {detail}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// Parser message.
        detail: String,
    },
    /// The referenced entry does not exist.
    #[error("unknown quarantine entry {0}")]
    UnknownEntry(QuarantineId),
}

/// Identifier of a quarantine entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuarantineId(String);

impl QuarantineId {
    fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QuarantineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What was quarantined.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuarantineSubject {
    /// An upstream portal, by URL.
    Portal {
        /// Portal URL.
        url: String,
    },
    /// A single district.
    District {
        /// District id.
        id: DistrictId,
    },
    /// A whole jurisdiction's candidate set.
    Jurisdiction {
        /// Jurisdiction id.
        id: JurisdictionId,
    },
}

/// Review outcome for a quarantined subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Not yet reviewed.
    Pending,
    /// Reviewed: the rejection was correct, the data is bad.
    Approved,
    /// Reviewed: the rejection was wrong (tolerances, registry error).
    Rejected,
    /// The underlying problem was remediated upstream or in the registry.
    Fixed,
}

/// The initial quarantine record for a subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    /// Entry id.
    pub id: QuarantineId,
    /// What was quarantined.
    pub subject: QuarantineSubject,
    /// Stable reason code.
    pub reason_code: QuarantineReason,
    /// Human-readable detail.
    pub detail: String,
    /// The validator's verdict, when one was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_proof: Option<TessellationProof>,
    /// Full snapshot of the subject at rejection time, for review and
    /// restoration.
    pub snapshot_of_subject: serde_json::Value,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

/// A subordinate review record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// The entry under review.
    pub entry_id: QuarantineId,
    /// Review outcome.
    pub outcome: ReviewStatus,
    /// Who reviewed.
    pub reviewer: String,
    /// Review notes.
    pub notes: String,
    /// When the review was recorded.
    pub reviewed_at: DateTime<Utc>,
}

/// A subordinate restoration record: the subject snapshot was handed back
/// for re-insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestorationRecord {
    /// The restored entry.
    pub entry_id: QuarantineId,
    /// When restoration happened.
    pub restored_at: DateTime<Utc>,
}

/// One line in the ledger file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum LedgerRecord {
    Entry(QuarantineEntry),
    Review(ReviewRecord),
    Restoration(RestorationRecord),
}

#[derive(Debug, Default)]
struct LedgerIndex {
    entries: BTreeMap<QuarantineId, QuarantineEntry>,
    reviews: BTreeMap<QuarantineId, Vec<ReviewRecord>>,
    restored: BTreeMap<QuarantineId, DateTime<Utc>>,
}

impl LedgerIndex {
    fn apply(&mut self, record: LedgerRecord) {
        match record {
            LedgerRecord::Entry(e) => {
                self.entries.insert(e.id.clone(), e);
            }
            LedgerRecord::Review(r) => {
                self.reviews.entry(r.entry_id.clone()).or_default().push(r);
            }
            LedgerRecord::Restoration(r) => {
                self.restored.insert(r.entry_id.clone(), r.restored_at);
            }
        }
    }

    fn status(&self, id: &QuarantineId) -> Option<ReviewStatus> {
        if !self.entries.contains_key(id) {
            return None;
        }
        Some(
            self.reviews
                .get(id)
                .and_then(|rs| rs.last())
                .map(|r| r.outcome)
                .unwrap_or(ReviewStatus::Pending),
        )
    }

    /// Active = still standing: not restored and not marked fixed.
    fn is_active(&self, id: &QuarantineId) -> bool {
        if self.restored.contains_key(id) {
            return false;
        }
        !matches!(self.status(id), Some(ReviewStatus::Fixed) | None)
    }
}

/// The append-only quarantine ledger with its in-memory index.
pub struct QuarantineLedger {
    path: PathBuf,
    writer: Mutex<()>,
    index: RwLock<LedgerIndex>,
}

impl QuarantineLedger {
    /// Open (or create) the ledger in `quarantine_dir`, replaying existing
    /// records into the index.
    pub fn open(quarantine_dir: &Path) -> Result<Self, QuarantineError> {
        let path = quarantine_dir.join(LEDGER_FILE);
        let mut index = LedgerIndex::default();
        if path.is_file() {
            let text = fs::read_to_string(&path)?;
            for (i, line) in text.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: LedgerRecord =
                    serde_json::from_str(line).map_err(|e| QuarantineError::Parse {
                        line: i + 1,
                        detail: e.to_string(),
                    })?;
                index.apply(record);
            }
        }
        Ok(Self {
            path,
            writer: Mutex::new(()),
            index: RwLock::new(index),
        })
    }

    fn append(&self, record: &LedgerRecord) -> Result<(), QuarantineError> {
        let line = serde_json::to_string(record).expect("ledger serialization failed");
        let _guard = self.writer.lock();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Quarantine a subject. Returns the new entry id.
    pub fn quarantine(
        &self,
        subject: QuarantineSubject,
        reason_code: QuarantineReason,
        detail: impl Into<String>,
        validation_proof: Option<TessellationProof>,
        snapshot_of_subject: serde_json::Value,
    ) -> Result<QuarantineId, QuarantineError> {
        let entry = QuarantineEntry {
            id: QuarantineId::fresh(),
            subject,
            reason_code,
            detail: detail.into(),
            validation_proof,
            snapshot_of_subject,
            created_at: Utc::now(),
        };
        let id = entry.id.clone();
        tracing::warn!(
            entry = %id,
            reason = %reason_code,
            subject = ?entry.subject,
            "subject quarantined"
        );
        self.append(&LedgerRecord::Entry(entry.clone()))?;
        self.index.write().apply(LedgerRecord::Entry(entry));
        Ok(id)
    }

    /// Record a review outcome as a subordinate record.
    pub fn mark_review(
        &self,
        id: &QuarantineId,
        outcome: ReviewStatus,
        reviewer: impl Into<String>,
        notes: impl Into<String>,
    ) -> Result<(), QuarantineError> {
        if !self.index.read().entries.contains_key(id) {
            return Err(QuarantineError::UnknownEntry(id.clone()));
        }
        let record = ReviewRecord {
            entry_id: id.clone(),
            outcome,
            reviewer: reviewer.into(),
            notes: notes.into(),
            reviewed_at: Utc::now(),
        };
        self.append(&LedgerRecord::Review(record.clone()))?;
        self.index.write().apply(LedgerRecord::Review(record));
        Ok(())
    }

    /// Yield the original subject snapshot for re-insertion, recording the
    /// restoration.
    pub fn restore(&self, id: &QuarantineId) -> Result<serde_json::Value, QuarantineError> {
        let snapshot = {
            let index = self.index.read();
            index
                .entries
                .get(id)
                .map(|e| e.snapshot_of_subject.clone())
                .ok_or_else(|| QuarantineError::UnknownEntry(id.clone()))?
        };
        let record = RestorationRecord {
            entry_id: id.clone(),
            restored_at: Utc::now(),
        };
        self.append(&LedgerRecord::Restoration(record.clone()))?;
        self.index.write().apply(LedgerRecord::Restoration(record));
        Ok(snapshot)
    }

    /// Whether any active entry stands against this subject.
    pub fn is_quarantined(&self, subject: &QuarantineSubject) -> bool {
        let index = self.index.read();
        index
            .entries
            .values()
            .filter(|e| &e.subject == subject)
            .any(|e| index.is_active(&e.id))
    }

    /// Current review status of an entry.
    pub fn status(&self, id: &QuarantineId) -> Option<ReviewStatus> {
        self.index.read().status(id)
    }

    /// Entries with no review yet, oldest first.
    pub fn pending(&self) -> Vec<QuarantineEntry> {
        let index = self.index.read();
        let mut out: Vec<QuarantineEntry> = index
            .entries
            .values()
            .filter(|e| index.status(&e.id) == Some(ReviewStatus::Pending))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Total number of entries ever written.
    pub fn len(&self) -> usize {
        self.index.read().entries.len()
    }

    /// Whether the ledger has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> QuarantineSubject {
        QuarantineSubject::Jurisdiction {
            id: JurisdictionId::new("4856348"),
        }
    }

    fn open_ledger(dir: &Path) -> QuarantineLedger {
        QuarantineLedger::open(dir).unwrap()
    }

    #[test]
    fn test_quarantine_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_ledger(dir.path());

        assert!(!ledger.is_quarantined(&subject()));
        let id = ledger
            .quarantine(
                subject(),
                QuarantineReason::WrongGovernance,
                "11 polygons offered for an at-large council",
                None,
                serde_json::json!({"district_count": 11}),
            )
            .unwrap();
        assert!(ledger.is_quarantined(&subject()));
        assert_eq!(ledger.status(&id), Some(ReviewStatus::Pending));
        assert_eq!(ledger.pending().len(), 1);
    }

    #[test]
    fn test_review_is_subordinate_record() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_ledger(dir.path());
        let id = ledger
            .quarantine(
                subject(),
                QuarantineReason::WrongGovernance,
                "detail",
                None,
                serde_json::Value::Null,
            )
            .unwrap();

        ledger
            .mark_review(&id, ReviewStatus::Approved, "reviewer@example.org", "confirmed bad")
            .unwrap();
        assert_eq!(ledger.status(&id), Some(ReviewStatus::Approved));
        // Approved = confirmed bad data; the quarantine still stands.
        assert!(ledger.is_quarantined(&subject()));

        ledger
            .mark_review(&id, ReviewStatus::Fixed, "reviewer@example.org", "registry remediated")
            .unwrap();
        assert!(!ledger.is_quarantined(&subject()));
    }

    #[test]
    fn test_restore_yields_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_ledger(dir.path());
        let snapshot = serde_json::json!({"districts": [1, 2, 3]});
        let id = ledger
            .quarantine(
                subject(),
                QuarantineReason::CardinalitySanity,
                "detail",
                None,
                snapshot.clone(),
            )
            .unwrap();

        let restored = ledger.restore(&id).unwrap();
        assert_eq!(restored, snapshot);
        assert!(!ledger.is_quarantined(&subject()));
    }

    #[test]
    fn test_ledger_replays_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let ledger = open_ledger(dir.path());
            ledger
                .quarantine(
                    subject(),
                    QuarantineReason::WrongDataType,
                    "precinct shapefile offered as council districts",
                    None,
                    serde_json::Value::Null,
                )
                .unwrap()
        };

        let reopened = open_ledger(dir.path());
        assert_eq!(reopened.len(), 1);
        assert!(reopened.is_quarantined(&subject()));
        assert_eq!(reopened.status(&id), Some(ReviewStatus::Pending));
    }

    #[test]
    fn test_records_never_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_ledger(dir.path());
        let id = ledger
            .quarantine(
                subject(),
                QuarantineReason::WrongGovernance,
                "d",
                None,
                serde_json::Value::Null,
            )
            .unwrap();
        let after_entry = fs::read_to_string(dir.path().join(LEDGER_FILE)).unwrap();

        ledger
            .mark_review(&id, ReviewStatus::Rejected, "r", "tolerances were wrong")
            .unwrap();
        let after_review = fs::read_to_string(dir.path().join(LEDGER_FILE)).unwrap();

        // The original bytes are a strict prefix: append-only.
        assert!(after_review.starts_with(&after_entry));
        assert_eq!(after_review.lines().count(), 2);
    }

    #[test]
    fn test_unknown_entry_errors() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = open_ledger(dir.path());
        let bogus = QuarantineId("no-such-entry".to_string());
        assert!(matches!(
            ledger.mark_review(&bogus, ReviewStatus::Approved, "r", "n"),
            Err(QuarantineError::UnknownEntry(_))
        ));
        assert!(ledger.restore(&bogus).is_err());
    }
}
