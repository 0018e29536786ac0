//! Build-side pipeline: fetchers → validator workers → snapshot builder.
//!
//! Single-writer, producer–consumer. Fetcher tasks push candidate sets
//! into a bounded channel; a pool of validator workers drains it in
//! parallel (jurisdictions are independent, so workers share nothing
//! mutable); the snapshot builder then runs single-threaded over the full
//! admitted set, because canonical ordering and Merkle construction must be
//! deterministic.
//!
//! Rejections never abort a build: they route through quarantine, and the
//! prior snapshot's records for the jurisdiction, if any, are carried
//! forward unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, watch};

use crate::config::{AtlasConfig, LeafHashAlgorithm, ToleranceConfig};
use crate::quarantine::{QuarantineLedger, QuarantineSubject};
use crate::registry::{AtLargeRegistry, BoundaryRegistry};
use crate::snapshot::{
    AdmissionOrigin, AdmittedSet, LoadedSnapshot, SnapshotBuildError, SnapshotBuilder,
    SnapshotManifest, SnapshotStore,
};
use crate::types::{CandidateDistrictSet, Provenance, TessellationProof};
use crate::validator::{TessellationResult, TessellationValidator};

/// Upstream contract: anything that can produce candidate sets.
///
/// Fetchers own transport and format; the pipeline only sees this trait.
#[async_trait]
pub trait CandidateSource: Send {
    /// The next candidate set, or `None` when the source is drained.
    async fn next_candidate(&mut self) -> Option<CandidateDistrictSet>;
}

/// A pre-collected source, for tests and replays.
pub struct VecSource {
    candidates: std::vec::IntoIter<CandidateDistrictSet>,
}

impl VecSource {
    /// Wrap a candidate list.
    pub fn new(candidates: Vec<CandidateDistrictSet>) -> Self {
        Self {
            candidates: candidates.into_iter(),
        }
    }
}

#[async_trait]
impl CandidateSource for VecSource {
    async fn next_candidate(&mut self) -> Option<CandidateDistrictSet> {
        self.candidates.next()
    }
}

/// Pipeline sizing.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Validator worker count.
    pub workers: usize,
    /// Bounded channel capacity between fetchers and workers.
    pub channel_capacity: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            channel_capacity: 64,
        }
    }
}

/// Outcome counters returned alongside the manifest.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    /// Candidates admitted fresh.
    pub admitted: u32,
    /// Candidates rejected and quarantined.
    pub quarantined: u32,
    /// Jurisdictions carried forward from the prior snapshot.
    pub carried_forward: u32,
    /// At-large bypasses.
    pub at_large: u32,
}

/// One snapshot generation: validate every candidate, quarantine rejects,
/// carry forward priors, build, publish.
pub struct BuildPipeline {
    registry: Arc<BoundaryRegistry>,
    at_large: Arc<AtLargeRegistry>,
    tolerances: ToleranceConfig,
    algorithm: LeafHashAlgorithm,
    options: BuildOptions,
}

impl BuildPipeline {
    /// Assemble a pipeline from loaded registries and configuration.
    pub fn new(
        config: &AtlasConfig,
        registry: Arc<BoundaryRegistry>,
        at_large: Arc<AtLargeRegistry>,
    ) -> Self {
        Self {
            registry,
            at_large,
            tolerances: config.tolerances.clone(),
            algorithm: config.leaf_hash,
            options: BuildOptions::default(),
        }
    }

    /// Override pipeline sizing.
    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    /// Run one full generation.
    ///
    /// `prior` is the currently published snapshot, consulted for
    /// carry-forward when a fresh candidate is rejected. `cancel` is
    /// observed between validations; on cancellation, partial work is
    /// discarded and the build aborts without publishing.
    pub async fn run(
        &self,
        snapshot_id: &str,
        sources: Vec<Box<dyn CandidateSource>>,
        quarantine: Arc<QuarantineLedger>,
        store: &SnapshotStore,
        prior: Option<Arc<LoadedSnapshot>>,
        cancel: watch::Receiver<bool>,
    ) -> Result<(SnapshotManifest, BuildReport), SnapshotBuildError> {
        let (candidate_tx, candidate_rx) = mpsc::channel::<CandidateDistrictSet>(
            self.options.channel_capacity,
        );
        let candidate_rx = Arc::new(tokio::sync::Mutex::new(candidate_rx));
        let (outcome_tx, mut outcome_rx) =
            mpsc::channel::<(CandidateDistrictSet, TessellationResult)>(
                self.options.channel_capacity,
            );

        // Fetcher tasks: independent producers into the bounded channel.
        // Cancellation is observed between fetches.
        let mut producers = Vec::new();
        for mut source in sources {
            let tx = candidate_tx.clone();
            let cancel = cancel.clone();
            producers.push(tokio::spawn(async move {
                loop {
                    if *cancel.borrow() {
                        return;
                    }
                    let Some(candidate) = source.next_candidate().await else {
                        return;
                    };
                    if tx.send(candidate).await.is_err() {
                        return;
                    }
                }
            }));
        }
        drop(candidate_tx);

        // Validator workers: jurisdiction-independent, nothing shared but
        // read-only registries.
        let mut workers = Vec::new();
        for _ in 0..self.options.workers.max(1) {
            let registry = self.registry.clone();
            let at_large = self.at_large.clone();
            let tolerances = self.tolerances.clone();
            let rx = candidate_rx.clone();
            let tx = outcome_tx.clone();
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    if *cancel.borrow() {
                        return;
                    }
                    let candidate = { rx.lock().await.recv().await };
                    let Some(candidate) = candidate else { return };
                    let validator =
                        TessellationValidator::new(&registry, &at_large, &tolerances);
                    let result = validator.validate(&candidate);
                    if tx.send((candidate, result)).await.is_err() {
                        return;
                    }
                }
            }));
        }
        drop(outcome_tx);

        // Single consumer: collect outcomes, quarantine rejects, carry
        // forward priors.
        let mut sets: Vec<AdmittedSet> = Vec::new();
        let mut report = BuildReport::default();
        while let Some((candidate, result)) = outcome_rx.recv().await {
            match result {
                TessellationResult::Admitted { proof, districts } => {
                    let origin = if districts.is_empty() {
                        report.at_large += 1;
                        AdmissionOrigin::AtLargeBypass
                    } else {
                        report.admitted += 1;
                        AdmissionOrigin::Fresh
                    };
                    let provenance = provenance_records(&candidate, &districts);
                    sets.push(AdmittedSet {
                        jurisdiction_id: candidate.jurisdiction_id.clone(),
                        proof,
                        districts,
                        provenance,
                        origin,
                    });
                }
                TessellationResult::Rejected { proof, reason } => {
                    report.quarantined += 1;
                    let snapshot_of_subject = serde_json::to_value(&candidate)
                        .unwrap_or(serde_json::Value::Null);
                    quarantine
                        .quarantine(
                            QuarantineSubject::Jurisdiction {
                                id: candidate.jurisdiction_id.clone(),
                            },
                            reason,
                            format!(
                                "candidate from {} rejected during {snapshot_id} build",
                                candidate.source_url
                            ),
                            Some(proof.clone()),
                            snapshot_of_subject,
                        )
                        .map_err(|e| {
                            SnapshotBuildError::Io(std::io::Error::other(e.to_string()))
                        })?;

                    if let Some(prior) = &prior {
                        let carried = prior
                            .districts_for_jurisdiction(
                                &candidate.jurisdiction_id,
                                candidate.level,
                            )
                            .map_err(|e| {
                                SnapshotBuildError::Io(std::io::Error::other(e.to_string()))
                            })?;
                        if !carried.is_empty() {
                            report.carried_forward += 1;
                            let (districts, provenance) = carried.into_iter().unzip();
                            sets.push(AdmittedSet {
                                jurisdiction_id: candidate.jurisdiction_id.clone(),
                                proof: carried_forward_proof(&proof),
                                districts,
                                provenance,
                                origin: AdmissionOrigin::CarriedForward,
                            });
                        }
                    }
                }
            }
        }

        for task in producers.into_iter().chain(workers) {
            let _ = task.await;
        }
        if *cancel.borrow() {
            tracing::warn!(snapshot = %snapshot_id, "build cancelled; discarding partial work");
            return Err(SnapshotBuildError::Io(std::io::Error::other(
                "build cancelled",
            )));
        }

        let builder = SnapshotBuilder::new(snapshot_id, self.algorithm);
        let built = builder.build(sets, &self.registry)?;
        store.publish(&built)?;

        tracing::info!(
            snapshot = %snapshot_id,
            admitted = report.admitted,
            quarantined = report.quarantined,
            carried_forward = report.carried_forward,
            at_large = report.at_large,
            "build complete"
        );
        Ok((built.manifest, report))
    }
}

fn provenance_records(
    candidate: &CandidateDistrictSet,
    districts: &[crate::types::District],
) -> Vec<Provenance> {
    let now = Utc::now();
    districts
        .iter()
        .map(|district| {
            let raw = candidate
                .districts
                .iter()
                .find(|c| c.local_number == district.local_number)
                .map(|c| c.raw_attributes.clone())
                .unwrap_or_default();
            Provenance {
                district_id: district.id.clone(),
                source_url: candidate.source_url.clone(),
                authority_level: candidate.authority_level,
                acquired_at: candidate.acquired_at,
                response_content_hash: candidate.response_content_hash.clone(),
                source_attributes: raw,
                effective_from: now,
                effective_to: None,
            }
        })
        .collect()
}

/// The proof recorded for a carried-forward jurisdiction: the prior
/// admission stands; the fresh rejection is in quarantine.
fn carried_forward_proof(rejection: &TessellationProof) -> TessellationProof {
    let mut proof = rejection.clone();
    proof.notes.push("carried forward from prior snapshot after rejected refresh".to_string());
    proof
}
