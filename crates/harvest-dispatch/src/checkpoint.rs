use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use harvest_core::error::HarvestError;
use harvest_core::models::{AnalysisResult, InFlight, JobOutcome, Repository, SkipRecord};

/// The sequence number a repository was given when it was first dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobKey {
    pub sequence: u64,
    pub project: String,
    pub repo: String,
}

/// Durable progress of one harvest run.
///
/// Every job that produced a result or a skip record is done and is never
/// dispatched again when the run resumes. Sequence numbers are bound to
/// repositories in `jobs`, so they stay put when the organization gains or
/// loses repositories between attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Highest sequence number below which every job is done.
    pub last_sequence: u64,
    pub results: Vec<AnalysisResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<InFlight>,
    pub run_id: Uuid,
    pub platform: String,
    pub organization: String,
    #[serde(default)]
    pub skipped: Vec<SkipRecord>,
    #[serde(default)]
    pub jobs: Vec<JobKey>,
}

impl Checkpoint {
    pub fn new(run_id: Uuid, platform: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            last_sequence: 0,
            results: Vec::new(),
            in_flight: None,
            run_id,
            platform: platform.into(),
            organization: organization.into(),
            skipped: Vec::new(),
            jobs: Vec::new(),
        }
    }

    /// Number the admitted repositories for dispatch, ordered by sequence.
    ///
    /// Repositories this checkpoint already knows keep their number; new
    /// ones are numbered after the highest known one, in the order given.
    /// Repositories that are no longer admitted are forgotten.
    pub fn assign(&mut self, admitted: &[Repository]) -> Vec<(u64, Repository)> {
        let mut known: HashMap<(String, String), u64> = self
            .results
            .iter()
            .map(|r| ((r.project.clone(), r.repo.clone()), r.sequence))
            .chain(
                self.skipped
                    .iter()
                    .map(|s| ((s.project.clone(), s.repo.clone()), s.sequence)),
            )
            .collect();
        known.extend(
            self.jobs
                .iter()
                .map(|j| ((j.project.clone(), j.repo.clone()), j.sequence)),
        );
        let mut next = known.values().copied().max().unwrap_or(0) + 1;

        let mut jobs: Vec<(u64, Repository)> = admitted
            .iter()
            .map(|repo| {
                let key = (repo.project.clone(), repo.slug.clone());
                let sequence = *known.entry(key).or_insert_with(|| {
                    next += 1;
                    next - 1
                });
                (sequence, repo.clone())
            })
            .collect();
        jobs.sort_by_key(|(sequence, _)| *sequence);

        self.jobs = jobs
            .iter()
            .map(|(sequence, repo)| JobKey {
                sequence: *sequence,
                project: repo.project.clone(),
                repo: repo.slug.clone(),
            })
            .collect();
        self.advance();
        jobs
    }

    /// Read a checkpoint; `None` when there is none at `path`.
    pub fn load(path: &Path) -> Result<Option<Self>, HarvestError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HarvestError::Checkpoint {
                    message: format!("cannot read {}: {e}", path.display()),
                })
            }
        };
        let checkpoint: Self = serde_json::from_str(&content).map_err(|e| HarvestError::Checkpoint {
            message: format!("malformed checkpoint {}: {e}", path.display()),
        })?;
        debug!(
            path = %path.display(),
            results = checkpoint.results.len(),
            last_sequence = checkpoint.last_sequence,
            "loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    /// Write through a temporary file so a crash never leaves a torn checkpoint.
    pub fn save(&self, path: &Path) -> Result<(), HarvestError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = temp_path(path);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), last_sequence = self.last_sequence, "checkpoint saved");
        Ok(())
    }

    /// Remove the checkpoint after a completed run.
    pub fn delete(path: &Path) -> Result<(), HarvestError> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "checkpoint removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Refuse to resume a run of another platform or organization.
    pub fn ensure_matches(&self, platform: &str, organization: &str) -> Result<(), HarvestError> {
        if self.platform != platform || self.organization != organization {
            return Err(HarvestError::Checkpoint {
                message: format!(
                    "checkpoint belongs to {}/{}, not {platform}/{organization}",
                    self.platform, self.organization
                ),
            });
        }
        Ok(())
    }

    /// Sequence numbers of every finished job.
    pub fn done(&self) -> BTreeSet<u64> {
        self.results
            .iter()
            .map(|r| r.sequence)
            .chain(self.skipped.iter().map(|s| s.sequence))
            .collect()
    }

    pub fn is_done(&self, sequence: u64) -> bool {
        self.results.iter().any(|r| r.sequence == sequence)
            || self.skipped.iter().any(|s| s.sequence == sequence)
    }

    /// Fold one job outcome in. Outcomes of finished jobs are ignored so a
    /// result is never recorded twice.
    pub fn record(&mut self, outcome: &JobOutcome) {
        if self.is_done(outcome.sequence()) {
            return;
        }
        match outcome {
            JobOutcome::Analyzed(result) => self.results.push(result.clone()),
            JobOutcome::Skipped(skip) => self.skipped.push(skip.clone()),
            JobOutcome::RateLimited { in_flight, .. } => {
                if self.in_flight.is_none() {
                    self.in_flight = Some(in_flight.clone());
                }
                return;
            }
        }
        self.advance();
    }

    /// Start a new attempt: the previous stop point no longer applies.
    pub fn clear_in_flight(&mut self) {
        self.in_flight = None;
    }

    /// Move `last_sequence` over finished jobs and over numbers whose
    /// repository has since disappeared.
    fn advance(&mut self) {
        let done = self.done();
        let assigned: BTreeSet<u64> = self.jobs.iter().map(|j| j.sequence).collect();
        let highest = assigned.last().copied().unwrap_or(0);
        loop {
            let next = self.last_sequence + 1;
            let vanished = next < highest && !assigned.contains(&next);
            if !done.contains(&next) && !vanished {
                break;
            }
            self.last_sequence = next;
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "checkpoint".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::models::{Repository, ScanReport};

    fn result(sequence: u64, repo: &str) -> AnalysisResult {
        AnalysisResult {
            sequence,
            project: "core".into(),
            repo: repo.into(),
            branch: "main".into(),
            size: 10,
            commits: 1,
            branch_count: 1,
            report: ScanReport::default(),
        }
    }

    #[test]
    fn test_record_advances_contiguous_prefix() {
        let mut cp = Checkpoint::new(Uuid::now_v7(), "gh", "acme");
        cp.record(&JobOutcome::Analyzed(result(2, "b")));
        assert_eq!(cp.last_sequence, 0);
        cp.record(&JobOutcome::Skipped(SkipRecord::empty(1, &Repository::new("core", "a"))));
        assert_eq!(cp.last_sequence, 2);
        cp.record(&JobOutcome::Analyzed(result(2, "b")));
        assert_eq!(cp.results.len(), 1);
    }

    #[test]
    fn test_rate_limited_sets_in_flight_once() {
        let mut cp = Checkpoint::new(Uuid::now_v7(), "gh", "acme");
        let first = InFlight {
            project: "core".into(),
            repo: "a".into(),
            branch: String::new(),
        };
        cp.record(&JobOutcome::RateLimited {
            sequence: 1,
            in_flight: first.clone(),
        });
        cp.record(&JobOutcome::RateLimited {
            sequence: 2,
            in_flight: InFlight {
                repo: "b".into(),
                ..first.clone()
            },
        });
        assert_eq!(cp.in_flight, Some(first));
        assert!(!cp.is_done(1));
    }

    #[test]
    fn test_assign_numbers_from_one() {
        let mut cp = Checkpoint::new(Uuid::now_v7(), "gh", "acme");
        let jobs = cp.assign(&[Repository::new("core", "a"), Repository::new("core", "b")]);
        let numbered: Vec<(u64, &str)> = jobs.iter().map(|(s, r)| (*s, r.slug.as_str())).collect();
        assert_eq!(numbered, vec![(1, "a"), (2, "b")]);
        assert_eq!(cp.jobs.len(), 2);
    }

    #[test]
    fn test_assign_keeps_numbers_when_repositories_change() {
        let mut cp = Checkpoint::new(Uuid::now_v7(), "gh", "acme");
        cp.assign(&[
            Repository::new("core", "b"),
            Repository::new("core", "c"),
            Repository::new("core", "d"),
        ]);
        cp.record(&JobOutcome::Analyzed(result(1, "b")));
        cp.record(&JobOutcome::Analyzed(result(2, "c")));

        // "a" sorts first but was not there when the run started; "d" is gone.
        let jobs = cp.assign(&[
            Repository::new("core", "a"),
            Repository::new("core", "b"),
            Repository::new("core", "c"),
        ]);
        let pending: Vec<(u64, &str)> = jobs
            .iter()
            .filter(|(s, _)| !cp.is_done(*s))
            .map(|(s, r)| (*s, r.slug.as_str()))
            .collect();
        assert_eq!(pending, vec![(4, "a")]);
        // 3 belonged to "d", which no longer needs doing.
        assert_eq!(cp.last_sequence, 3);

        cp.record(&JobOutcome::Analyzed(result(4, "a")));
        assert_eq!(cp.last_sequence, 4);
    }

    #[test]
    fn test_save_load_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoint_gh.json");
        let mut cp = Checkpoint::new(Uuid::now_v7(), "gh", "acme");
        cp.record(&JobOutcome::Analyzed(result(1, "a")));
        cp.save(&path).unwrap();
        assert!(!temp_path(&path).exists());

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["lastSequence"], 1);
        assert!(raw["results"].is_array());

        assert_eq!(Checkpoint::load(&path).unwrap(), Some(cp));
        Checkpoint::delete(&path).unwrap();
        assert!(Checkpoint::load(&path).unwrap().is_none());
        Checkpoint::delete(&path).unwrap();
    }

    #[test]
    fn test_malformed_and_foreign_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Checkpoint::load(&path).unwrap_err(),
            HarvestError::Checkpoint { .. }
        ));

        let cp = Checkpoint::new(Uuid::now_v7(), "gh", "acme");
        assert!(cp.ensure_matches("gh", "acme").is_ok());
        assert!(cp.ensure_matches("gl", "acme").is_err());
    }
}
