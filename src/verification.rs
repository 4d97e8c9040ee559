//! Post-migration verification
//!
//! Compares the finished source and target repositories, read-only, with
//! four independent checks:
//!
//! 1. **Structure**: path sets under both roots, target paths normalized
//!    onto the source root; passes with zero missing paths
//! 2. **Content**: SHA-256 of a random sample of source files against
//!    their mapped target files; passes when every retrieved pair matches
//! 3. **History**: provenance comments of recent target revisions are
//!    cross-referenced with recent source revisions; passes when the id
//!    match percentage exceeds the configured threshold
//! 4. **Labels**: set difference of label names; passes with zero missing
//!
//! Mismatches are findings, never errors. Every check records what it saw
//! so the artifacts written by [`VerificationReport::write_artifacts`] are
//! enough to recompute each verdict.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replayvc::config::MigrationConfig;
//! use replayvc::verification::VerificationEngine;
//! use replayvc::vcs::TfRepositoryClient;
//! use std::path::Path;
//!
//! # fn main() -> replayvc::Result<()> {
//! let config = MigrationConfig::load(Path::new("replayvc.json"))?;
//! let source = TfRepositoryClient::new(&config.tool, config.source.clone());
//! let target = TfRepositoryClient::new(&config.tool, config.target.clone());
//!
//! let report = VerificationEngine::new(&config, &source, &target).run();
//! report.write_artifacts(&config.verification.results_dir)?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

use crate::config::MigrationConfig;
use crate::error::Result;
use crate::operations::PathMapping;
use crate::provenance::{self, Provenance};
use crate::types::RevisionId;
use crate::utils;
use crate::vcs::{RepositoryClient, RepositoryItem};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Structure check result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureReport {
    /// Items under the source root
    pub source_count: usize,
    /// Items under the target root
    pub target_count: usize,
    /// Paths present in both, after normalization
    pub matching_count: usize,
    /// Source paths absent from the target
    pub missing: Vec<String>,
    /// Target paths absent from the source, in target form
    pub extra: Vec<String>,
    /// Sizes reported by the listings, keyed by reported path
    pub sizes: BTreeMap<String, u64>,
    /// Listing failure, if the check could not run
    pub error: Option<String>,
    /// Verdict
    pub passed: bool,
}

/// Outcome of comparing one sampled file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    /// Digests are equal
    Match,
    /// Digests differ
    Mismatch,
    /// The source content could not be retrieved
    SourceUnavailable,
    /// The target content could not be retrieved
    TargetUnavailable,
}

/// One sampled file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentSample {
    /// Source path
    pub source_path: String,
    /// Mapped target path
    pub target_path: String,
    /// Comparison outcome
    pub status: SampleStatus,
    /// Source digest, when retrieved
    pub source_hash: Option<String>,
    /// Target digest, when retrieved
    pub target_hash: Option<String>,
    /// Retrieval error, when any
    pub error: Option<String>,
}

/// Content check result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentReport {
    /// Source files available for sampling
    pub population: usize,
    /// Per-file results, sorted by path
    pub samples: Vec<ContentSample>,
    /// Pairs retrieved from both sides
    pub compared: usize,
    /// Pairs with equal digests
    pub matched: usize,
    /// Pairs with different digests
    pub mismatched: usize,
    /// Samples where either side could not be retrieved
    pub retrieval_failures: usize,
    /// Matched pairs as a percentage of compared pairs
    pub match_percentage: f64,
    /// Listing failure, if the check could not run
    pub error: Option<String>,
    /// Verdict
    pub passed: bool,
}

/// How a target revision referenced a source revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Id and comment recovered
    Full,
    /// Only the id recovered
    IdOnly,
}

/// One target revision that references a source revision in the window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionMatch {
    /// Referenced source revision
    pub source_id: RevisionId,
    /// Referencing target revision
    pub target_id: RevisionId,
    /// Template that matched
    pub kind: MatchKind,
    /// Source comment
    pub source_comment: String,
    /// Target comment
    pub target_comment: String,
    /// Comment recovered from the target, for full matches
    pub extracted_comment: Option<String>,
    /// Whether the recovered comment agrees with the source
    pub comment_match: bool,
}

/// History cross-reference result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryReport {
    /// Source revisions in the window
    pub source_count: usize,
    /// Target revisions in the window
    pub target_count: usize,
    /// Target revisions carrying any provenance comment
    pub migrated_target_revisions: usize,
    /// Matches against source revisions in the window
    pub matches: Vec<RevisionMatch>,
    /// Source ids in the window with no referencing target revision
    pub unmatched_source_ids: Vec<RevisionId>,
    /// Source comments, for the artifact
    pub source_comments: BTreeMap<RevisionId, String>,
    /// Distinct source ids referenced, as a percentage of the window
    pub id_match_percentage: f64,
    /// Matches whose comment also agrees, as a percentage of the window
    pub full_match_percentage: f64,
    /// Threshold the id percentage had to exceed
    pub threshold: f64,
    /// Listing failure, if the check could not run
    pub error: Option<String>,
    /// Verdict
    pub passed: bool,
}

/// Label parity result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelReport {
    /// Whether both repositories support labels
    pub supported: bool,
    /// Source label count
    pub source_count: usize,
    /// Target label count
    pub target_count: usize,
    /// Labels in both
    pub matching: Vec<String>,
    /// Source labels absent from the target
    pub missing: Vec<String>,
    /// Target labels absent from the source
    pub extra: Vec<String>,
    /// Listing failure, if the check could not run
    pub error: Option<String>,
    /// Verdict
    pub passed: bool,
}

/// Aggregate result of a verification run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Source root
    pub source_root: String,
    /// Target root
    pub target_root: String,
    /// Structure check
    pub structure: StructureReport,
    /// Content check
    pub content: ContentReport,
    /// History check
    pub history: HistoryReport,
    /// Label check
    pub labels: LabelReport,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

impl VerificationReport {
    /// Whether all four checks passed
    pub fn passed(&self) -> bool {
        self.structure.passed && self.content.passed && self.history.passed && self.labels.passed
    }

    /// Get a summary of the verification
    pub fn summary(&self) -> String {
        let verdict = |passed: bool| if passed { "pass" } else { "FAIL" };
        format!(
            "Verification {}: structure {} ({} missing, {} extra), content {} ({}/{} matched, {} retrieval failures), history {} ({:.1}% ids, {:.1}% full), labels {} ({} missing{})",
            verdict(self.passed()),
            verdict(self.structure.passed),
            self.structure.missing.len(),
            self.structure.extra.len(),
            verdict(self.content.passed),
            self.content.matched,
            self.content.compared,
            self.content.retrieval_failures,
            verdict(self.history.passed),
            self.history.id_match_percentage,
            self.history.full_match_percentage,
            verdict(self.labels.passed),
            self.labels.missing.len(),
            if self.labels.supported { "" } else { ", unsupported" },
        )
    }

    /// Write one CSV per check plus `verification_summary.json` into `dir`
    pub fn write_artifacts(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        let mut write = |name: &str, content: String| -> Result<()> {
            let path = dir.join(name);
            utils::atomic_write(&path, content.as_bytes())?;
            written.push(path);
            Ok(())
        };

        write("structure_comparison.csv", self.structure_csv())?;
        write("content_comparison.csv", self.content_csv())?;
        write("revision_comparison.csv", self.history_csv())?;
        write("label_comparison.csv", self.label_csv())?;
        write("verification_summary.json", serde_json::to_string_pretty(self)?)?;

        info!("Wrote {} verification artifacts to {:?}", written.len(), dir);
        Ok(written)
    }

    fn structure_csv(&self) -> String {
        let size = |path: &str| {
            self.structure
                .sizes
                .get(path)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "N/A".to_string())
        };
        let mut rows: Vec<Vec<String>> = Vec::new();
        if let Some(error) = &self.structure.error {
            rows.push(vec!["ERROR".to_string(), error.clone(), String::new()]);
        } else if self.structure.missing.is_empty() && self.structure.extra.is_empty() {
            rows.push(vec![
                "IDENTICAL".to_string(),
                format!("{} and {}", self.source_root, self.target_root),
                format!("{} items", self.structure.matching_count),
            ]);
        }
        for path in &self.structure.missing {
            rows.push(vec!["MISSING FROM TARGET".to_string(), path.clone(), size(path)]);
        }
        for path in &self.structure.extra {
            rows.push(vec!["EXTRA IN TARGET".to_string(), path.clone(), size(path)]);
        }
        utils::csv_document(&["Status", "Path", "Size (bytes)"], rows)
    }

    fn content_csv(&self) -> String {
        let rows = self.content.samples.iter().map(|s| {
            vec![
                s.source_path.clone(),
                s.target_path.clone(),
                (s.status == SampleStatus::Match).to_string(),
                s.source_hash.clone().unwrap_or_else(|| "N/A".to_string()),
                s.target_hash.clone().unwrap_or_else(|| "N/A".to_string()),
                s.error.clone().unwrap_or_default(),
            ]
        });
        utils::csv_document(
            &["Source Path", "Target Path", "Match", "Source Hash", "Target Hash", "Error"],
            rows,
        )
    }

    fn history_csv(&self) -> String {
        let mut rows: Vec<Vec<String>> = self
            .history
            .matches
            .iter()
            .map(|m| {
                vec![
                    m.source_id.to_string(),
                    m.target_id.to_string(),
                    match m.kind {
                        MatchKind::Full => "full".to_string(),
                        MatchKind::IdOnly => "id_only".to_string(),
                    },
                    m.source_comment.clone(),
                    m.target_comment.clone(),
                    m.extracted_comment.clone().unwrap_or_else(|| "N/A".to_string()),
                    m.comment_match.to_string(),
                ]
            })
            .collect();
        for id in &self.history.unmatched_source_ids {
            rows.push(vec![
                id.to_string(),
                "NOT FOUND".to_string(),
                "no_match".to_string(),
                self.history.source_comments.get(id).cloned().unwrap_or_default(),
                "N/A".to_string(),
                "N/A".to_string(),
                "false".to_string(),
            ]);
        }
        utils::csv_document(
            &[
                "Source ID",
                "Target ID",
                "Match Type",
                "Source Comment",
                "Target Comment",
                "Extracted Comment",
                "Comment Match",
            ],
            rows,
        )
    }

    fn label_csv(&self) -> String {
        let mut rows: Vec<Vec<String>> = Vec::new();
        if !self.labels.supported {
            rows.push(vec!["UNSUPPORTED".to_string(), String::new()]);
        }
        for label in &self.labels.matching {
            rows.push(vec!["MATCH".to_string(), label.clone()]);
        }
        for label in &self.labels.missing {
            rows.push(vec!["MISSING FROM TARGET".to_string(), label.clone()]);
        }
        for label in &self.labels.extra {
            rows.push(vec!["EXTRA IN TARGET".to_string(), label.clone()]);
        }
        utils::csv_document(&["Status", "Label"], rows)
    }
}

/// Runs the four checks over a source and a target repository
pub struct VerificationEngine<'a, S: RepositoryClient + ?Sized, T: RepositoryClient + ?Sized> {
    source: &'a S,
    target: &'a T,
    mapping: PathMapping,
    sample_size: usize,
    history_depth: usize,
    threshold: f64,
    seed: Option<u64>,
}

impl<'a, S: RepositoryClient + ?Sized, T: RepositoryClient + ?Sized> VerificationEngine<'a, S, T> {
    /// Engine configured from a migration configuration
    pub fn new(config: &MigrationConfig, source: &'a S, target: &'a T) -> Self {
        Self {
            source,
            target,
            mapping: PathMapping::new(config.source.root.clone(), config.target.root.clone()),
            sample_size: config.verification.sample_size,
            history_depth: config.verification.history_depth,
            threshold: config.verification.id_match_threshold,
            seed: config.verification.seed,
        }
    }

    /// Override the content sample size
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Override the history window
    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history_depth = depth;
        self
    }

    /// Make content sampling deterministic
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Run every check
    pub fn run(&self) -> VerificationReport {
        let start = Instant::now();
        let started_at = Utc::now();
        info!(
            "Verifying {} against {}",
            self.mapping.target_root(),
            self.mapping.source_root()
        );

        let source_items = self.source.list_items(self.mapping.source_root());
        let structure = self.check_structure(&source_items);
        let content = self.check_content(&source_items);
        let history = self.check_history();
        let labels = self.check_labels();

        let report = VerificationReport {
            started_at,
            source_root: self.mapping.source_root().to_string(),
            target_root: self.mapping.target_root().to_string(),
            structure,
            content,
            history,
            labels,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!("{}", report.summary());
        report
    }

    fn check_structure(&self, source_items: &Result<Vec<RepositoryItem>>) -> StructureReport {
        let mut report = StructureReport::default();

        let source_items = match source_items {
            Ok(items) => items,
            Err(e) => {
                report.error = Some(format!("source listing failed: {}", e));
                return report;
            }
        };
        let target_items = match self.target.list_items(self.mapping.target_root()) {
            Ok(items) => items,
            Err(e) => {
                report.error = Some(format!("target listing failed: {}", e));
                return report;
            }
        };

        let source_paths: BTreeSet<&str> = source_items.iter().map(|i| i.path.as_str()).collect();
        let mut target_paths: BTreeMap<String, &str> = BTreeMap::new();
        for item in &target_items {
            match self.mapping.to_source(&item.path) {
                Some(normalized) => {
                    target_paths.insert(normalized, item.path.as_str());
                }
                None => debug!("Target item outside root: {}", item.path),
            }
        }

        for item in source_items.iter().chain(target_items.iter()) {
            if let Some(size) = item.size {
                report.sizes.insert(item.path.clone(), size);
            }
        }

        report.source_count = source_paths.len();
        report.target_count = target_paths.len();
        report.missing = source_paths
            .iter()
            .filter(|p| !target_paths.contains_key(**p))
            .map(|p| p.to_string())
            .collect();
        report.extra = target_paths
            .iter()
            .filter(|(normalized, _)| !source_paths.contains(normalized.as_str()))
            .map(|(_, original)| original.to_string())
            .collect();
        report.matching_count = report.source_count - report.missing.len();
        report.passed = report.missing.is_empty();

        debug!(
            "Structure: {} source, {} target, {} missing, {} extra",
            report.source_count,
            report.target_count,
            report.missing.len(),
            report.extra.len()
        );
        report
    }

    fn check_content(&self, source_items: &Result<Vec<RepositoryItem>>) -> ContentReport {
        let mut report = ContentReport::default();
        let files: Vec<&RepositoryItem> = match source_items {
            Ok(items) => items.iter().filter(|i| !i.is_folder).collect(),
            Err(e) => {
                report.error = Some(format!("source listing failed: {}", e));
                return report;
            }
        };
        report.population = files.len();

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let sample: Vec<&RepositoryItem> = files
            .choose_multiple(&mut rng, self.sample_size.min(files.len()))
            .copied()
            .collect();
        debug!("Sampling {} of {} source files", sample.len(), files.len());

        let mut samples: Vec<ContentSample> = sample
            .par_iter()
            .map(|item| self.compare_file(&item.path))
            .collect();
        samples.sort_by(|a, b| a.source_path.cmp(&b.source_path));

        report.compared = samples
            .iter()
            .filter(|s| matches!(s.status, SampleStatus::Match | SampleStatus::Mismatch))
            .count();
        report.matched = samples.iter().filter(|s| s.status == SampleStatus::Match).count();
        report.mismatched = report.compared - report.matched;
        report.retrieval_failures = samples.len() - report.compared;
        report.match_percentage = utils::percentage(report.matched, report.compared);
        report.passed = report.mismatched == 0 && (report.compared > 0 || report.population == 0);
        report.samples = samples;

        if report.retrieval_failures > 0 {
            warn!("{} sampled files could not be retrieved", report.retrieval_failures);
        }
        report
    }

    fn compare_file(&self, source_path: &str) -> ContentSample {
        let target_path = self
            .mapping
            .to_target(source_path)
            .unwrap_or_else(|| source_path.to_string());
        let mut sample = ContentSample {
            source_path: source_path.to_string(),
            target_path: target_path.clone(),
            status: SampleStatus::SourceUnavailable,
            source_hash: None,
            target_hash: None,
            error: None,
        };

        let source_hash = match self.source.fetch_content(source_path) {
            Ok(bytes) => utils::hash_data(&bytes),
            Err(e) => {
                sample.error = Some(format!("source: {}", e));
                return sample;
            }
        };
        sample.source_hash = Some(source_hash.clone());

        let target_hash = match self.target.fetch_content(&target_path) {
            Ok(bytes) => utils::hash_data(&bytes),
            Err(e) => {
                sample.status = SampleStatus::TargetUnavailable;
                sample.error = Some(format!("target: {}", e));
                return sample;
            }
        };

        sample.status = if source_hash == target_hash {
            SampleStatus::Match
        } else {
            SampleStatus::Mismatch
        };
        sample.target_hash = Some(target_hash);
        sample
    }

    fn check_history(&self) -> HistoryReport {
        let mut report = HistoryReport {
            threshold: self.threshold,
            ..Default::default()
        };

        let (source_revisions, target_revisions) = match (
            self.source.list_revisions(self.history_depth),
            self.target.list_revisions(self.history_depth),
        ) {
            (Ok(s), Ok(t)) => (s, t),
            (Err(e), _) | (_, Err(e)) => {
                report.error = Some(format!("revision listing failed: {}", e));
                return report;
            }
        };

        report.source_count = source_revisions.len();
        report.target_count = target_revisions.len();
        report.source_comments = source_revisions
            .iter()
            .map(|r| (r.id, r.comment_text().to_string()))
            .collect();

        let mut referenced = BTreeSet::new();
        for target in &target_revisions {
            let target_comment = target.comment_text();
            let Some(provenance) = provenance::parse(target_comment) else {
                continue;
            };
            report.migrated_target_revisions += 1;

            let source_id = provenance.id();
            let Some(source_comment) = report.source_comments.get(&source_id).cloned() else {
                continue;
            };
            referenced.insert(source_id);

            let (kind, extracted, comment_match) = match &provenance {
                Provenance::Full { comment, .. } => (
                    MatchKind::Full,
                    Some(comment.clone()),
                    provenance::comment_matches(&source_comment, comment),
                ),
                Provenance::IdOnly { .. } => (MatchKind::IdOnly, None, false),
            };
            report.matches.push(RevisionMatch {
                source_id,
                target_id: target.id,
                kind,
                source_comment,
                target_comment: target_comment.to_string(),
                extracted_comment: extracted,
                comment_match,
            });
        }

        report.unmatched_source_ids = report
            .source_comments
            .keys()
            .filter(|id| !referenced.contains(*id))
            .copied()
            .collect();

        let full_ids: BTreeSet<RevisionId> = report
            .matches
            .iter()
            .filter(|m| m.comment_match)
            .map(|m| m.source_id)
            .collect();
        report.id_match_percentage = utils::percentage(referenced.len(), report.source_count);
        report.full_match_percentage = utils::percentage(full_ids.len(), report.source_count);
        report.passed = report.id_match_percentage > self.threshold;

        debug!(
            "History: {}/{} source ids referenced ({:.1}%)",
            referenced.len(),
            report.source_count,
            report.id_match_percentage
        );
        report
    }

    fn check_labels(&self) -> LabelReport {
        let mut report = LabelReport::default();
        let (source, target) = match (self.source.list_labels(), self.target.list_labels()) {
            (Ok(Some(s)), Ok(Some(t))) => (s, t),
            (Ok(_), Ok(_)) => {
                debug!("Labels unsupported on at least one side; skipping");
                report.passed = true;
                return report;
            }
            (Err(e), _) | (_, Err(e)) => {
                report.supported = true;
                report.error = Some(format!("label listing failed: {}", e));
                return report;
            }
        };

        let source: BTreeSet<String> = source.into_iter().collect();
        let target: BTreeSet<String> = target.into_iter().collect();
        report.supported = true;
        report.source_count = source.len();
        report.target_count = target.len();
        report.matching = source.intersection(&target).cloned().collect();
        report.missing = source.difference(&target).cloned().collect();
        report.extra = target.difference(&source).cloned().collect();
        report.passed = report.missing.is_empty();
        report
    }
}
