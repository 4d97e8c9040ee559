//! Revision classification
//!
//! Branch topology cannot be reliably inferred from per-revision operation
//! lists (converting a folder into a branch happens out of band), so the
//! classifier relies on two operator-curated id sets. Anything in neither
//! set is [`RevisionClass::Regular`].

use crate::config::MigrationConfig;
use crate::error::Result;
use crate::types::{RevisionClass, RevisionId};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

/// Labels revision ids using operator-supplied sets
#[derive(Debug, Clone, Default)]
pub struct RevisionClassifier {
    trunk_creating: BTreeSet<RevisionId>,
    branch_creating: BTreeSet<RevisionId>,
}

impl RevisionClassifier {
    /// Create a classifier from the two curated sets
    ///
    /// An id present in both sets is classified as trunk-creating;
    /// [`MigrationConfig::validate`] rejects such configurations up front.
    pub fn new(
        trunk_creating: impl IntoIterator<Item = RevisionId>,
        branch_creating: impl IntoIterator<Item = RevisionId>,
    ) -> Self {
        Self {
            trunk_creating: trunk_creating.into_iter().collect(),
            branch_creating: branch_creating.into_iter().collect(),
        }
    }

    /// Create a classifier from a migration configuration
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self::new(
            config.trunk_creating.iter().copied(),
            config.branch_creating.iter().copied(),
        )
    }

    /// Classify a single revision
    pub fn classify(&self, id: RevisionId) -> RevisionClass {
        if self.trunk_creating.contains(&id) {
            RevisionClass::TrunkCreating
        } else if self.branch_creating.contains(&id) {
            RevisionClass::BranchCreating
        } else {
            RevisionClass::Regular
        }
    }

    /// Classify an ordered queue
    pub fn plan(&self, ids: &[RevisionId]) -> RevisionPlan {
        let entries = ids
            .iter()
            .map(|&revision| PlanEntry {
                revision,
                class: self.classify(revision),
            })
            .collect();
        RevisionPlan { entries }
    }
}

/// One classified queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Revision id
    pub revision: RevisionId,
    /// Its classification
    pub class: RevisionClass,
}

/// Ordered, classified revision queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionPlan {
    /// Entries in replay order
    pub entries: Vec<PlanEntry>,
}

impl RevisionPlan {
    /// Number of entries of a class
    pub fn count(&self, class: RevisionClass) -> usize {
        self.entries.iter().filter(|e| e.class == class).count()
    }

    /// Ids that will stop the executor
    pub fn halting_revisions(&self) -> Vec<RevisionId> {
        self.entries
            .iter()
            .filter(|e| e.class.requires_operator())
            .map(|e| e.revision)
            .collect()
    }

    /// Write the plan as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        utils::atomic_write(path, json.as_bytes())?;
        info!("Saved plan of {} revisions to {:?}", self.entries.len(), path);
        Ok(())
    }
}
