use std::sync::Arc;

use tracing::{debug, error};

use crate::index::publish_key_block;
use crate::storage::CompositeFile;

#[derive(Debug)]
enum Step {
    AppendOffset { file: Arc<CompositeFile>, previous: u64 },
    KeyBlock { keys: Arc<CompositeFile>, previous: u64 },
}

/// Undo log of one commit call.
///
/// Every header a commit overwrites is recorded here after the write
/// succeeds. [`rollback`](Self::rollback) restores them newest first and
/// never fails: restore errors are logged so the caller still reports
/// the error that triggered the rollback.
#[derive(Debug, Default)]
pub struct RollbackHandle {
    label: String,
    steps: Vec<Step>,
}

impl RollbackHandle {
    /// `label` names the partition or table in rollback logs.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Recorded header writes.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Records that `file`'s append offset was `previous` before a write.
    pub(crate) fn record_append_offset(&mut self, file: &Arc<CompositeFile>, previous: u64) {
        self.steps.push(Step::AppendOffset {
            file: Arc::clone(file),
            previous,
        });
    }

    /// Records the key-block offset `keys` published before a write.
    pub(crate) fn record_key_block(&mut self, keys: &Arc<CompositeFile>, previous: u64) {
        self.steps.push(Step::KeyBlock {
            keys: Arc::clone(keys),
            previous,
        });
    }

    /// Restores every recorded header, newest first.
    pub fn rollback(self) {
        let total = self.steps.len();
        let mut failed = 0usize;
        for step in self.steps.into_iter().rev() {
            let outcome = match &step {
                Step::AppendOffset { file, previous } => file
                    .set_append_offset(*previous)
                    .map_err(|e| (file.path().display().to_string(), e.to_string())),
                Step::KeyBlock { keys, previous } => publish_key_block(keys, *previous)
                    .map(|_| ())
                    .map_err(|e| (keys.path().display().to_string(), e.to_string())),
            };
            if let Err((path, reason)) = outcome {
                failed += 1;
                error!(commit = %self.label, %path, %reason, "rollback step failed");
            }
        }
        debug!(commit = %self.label, total, failed, "rolled back commit");
    }
}
