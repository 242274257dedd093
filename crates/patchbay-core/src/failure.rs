//! Callback failure reporting
//!
//! A failing patch is logged and remembered here; it is never surfaced to
//! the caller of the patched method.

use crate::patch::{PatchId, PatchKind};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One contained patch callback failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackFailure {
    pub patch_id: PatchId,
    pub kind: PatchKind,
    /// `Object.method` of the patched target
    pub target: String,
    pub message: String,
}

/// Bounded history of recent failures, oldest dropped first
#[derive(Debug)]
pub(crate) struct FailureLog {
    capacity: usize,
    entries: Mutex<VecDeque<CallbackFailure>>,
}

impl FailureLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
        }
    }

    pub(crate) fn record(
        &self,
        patch_id: &PatchId,
        kind: PatchKind,
        target: &str,
        error: &anyhow::Error,
    ) {
        tracing::error!(
            patch = %patch_id,
            kind = %kind,
            target_label = target,
            "failed to run patch: {error:#}"
        );
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(CallbackFailure {
            patch_id: patch_id.clone(),
            kind,
            target: target.to_string(),
            message: format!("{error:#}"),
        });
    }

    pub(crate) fn snapshot(&self) -> Vec<CallbackFailure> {
        self.entries.lock().iter().cloned().collect()
    }

    pub(crate) fn take(&self) -> Vec<CallbackFailure> {
        self.entries.lock().drain(..).collect()
    }
}
