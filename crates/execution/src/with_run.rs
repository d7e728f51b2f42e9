//! With-runs and the completion trigger that publishes their results.

use crate::publisher::Publisher;
use chrono::Utc;
use dashdeps_core::{
    DependencyError, DependencyValue, LeafData, ResolvedRuntimeDependencyValue, ResourceKind, Time,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Lifecycle of a with-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not started
    Initialized,
    /// Executing
    Running,
    /// Finished with a result
    Complete,
    /// Finished with an error
    Error,
}

impl RunStatus {
    /// Whether the run has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

#[derive(Debug)]
struct RunState {
    status: RunStatus,
    completed_at: Option<Time>,
}

/// Handle to a named sub-query owned by a publisher.
#[derive(Debug)]
pub struct WithRun {
    name: String,
    state: Mutex<RunState>,
}

impl WithRun {
    /// Create a run for `with.<name>`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(RunState {
                status: RunStatus::Initialized,
                completed_at: None,
            }),
        }
    }

    /// Short name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name the result is published under, e.g. `with.stuff1`.
    pub fn unqualified_name(&self) -> String {
        format!("{}.{}", ResourceKind::With, self.name)
    }

    /// Current status.
    pub fn status(&self) -> RunStatus {
        self.lock_state().status
    }

    /// When the run reached a terminal state.
    pub fn completed_at(&self) -> Option<Time> {
        self.lock_state().completed_at
    }

    /// Whether the run has finished.
    pub fn run_complete(&self) -> bool {
        self.status().is_terminal()
    }

    /// Mark the run as executing.
    pub fn set_running(&self) {
        self.lock_state().status = RunStatus::Running;
    }

    fn finish(&self, status: RunStatus) {
        let mut state = self.lock_state();
        state.status = status;
        state.completed_at = Some(Utc::now());
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Publisher {
    /// Completion trigger: publish the terminal outcome of an owned with-run.
    ///
    /// JSON-typed columns are re-encoded to text before publishing. The whole
    /// sequence runs under the subscription lock, which all sibling with-runs
    /// of this publisher share.
    pub fn set_with_value(&self, run: &WithRun, outcome: Result<LeafData, DependencyError>) {
        self.set_with_value_encoded(run, outcome, serde_json::to_string::<Value>);
    }

    pub(crate) fn set_with_value_encoded<F>(
        &self,
        run: &WithRun,
        outcome: Result<LeafData, DependencyError>,
        encode: F,
    ) where
        F: Fn(&Value) -> serde_json::Result<String>,
    {
        let mut table = self.lock_subscriptions();

        let result: ResolvedRuntimeDependencyValue = outcome.and_then(|mut data| {
            encode_json_columns(&mut data, encode)?;
            Ok(DependencyValue::from(data))
        });

        match &result {
            Ok(_) => run.finish(RunStatus::Complete),
            Err(e) => {
                debug!("With {} on {} finished with error: {}", run.name(), self.name(), e);
                run.finish(RunStatus::Error);
            }
        }

        self.publish_locked(&mut table, &run.unqualified_name(), result);
    }

    /// Whether every owned with-run has reached a terminal state.
    pub fn all_withs_complete(&self) -> bool {
        self.with_runs.values().all(|w| w.run_complete())
    }
}

/// Replace every value in a JSON-typed column with its JSON text.
pub fn canonicalize_json_columns(data: &mut LeafData) -> Result<(), DependencyError> {
    encode_json_columns(data, serde_json::to_string::<Value>)
}

fn encode_json_columns<F>(data: &mut LeafData, encode: F) -> Result<(), DependencyError>
where
    F: Fn(&Value) -> serde_json::Result<String>,
{
    for column in data.json_columns() {
        for row in data.rows.iter_mut() {
            let Some(value) = row.get_mut(&column) else {
                continue;
            };
            let text = encode(value).map_err(|e| {
                warn!("Failed to serialize value of column {}: {}", column, e);
                DependencyError::ValueSerialization {
                    column: column.clone(),
                    message: e.to_string(),
                }
            })?;
            *value = Value::String(text);
        }
    }
    Ok(())
}
