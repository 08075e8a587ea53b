//! Many localities in one invocation.
//!
//! Each locality runs on its own blocking worker with its own engine; a
//! semaphore bounds how many run at once.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{error, info, instrument};

use contourkit_engine::GeometryEngine;
use contourkit_shared::{AppConfig, ContourError, Result, SpatialReference};

use crate::context::{RunContext, RunRequest};
use crate::pipeline::{ProgressReporter, RunSummary, run_locality};

/// A batch file: one `[[run]]` table per locality.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchFile {
    #[serde(default, rename = "run")]
    pub runs: Vec<BatchEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub state: String,
    pub locality: String,
    pub target_srs: SpatialReference,
    /// Step to resume from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// How one locality of a batch ended.
#[derive(Debug)]
pub struct BatchOutcome {
    pub state: String,
    pub locality: String,
    pub result: Result<RunSummary>,
}

impl BatchOutcome {
    pub fn label(&self) -> String {
        format!("{}/{}", self.state, self.locality)
    }
}

/// Read a batch file and resolve every run up front.
pub fn load_batch(path: &Path, config: &AppConfig) -> Result<Vec<RunContext>> {
    let content = std::fs::read_to_string(path).map_err(|e| ContourError::io(path, e))?;
    parse_batch(&content, config).map_err(|e| match e {
        ContourError::Configuration { message } => {
            ContourError::configuration(format!("{}: {message}", path.display()))
        }
        other => other,
    })
}

/// Parse a batch document into run contexts.
///
/// Fails if the batch is empty, if a locality appears twice (names compare
/// case-insensitively), or if any entry names an unknown step.
pub fn parse_batch(content: &str, config: &AppConfig) -> Result<Vec<RunContext>> {
    let file: BatchFile = toml::from_str(content)
        .map_err(|e| ContourError::configuration(format!("invalid batch file: {e}")))?;
    if file.runs.is_empty() {
        return Err(ContourError::configuration("batch file lists no runs"));
    }

    let mut seen = HashSet::new();
    let mut contexts = Vec::with_capacity(file.runs.len());
    for entry in file.runs {
        let key = (
            entry.state.trim().to_lowercase(),
            entry.locality.trim().to_lowercase(),
        );
        if !seen.insert(key) {
            return Err(ContourError::configuration(format!(
                "{}/{} is listed more than once",
                entry.state.trim(),
                entry.locality.trim()
            )));
        }
        contexts.push(RunContext::new(
            RunRequest {
                state: entry.state,
                locality: entry.locality,
                target_srs: entry.target_srs,
                start_step: entry.step,
            },
            config,
        )?);
    }
    Ok(contexts)
}

/// Run every context, at most `jobs` at a time. Outcomes keep input order.
///
/// A failing locality does not stop the others.
#[instrument(skip_all, fields(runs = contexts.len(), jobs = jobs))]
pub async fn run_batch<E, F>(
    contexts: Vec<RunContext>,
    jobs: usize,
    connect: Arc<F>,
    progress: Arc<dyn ProgressReporter>,
) -> Vec<BatchOutcome>
where
    E: GeometryEngine + 'static,
    F: Fn(&RunContext) -> Result<E> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let mut handles = Vec::with_capacity(contexts.len());

    for ctx in contexts {
        let sem = semaphore.clone();
        let connect = connect.clone();
        let progress = progress.clone();
        let state = ctx.state.clone();
        let locality = ctx.locality.clone();

        let handle = tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| ContourError::engine("batch", e.to_string()))?;
            info!(state = %ctx.state, locality = %ctx.locality, "locality started");
            tokio::task::spawn_blocking(move || {
                run_locality(&ctx, &*connect, progress.as_ref())
            })
            .await
            .map_err(|e| ContourError::engine("batch", format!("worker failed: {e}")))?
        });
        handles.push((state, locality, handle));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (state, locality, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(ContourError::engine("batch", format!("task failed: {e}"))),
        };
        match &result {
            Ok(summary) => info!(
                %state,
                %locality,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "locality complete"
            ),
            Err(e) => error!(%state, %locality, error = %e, "locality failed"),
        }
        outcomes.push(BatchOutcome {
            state,
            locality,
            result,
        });
    }
    outcomes
}
