//! End-to-end run of one locality: lock → log → engine session → steps.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{error, info, info_span, instrument, warn};

use contourkit_engine::{EngineSession, GeometryEngine};
use contourkit_shared::{ContourError, Result};
use contourkit_storage::{RunLock, RunLog, format_elapsed};

use crate::cleanup::{Artifact, purge};
use crate::context::{CrsParams, RunContext};
use crate::steps::{Outcome, StepAction, StepContext, StepInfo, StepRegistry};

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Tallies of what the steps did, logged at the end and stored in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportCounters {
    pub short_features_deleted: u64,
    pub fields_added: u64,
    pub contour_fields_dropped: u64,
    pub tiles_split: u64,
    pub singlepart_conversions: u64,
    pub parent_id_fields_dropped: u64,
    pub lengths_recalculated: u64,
    pub shapefiles_1ft: u64,
    pub shapefiles_2ft: u64,
    pub drawings_1ft: u64,
    pub drawings_2ft: u64,
    pub sidecars_removed: u64,
    pub empty_tiles_removed: u64,
    pub index_fields_dropped: u64,
}

impl ExportCounters {
    pub fn to_map(&self) -> BTreeMap<String, u64> {
        [
            ("short_features_deleted", self.short_features_deleted),
            ("fields_added", self.fields_added),
            ("contour_fields_dropped", self.contour_fields_dropped),
            ("tiles_split", self.tiles_split),
            ("singlepart_conversions", self.singlepart_conversions),
            ("parent_id_fields_dropped", self.parent_id_fields_dropped),
            ("lengths_recalculated", self.lengths_recalculated),
            ("shapefiles_1ft", self.shapefiles_1ft),
            ("shapefiles_2ft", self.shapefiles_2ft),
            ("drawings_1ft", self.drawings_1ft),
            ("drawings_2ft", self.drawings_2ft),
            ("sidecars_removed", self.sidecars_removed),
            ("empty_tiles_removed", self.empty_tiles_removed),
            ("index_fields_dropped", self.index_fields_dropped),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Run log lines, one per counter.
    pub fn log_lines(&self) -> Vec<String> {
        self.to_map()
            .into_iter()
            .map(|(name, value)| format!("Total {}: {value}", name.replace('_', " ")))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub state: String,
    pub locality: String,
    pub start_step: &'static str,
    /// Steps whose body ran (including those that decided to skip themselves).
    pub executed: Vec<&'static str>,
    /// Steps before the start step.
    pub skipped: Vec<&'static str>,
    /// `None` only if the run never reached the parameter boundary.
    pub params: Option<CrsParams>,
    pub counters: ExportCounters,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// A free-form status line.
    fn message(&self, message: &str);
    /// Called when a step's body is about to run.
    fn step_started(&self, step: &StepInfo);
    /// Called for a step that does not run (resume or configuration).
    fn step_skipped(&self, step: &StepInfo, reason: &str);
    /// Called when a step's body returns successfully.
    fn step_completed(&self, step: &StepInfo, elapsed: Duration);
    /// Called when the pipeline completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn message(&self, _message: &str) {}
    fn step_started(&self, _step: &StepInfo) {}
    fn step_skipped(&self, _step: &StepInfo, _reason: &str) {}
    fn step_completed(&self, _step: &StepInfo, _elapsed: Duration) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Mirrors every event into the run log, then forwards it.
pub struct RunLogProgress<'a> {
    log: &'a RunLog,
    inner: &'a dyn ProgressReporter,
}

impl<'a> RunLogProgress<'a> {
    pub fn new(log: &'a RunLog, inner: &'a dyn ProgressReporter) -> Self {
        Self { log, inner }
    }

    fn write(&self, line: &str) {
        if let Err(e) = self.log.append(line) {
            warn!(error = %e, "failed to write run log");
        }
    }
}

impl ProgressReporter for RunLogProgress<'_> {
    fn message(&self, message: &str) {
        self.write(message);
        self.inner.message(message);
    }

    fn step_started(&self, step: &StepInfo) {
        self.write(&format!("Entering step {step}"));
        self.inner.step_started(step);
    }

    fn step_skipped(&self, step: &StepInfo, reason: &str) {
        self.write(&format!("Skipping step {step}: {reason}"));
        self.inner.step_skipped(step, reason);
    }

    fn step_completed(&self, step: &StepInfo, elapsed: Duration) {
        self.write(&format!(
            "Step {step} completed in {}",
            format_elapsed(elapsed)
        ));
        self.inner.step_completed(step, elapsed);
    }

    fn done(&self, summary: &RunSummary) {
        for line in summary.counters.log_lines() {
            self.write(&line);
        }
        self.inner.done(summary);
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Run one locality end to end with an exclusive lock and a fresh run log.
///
/// `connect` creates the engine only after the lock is held. The run log
/// always ends with the end time and the total processing time, whether
/// the run succeeded or not.
pub fn run_locality<E, F>(
    ctx: &RunContext,
    connect: F,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary>
where
    E: GeometryEngine,
    F: FnOnce(&RunContext) -> Result<E>,
{
    let lock = RunLock::acquire(ctx.layout.base_dir())?;
    let log = RunLog::create(&ctx.layout.run_log())?;
    let reporter = RunLogProgress::new(&log, progress);

    let started = Instant::now();
    reporter.message(&format!(
        "Start time: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    for (key, value) in ctx.describe() {
        reporter.message(&format!("{key}: {value}"));
    }

    let result = connect(ctx).and_then(|mut engine| run_pipeline(ctx, &mut engine, &reporter));

    if let Err(e) = &result {
        reporter.message(&format!("An error occurred: {e}"));
    }
    reporter.message(&format!(
        "End time: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    reporter.message(&format!(
        "Total processing time: {}",
        format_elapsed(started.elapsed())
    ));

    drop(lock);
    result
}

/// Remove a locality's run lock, e.g. one left by a killed run on a
/// platform where the owner cannot be checked. Returns whether one existed.
pub fn break_lock(ctx: &RunContext) -> Result<bool> {
    let removed = RunLock::break_lock(ctx.layout.base_dir())?;
    if removed {
        warn!(state = %ctx.state, locality = %ctx.locality, "run lock broken on request");
    }
    Ok(removed)
}

/// Execute the catalog from `ctx.start_index` against an open engine.
///
/// 1. Open the engine session (extensions, overwrite output)
/// 2. Recover coordinate parameters when resuming past the boundary
/// 3. Remove everything owned by the steps about to run
/// 4. Run each step, removing its own outputs first
#[instrument(skip_all, fields(state = %ctx.state, locality = %ctx.locality))]
pub fn run_pipeline(
    ctx: &RunContext,
    engine: &mut dyn GeometryEngine,
    progress: &dyn ProgressReporter,
) -> Result<RunSummary> {
    let started = Instant::now();
    let registry = StepRegistry::catalog();
    let boundary = registry.boundary_index();

    let mut session = EngineSession::open(engine, &ctx.config.engine.extensions)?;
    info!(
        engine = session.name(),
        start = ctx.start_step(),
        "engine session open"
    );

    // --- Parameters when resuming past the boundary ---
    let mut params = if ctx.start_index > boundary {
        Some(recover_params(ctx, &mut *session, registry)?)
    } else {
        None
    };

    // --- Pre-run cleanup ---
    for step in &registry.steps()[ctx.start_index..] {
        for artifact in (step.owns)(&ctx.layout) {
            purge(&mut *session, &ctx.layout, &artifact)?;
        }
    }

    let mut counters = ExportCounters::default();
    let mut executed = Vec::new();
    let mut skipped = Vec::new();

    for (index, step) in registry.steps().iter().enumerate() {
        let step_info = registry.info(index);

        if !StepRegistry::should_run(index, ctx.start_index) {
            progress.step_skipped(&step_info, &format!("resuming at {}", ctx.start_step()));
            skipped.push(step.name);
            continue;
        }

        let _span = info_span!("step", name = step.name, ordinal = step_info.ordinal).entered();
        progress.step_started(&step_info);
        let step_started = Instant::now();

        // --- Pre-step cleanup ---
        for artifact in (step.owns)(&ctx.layout) {
            purge(&mut *session, &ctx.layout, &artifact)?;
        }

        let outcome = match step.action {
            StepAction::PreCrs(body) => {
                let mut cx = StepContext {
                    run: ctx,
                    engine: &mut *session,
                    counters: &mut counters,
                    progress,
                };
                body(&mut cx)
            }
            StepAction::DeriveParameters => derive_params(ctx, &mut *session).map(|derived| {
                progress.message(&format!("Derived parameters: {derived}"));
                params = Some(derived);
                Outcome::Completed
            }),
            StepAction::PostCrs(body) => {
                let crs = params.as_ref().ok_or_else(|| {
                    ContourError::configuration(format!(
                        "step `{}` needs coordinate parameters that were never derived",
                        step.name
                    ))
                })?;
                let mut cx = StepContext {
                    run: ctx,
                    engine: &mut *session,
                    counters: &mut counters,
                    progress,
                };
                body(&mut cx, crs)
            }
        };

        match outcome {
            Ok(Outcome::Completed) => {
                progress.step_completed(&step_info, step_started.elapsed());
            }
            Ok(Outcome::Skipped(reason)) => {
                progress.step_skipped(&step_info, &reason);
            }
            Err(e) => {
                error!(step = step.name, error = %e, "step failed");
                return Err(e);
            }
        }
        executed.push(step.name);
    }

    drop(session);

    let summary = RunSummary {
        state: ctx.state.clone(),
        locality: ctx.locality.clone(),
        start_step: ctx.start_step(),
        executed,
        skipped,
        params,
        counters,
        elapsed: started.elapsed(),
    };
    progress.done(&summary);

    info!(
        executed = summary.executed.len(),
        skipped = summary.skipped.len(),
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "pipeline complete"
    );
    Ok(summary)
}

fn derive_params(ctx: &RunContext, engine: &mut dyn GeometryEngine) -> Result<CrsParams> {
    let coordinate_system = engine.mosaic_crs(&ctx.layout.mosaic())?;
    Ok(CrsParams::derive(
        coordinate_system,
        ctx.config.contours.min_length_ft,
    ))
}

/// Re-read the mosaic's CRS for a run that starts after the boundary step.
fn recover_params(
    ctx: &RunContext,
    engine: &mut dyn GeometryEngine,
    registry: &StepRegistry,
) -> Result<CrsParams> {
    let mosaic = ctx.layout.mosaic();
    if !engine.exists(&mosaic)? {
        let owner = Artifact::Dataset(mosaic.clone());
        let earliest = registry
            .steps()
            .iter()
            .find(|s| (s.owns)(&ctx.layout).contains(&owner))
            .map_or("create-mosaic", |s| s.name);
        return Err(ContourError::configuration(format!(
            "cannot resume at `{}`: mosaic {mosaic} does not exist; resume from `{earliest}` or earlier",
            ctx.start_step()
        )));
    }
    let params = derive_params(ctx, engine)?;
    info!(%params, "recovered coordinate parameters from the existing mosaic");
    Ok(params)
}
