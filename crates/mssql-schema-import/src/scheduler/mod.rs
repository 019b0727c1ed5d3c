//! Execution scheduler.
//!
//! Units run strictly one at a time over a single connection, in phase order.
//! Failures that look like a missing dependency are deferred to a single
//! catch-up pass after the last phase.

mod clr;
mod provision;

pub use clr::StrictSecurityGuard;
pub use provision::FileGroupProvisioner;

use crate::catalog::{FailureClass, ObjectType, ScriptUnit, UnitStatus};
use crate::config::{ClrSettings, FileGroupSizing, FileGroupStrategy};
use crate::error::Result;
use crate::target::{BatchError, BatchExecutor};
use crate::transform::split_batches;
use serde::Serialize;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Attempts a unit gets in total: the main pass plus one catch-up.
pub const MAX_ATTEMPTS: u32 = 2;

/// Operator hint attached to assembly failures when CLR import is off.
pub const CLR_HINT: &str = "CLR assemblies are not imported by default; set clr.enableClr: true \
     (and clr.disableStrictSecurityForImport: true for unsigned assemblies) to import them";

/// How a scheduling run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Aborted,
    Cancelled,
}

/// Scheduler settings for one run.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub continue_on_error: bool,
    pub file_group_strategy: FileGroupStrategy,
    pub file_group_sizing: FileGroupSizing,
    pub clr: ClrSettings,
    /// Lower-cased memory-optimized filegroup names.
    pub memory_optimized: HashSet<String>,
}

/// Summary of a scheduling run. Per-unit results live on the units.
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub status: RunStatus,
    /// Unit and message that aborted the run under StopOnError.
    pub aborted_at: Option<(String, String)>,
    pub deferred: usize,
    pub recovered: usize,
}

enum Attempt {
    Applied,
    Failed(BatchError),
    Cancelled,
}

/// Runs units against one executor.
pub struct Scheduler<'a> {
    executor: &'a mut dyn BatchExecutor,
    options: SchedulerOptions,
    provisioner: FileGroupProvisioner,
    cancel: CancellationToken,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        executor: &'a mut dyn BatchExecutor,
        options: SchedulerOptions,
        cancel: CancellationToken,
    ) -> Self {
        let provisioner = FileGroupProvisioner::new(
            options.file_group_strategy,
            options.file_group_sizing,
            &options.memory_optimized,
        );
        Self {
            executor,
            options,
            provisioner,
            cancel,
        }
    }

    /// Apply every non-skipped unit.
    ///
    /// The strict-security guard spans the whole run and is released on
    /// every exit path, including abort and cancellation. Only a failure to
    /// acquire the guard is returned as an error.
    pub async fn run(&mut self, units: &mut [ScriptUnit]) -> Result<ScheduleOutcome> {
        let guard = StrictSecurityGuard::acquire(&mut *self.executor, &self.options.clr).await?;

        let outcome = self.run_passes(units).await;

        if let Err(e) = guard.release(&mut *self.executor).await {
            error!("Failed to restore CLR strict security: {}", e);
        }

        Ok(outcome)
    }

    async fn run_passes(&mut self, units: &mut [ScriptUnit]) -> ScheduleOutcome {
        let mut order: Vec<usize> = (0..units.len()).collect();
        order.sort_by(|&a, &b| units[a].order_key().cmp(&units[b].order_key()));

        let mut outcome = ScheduleOutcome {
            status: RunStatus::Completed,
            aborted_at: None,
            deferred: 0,
            recovered: 0,
        };
        let mut deferred = Vec::new();

        for &idx in &order {
            if units[idx].is_skipped() {
                continue;
            }
            if self.cancel.is_cancelled() {
                warn!("Import cancelled before {}", units[idx].relative_path);
                outcome.status = RunStatus::Cancelled;
                return outcome;
            }

            let unit = &mut units[idx];
            match self.attempt(unit).await {
                Attempt::Applied => {}
                Attempt::Cancelled => {
                    outcome.status = RunStatus::Cancelled;
                    return outcome;
                }
                Attempt::Failed(err) => {
                    let class = err.classify();
                    let clr_blocked =
                        unit.object_type == ObjectType::Assembly && !self.options.clr.enable_clr;

                    if class == FailureClass::Deferred
                        && !clr_blocked
                        && unit.attempt_count < MAX_ATTEMPTS
                    {
                        info!(
                            object = %unit.qualified_name(),
                            error = %err,
                            "Deferred to catch-up pass"
                        );
                        unit.mark_failed(UnitStatus::FailedDeferred, class, &err.to_string());
                        deferred.push(idx);
                        continue;
                    }

                    // Disabled CLR import never aborts the run.
                    if clr_blocked {
                        warn!(object = %unit.qualified_name(), error = %err, "Assembly not imported");
                        unit.hint = Some(CLR_HINT.to_string());
                        unit.mark_failed(
                            UnitStatus::FailedPermanent,
                            FailureClass::Fatal,
                            &err.to_string(),
                        );
                        continue;
                    }

                    if self.options.continue_on_error {
                        warn!(object = %unit.qualified_name(), error = %err, "Unit failed");
                        unit.mark_failed(UnitStatus::FailedPermanent, class, &err.to_string());
                    } else {
                        error!(object = %unit.qualified_name(), error = %err, "Unit failed, aborting");
                        unit.mark_failed(UnitStatus::FailedFatal, class, &err.to_string());
                        outcome.status = RunStatus::Aborted;
                        outcome.aborted_at = Some((unit.qualified_name(), err.to_string()));
                        return outcome;
                    }
                }
            }
        }

        outcome.deferred = deferred.len();
        if deferred.is_empty() {
            return outcome;
        }

        info!(count = deferred.len(), "Starting catch-up pass");
        for idx in deferred {
            if self.cancel.is_cancelled() {
                outcome.status = RunStatus::Cancelled;
                return outcome;
            }

            let unit = &mut units[idx];
            match self.attempt(unit).await {
                Attempt::Applied => outcome.recovered += 1,
                Attempt::Cancelled => {
                    outcome.status = RunStatus::Cancelled;
                    return outcome;
                }
                Attempt::Failed(err) => {
                    warn!(
                        object = %unit.qualified_name(),
                        error = %err,
                        "Unit still failing after catch-up"
                    );
                    unit.mark_failed(UnitStatus::FailedPermanent, err.classify(), &err.to_string());
                }
            }
        }
        info!(
            recovered = outcome.recovered,
            deferred = outcome.deferred,
            "Catch-up pass complete"
        );

        outcome
    }

    /// One attempt at a unit, resuming after its last completed batch.
    async fn attempt(&mut self, unit: &mut ScriptUnit) -> Attempt {
        unit.attempt_count += 1;

        let cancel = self.cancel.clone();
        let content = tokio::select! {
            _ = cancel.cancelled() => return Attempt::Cancelled,
            result = self.prepare(unit) => match result {
                Ok(content) => content,
                Err(e) => return Attempt::Failed(e),
            },
        };

        let batches = split_batches(&content);
        debug!(
            path = %unit.relative_path,
            batches = batches.len(),
            resume_at = unit.completed_batches,
            attempt = unit.attempt_count,
            "Executing unit"
        );

        for batch in batches.iter().skip(unit.completed_batches) {
            tokio::select! {
                _ = self.cancel.cancelled() => return Attempt::Cancelled,
                result = self.executor.execute_batch(batch) => match result {
                    Ok(()) => unit.completed_batches += 1,
                    Err(e) => return Attempt::Failed(e),
                },
            }
        }

        self.provisioner.record_applied(unit);
        unit.mark_applied();
        info!(object = %unit.qualified_name(), phase = unit.phase, "Applied");
        Attempt::Applied
    }

    /// Provision referenced filegroups and return the text to execute.
    async fn prepare(&mut self, unit: &ScriptUnit) -> std::result::Result<String, BatchError> {
        self.provisioner
            .ensure_referenced(&mut *self.executor, unit)
            .await?;
        self.provisioner.prepare(&mut *self.executor, unit).await
    }
}
