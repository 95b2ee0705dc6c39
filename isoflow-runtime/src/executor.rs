//! Drives one flow definition through load, run, extract, deliver and
//! cleanup.

use crate::deadline::DeadlineScheduler;
use crate::stats::StatsRecorder;
use futures::FutureExt;
use isoflow_context::FlowTrace;
use isoflow_core::{
    ErrorCode, ExecutionOutcome, FlowDefinition, FlowError, FlowKind, FlowKindDescriptor,
    FlowKindTable, FlowState, RunResult, WorkerHandle, WorkerRunner,
};
use isoflow_logger::Logger;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const STAGE_READINESS: &str = "readiness";
const STAGE_LOAD: &str = "load";
const STAGE_PARAMETERS: &str = "build_parameters";
const STAGE_RUN: &str = "run";
const STAGE_EXTRACT: &str = "extract_result";
const STAGE_DELIVER: &str = "deliver_outcome";
const STAGE_CLEANUP: &str = "cleanup";

/// Shared, read-only dependencies of every executor.
#[derive(Clone)]
pub struct ExecutionEnv {
    pub(crate) runner: Arc<dyn WorkerRunner>,
    pub(crate) kinds: Arc<FlowKindTable>,
    pub(crate) deadlines: DeadlineScheduler,
    pub(crate) extraction_timeout: Duration,
    pub(crate) stats: Arc<StatsRecorder>,
}

impl ExecutionEnv {
    pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(runner: Arc<dyn WorkerRunner>, kinds: Arc<FlowKindTable>) -> Self {
        Self {
            runner,
            kinds,
            deadlines: DeadlineScheduler::new(),
            extraction_timeout: Self::DEFAULT_EXTRACTION_TIMEOUT,
            stats: Arc::new(StatsRecorder::default()),
        }
    }

    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn with_deadlines(mut self, deadlines: DeadlineScheduler) -> Self {
        self.deadlines = deadlines;
        self
    }

    pub fn kinds(&self) -> &FlowKindTable {
        &self.kinds
    }

    pub fn deadlines(&self) -> &DeadlineScheduler {
        &self.deadlines
    }

    pub fn stats(&self) -> crate::RuntimeStats {
        self.stats.snapshot()
    }
}

/// How an execution ended, from the orchestrator's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeSummary {
    /// Readiness check declined; the definition reported its own failure.
    Rejected,
    Success,
    Failure(ErrorCode),
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub flow_id: Uuid,
    pub kind: FlowKind,
    pub final_state: FlowState,
    pub outcome: OutcomeSummary,
    pub trace: FlowTrace,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.outcome == OutcomeSummary::Success
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self.outcome {
            OutcomeSummary::Failure(code) => Some(code),
            _ => None,
        }
    }
}

/// Exclusive owner of a loaded worker. Finalizing hands the worker back to
/// the runner exactly once, whichever path gets there first.
pub struct WorkerLease {
    flow_id: Uuid,
    runner: Arc<dyn WorkerRunner>,
    stats: Arc<StatsRecorder>,
    handle: Option<WorkerHandle>,
    finalized: AtomicBool,
}

impl WorkerLease {
    fn new(flow_id: Uuid, runner: Arc<dyn WorkerRunner>, stats: Arc<StatsRecorder>) -> Self {
        Self {
            flow_id,
            runner,
            stats,
            handle: None,
            finalized: AtomicBool::new(false),
        }
    }

    fn attach(&mut self, handle: WorkerHandle) {
        self.handle = Some(handle);
    }

    pub fn handle(&self) -> Option<&WorkerHandle> {
        self.handle.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    /// Schedule the unload if a worker was obtained. Returns `false` when
    /// another path already finalized this lease.
    pub fn finalize(&mut self) -> bool {
        if self
            .finalized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let Some(handle) = self.handle.take() else {
            return true;
        };

        let flow_id = self.flow_id;
        let runner = self.runner.clone();
        let stats = self.stats.clone();
        let target = handle.target().to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    match runner.unload(handle).await {
                        Ok(()) => {
                            tracing::debug!(
                                flow_id = %flow_id,
                                target = %target,
                                "worker unloaded"
                            );
                        }
                        Err(e) => {
                            stats.record_unload_failure();
                            let err = FlowError::Unload(e);
                            tracing::warn!(
                                flow_id = %flow_id,
                                target = %target,
                                error = %err,
                                "unload failed"
                            );
                        }
                    }
                });
            }
            Err(e) => {
                stats.record_unload_failure();
                tracing::error!(
                    flow_id = %flow_id,
                    target = %target,
                    error = %e,
                    "no runtime to unload worker"
                );
            }
        }
        true
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.finalize();
    }
}

enum Settled {
    NotReady,
    Delivered(Result<(), ErrorCode>),
}

/// Runs one [`FlowDefinition`]; consumed by [`FlowExecutor::run`].
pub struct FlowExecutor<D: FlowDefinition> {
    flow_id: Uuid,
    definition: D,
    env: ExecutionEnv,
    state: FlowState,
    trace: FlowTrace,
    logger: Logger,
    delivered: bool,
}

impl<D: FlowDefinition> FlowExecutor<D> {
    pub fn new(definition: D, env: ExecutionEnv) -> Self {
        Self::with_flow_id(Uuid::new_v4(), definition, env)
    }

    pub fn with_flow_id(flow_id: Uuid, definition: D, env: ExecutionEnv) -> Self {
        let kind = definition.kind();
        Self {
            flow_id,
            definition,
            trace: FlowTrace::new_with_trace_id(flow_id.to_string(), kind.task_name()),
            logger: Logger::with_trace_id(flow_id.to_string()),
            env,
            state: FlowState::Created,
            delivered: false,
        }
    }

    pub fn flow_id(&self) -> Uuid {
        self.flow_id
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub async fn run(mut self) -> ExecutionReport {
        let kind = self.definition.kind();
        let mut lease =
            WorkerLease::new(self.flow_id, self.env.runner.clone(), self.env.stats.clone());

        self.logger.info(&format!("{} flow started", kind.task_name()));

        let settled = AssertUnwindSafe(self.drive(&mut lease)).catch_unwind().await;

        let outcome = match settled {
            Ok(Settled::NotReady) => {
                // nothing acquired, nothing to clean up
                lease.finalize();
                self.env.stats.record_rejected();
                self.transition(FlowState::Completed);
                OutcomeSummary::Rejected
            }
            Ok(Settled::Delivered(result)) => {
                self.finish(&mut lease).await;
                match result {
                    Ok(()) => {
                        self.env.stats.record_success();
                        OutcomeSummary::Success
                    }
                    Err(code) => {
                        self.env.stats.record_failure(code);
                        OutcomeSummary::Failure(code)
                    }
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.logger.error(&format!("flow panicked in state {}: {message}", self.state));
                self.trace.errors.push(format!("{}: panicked: {message}", self.state));
                self.trace.ok = false;
                self.env.stats.record_panic();

                self.transition(FlowState::Failed);
                if !self.delivered {
                    self.delivered = true;
                    let definition = &mut self.definition;
                    let redelivered = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        definition.deliver_outcome(ExecutionOutcome::Failure(ErrorCode::Internal))
                    }));
                    if redelivered.is_err() {
                        self.logger.error("failure delivery panicked");
                    }
                }
                self.cleanup().await;
                lease.finalize();
                self.env.stats.record_failure(ErrorCode::Internal);
                OutcomeSummary::Failure(ErrorCode::Internal)
            }
        };

        self.env.stats.record_completed();
        Logger::log_trace_summary(&self.trace);
        if !self.trace.ok {
            Logger::log_stage_details(&self.trace);
        }

        ExecutionReport {
            flow_id: self.flow_id,
            kind,
            final_state: self.state,
            outcome,
            trace: self.trace,
        }
    }

    async fn drive(&mut self, lease: &mut WorkerLease) -> Settled {
        self.trace.start_stage(STAGE_READINESS);
        if !self.definition.is_ready().await {
            self.trace.end_stage_failed(STAGE_READINESS, "preconditions not met");
            // the definition has already reported to its caller
            self.delivered = true;
            return Settled::NotReady;
        }
        self.trace.end_stage_success(STAGE_READINESS);
        self.transition(FlowState::ReadinessChecked);

        let result = self.execute(lease).await;
        let summary = result.as_ref().map(|_| ()).map_err(FlowError::code);

        self.trace.start_stage(STAGE_DELIVER);
        self.delivered = true;
        self.definition.deliver_outcome(ExecutionOutcome::from(result));
        self.trace.end_stage_success(STAGE_DELIVER);
        self.transition(FlowState::OutcomeDelivered);

        Settled::Delivered(summary)
    }

    async fn execute(&mut self, lease: &mut WorkerLease) -> Result<D::Output, FlowError> {
        let descriptor = self.env.kinds.descriptor(self.definition.kind()).clone();

        let run = self.load_and_run(lease, &descriptor).await;
        self.upload_metrics(&run);
        let results = run?;

        self.transition(FlowState::ResultExtracting);
        self.trace.start_stage(STAGE_EXTRACT);
        let extraction_timeout = self.env.extraction_timeout;
        let extracted = match tokio::time::timeout(
            extraction_timeout,
            self.definition.extract_result(results),
        )
        .await
        {
            Ok(extracted) => extracted,
            Err(_) => Err(FlowError::Timeout {
                deadline: extraction_timeout,
            }),
        };
        match &extracted {
            Ok(_) => self.trace.end_stage_success(STAGE_EXTRACT),
            Err(err) if err.is_timeout() => self.trace.end_stage_timeout(STAGE_EXTRACT),
            Err(err) => self.trace.end_stage_failed(STAGE_EXTRACT, &err.to_string()),
        }
        extracted
    }

    /// Load the worker, build parameters and run the operation under its
    /// deadline. Every failure on the way is a failed run result.
    async fn load_and_run(
        &mut self,
        lease: &mut WorkerLease,
        descriptor: &FlowKindDescriptor,
    ) -> RunResult {
        let runner = self.env.runner.clone();

        self.transition(FlowState::WorkerLoading);
        let target = self.definition.target_worker();
        self.trace.start_stage(STAGE_LOAD);
        let handle = match runner.load(descriptor.task_name, &target).await {
            Ok(handle) => handle,
            Err(cause) => {
                let err = FlowError::Load {
                    target: target.to_string(),
                    cause,
                };
                self.trace.end_stage_failed(STAGE_LOAD, &err.to_string());
                self.skip_after(STAGE_LOAD);
                return Err(err);
            }
        };
        self.logger.debug(&format!(
            "worker {target} loaded as instance {}",
            handle.instance_id()
        ));
        lease.attach(handle);
        self.trace.end_stage_success(STAGE_LOAD);

        self.transition(FlowState::Running);
        self.trace.start_stage(STAGE_PARAMETERS);
        let params = match self.definition.build_parameters().await {
            Ok(params) => params,
            Err(err) => {
                self.trace.end_stage_failed(STAGE_PARAMETERS, &err.to_string());
                self.skip_after(STAGE_PARAMETERS);
                return Err(err);
            }
        };
        self.trace.end_stage_success(STAGE_PARAMETERS);

        let handle = lease
            .handle()
            .ok_or_else(|| FlowError::Internal("worker lease lost its handle".to_string()))?;

        self.trace.start_stage(STAGE_RUN);
        let run: RunResult = match self
            .env
            .deadlines
            .run_with_deadline(
                descriptor.deadline,
                runner.run(handle, descriptor.op_code, params),
            )
            .await
        {
            Ok(Ok(results)) => Ok(results),
            Ok(Err(e)) => Err(FlowError::Run(e)),
            Err(timeout) => Err(timeout),
        };
        match &run {
            Ok(_) => self.trace.end_stage_success(STAGE_RUN),
            Err(err) if err.is_timeout() => self.trace.end_stage_timeout(STAGE_RUN),
            Err(err) => self.trace.end_stage_failed(STAGE_RUN, &err.to_string()),
        }
        if run.is_err() {
            self.skip_after(STAGE_RUN);
        }
        run
    }

    /// Start the definition's metrics upload, detached. A panicking hook is
    /// logged and counted; it never reaches the outcome.
    fn upload_metrics(&self, run: &RunResult) {
        let definition = &self.definition;
        let upload = match std::panic::catch_unwind(AssertUnwindSafe(|| {
            definition.upload_metrics(run)
        })) {
            Ok(upload) => upload,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.logger.warn(&format!("metrics hook panicked: {message}"));
                self.env.stats.record_panic();
                None
            }
        };

        if let Some(upload) = upload {
            let flow_id = self.flow_id;
            tokio::spawn(async move {
                if let Err(e) = upload.await {
                    tracing::warn!(flow_id = %flow_id, error = %e, "metrics upload failed");
                }
            });
        }
    }

    async fn finish(&mut self, lease: &mut WorkerLease) {
        self.transition(FlowState::CleaningUp);
        self.cleanup().await;
        lease.finalize();
        self.transition(FlowState::Completed);
    }

    async fn cleanup(&mut self) {
        self.trace.start_stage(STAGE_CLEANUP);
        let cleaned = AssertUnwindSafe(self.definition.cleanup())
            .catch_unwind()
            .await;
        match cleaned {
            Ok(()) => self.trace.end_stage_success(STAGE_CLEANUP),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.trace.end_stage_failed(STAGE_CLEANUP, &message);
            }
        }
    }

    fn skip_after(&mut self, failed: &str) {
        let stages = [STAGE_LOAD, STAGE_PARAMETERS, STAGE_RUN, STAGE_EXTRACT];
        let reason = format!("{failed} failed");
        if let Some(pos) = stages.iter().position(|stage| *stage == failed) {
            for stage in &stages[pos + 1..] {
                self.trace.skip_stage(stage, &reason);
            }
        }
    }

    fn transition(&mut self, next: FlowState) {
        if self.state.is_terminal() {
            return;
        }
        tracing::trace!(
            flow_id = %self.flow_id,
            from = %self.state,
            to = %next,
            "state transition"
        );
        self.state = next;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
