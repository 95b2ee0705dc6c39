//! # isoflow Context
//!
//! Trace state owned by a single flow execution: which stages ran, how long
//! each took and how it ended.

use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FlowTrace {
    pub trace_id: String,
    pub task_name: String,
    pub started_at: Instant,
    pub ok: bool,
    pub errors: Vec<String>,
    pub stage_logs: Vec<StageLog>,
}

#[derive(Debug, Clone)]
pub struct StageLog {
    pub stage: String,
    pub start_time: Instant,
    pub end_time: Option<Instant>,
    pub status: StageStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Running,
    Success,
    Failed,
    Skipped,
    Timeout,
}

impl StageLog {
    pub fn duration(&self) -> Option<Duration> {
        self.end_time.map(|end| end.duration_since(self.start_time))
    }
}

impl FlowTrace {
    pub fn new(task_name: impl Into<String>) -> Self {
        Self::new_with_trace_id(Uuid::new_v4().to_string(), task_name)
    }

    pub fn new_with_trace_id(
        trace_id: impl Into<String>,
        task_name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            task_name: task_name.into(),
            started_at: Instant::now(),
            ok: true,
            errors: Vec::new(),
            stage_logs: Vec::new(),
        }
    }

    pub fn start_stage(&mut self, stage: &str) {
        self.stage_logs.push(StageLog {
            stage: stage.to_string(),
            start_time: Instant::now(),
            end_time: None,
            status: StageStatus::Running,
            error_message: None,
        });

        tracing::debug!(
            trace_id = %self.trace_id,
            task = %self.task_name,
            stage = %stage,
            "stage starting"
        );
    }

    pub fn end_stage_success(&mut self, stage: &str) {
        if let Some(duration) = self.close_stage(stage, StageStatus::Success, None) {
            tracing::debug!(
                trace_id = %self.trace_id,
                task = %self.task_name,
                stage = %stage,
                duration_ms = duration.as_millis() as u64,
                "stage success"
            );
        }
    }

    pub fn end_stage_failed(&mut self, stage: &str, error: &str) {
        if let Some(duration) =
            self.close_stage(stage, StageStatus::Failed, Some(error.to_string()))
        {
            tracing::warn!(
                trace_id = %self.trace_id,
                task = %self.task_name,
                stage = %stage,
                duration_ms = duration.as_millis() as u64,
                error = %error,
                "stage failed"
            );
        }
        self.ok = false;
        self.errors.push(format!("{stage}: {error}"));
    }

    pub fn end_stage_timeout(&mut self, stage: &str) {
        if let Some(duration) = self.close_stage(stage, StageStatus::Timeout, None) {
            tracing::warn!(
                trace_id = %self.trace_id,
                task = %self.task_name,
                stage = %stage,
                duration_ms = duration.as_millis() as u64,
                "stage timeout"
            );
        }
        self.ok = false;
        self.errors.push(format!("{stage}: timeout"));
    }

    /// Records a stage that was never entered because an earlier one failed.
    pub fn skip_stage(&mut self, stage: &str, reason: &str) {
        let now = Instant::now();
        self.stage_logs.push(StageLog {
            stage: stage.to_string(),
            start_time: now,
            end_time: Some(now),
            status: StageStatus::Skipped,
            error_message: Some(reason.to_string()),
        });

        tracing::debug!(
            trace_id = %self.trace_id,
            task = %self.task_name,
            stage = %stage,
            reason = %reason,
            "stage skipped"
        );
    }

    pub fn stage(&self, stage: &str) -> Option<&StageLog> {
        self.stage_logs.iter().rev().find(|log| log.stage == stage)
    }

    pub fn count(&self, status: StageStatus) -> usize {
        self.stage_logs
            .iter()
            .filter(|log| log.status == status)
            .count()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn close_stage(
        &mut self,
        stage: &str,
        status: StageStatus,
        error: Option<String>,
    ) -> Option<Duration> {
        let log = self
            .stage_logs
            .iter_mut()
            .rev()
            .find(|log| log.stage == stage && log.status == StageStatus::Running)?;
        let end = Instant::now();
        log.end_time = Some(end);
        log.status = status;
        log.error_message = error;
        Some(end.duration_since(log.start_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_lifecycle() {
        let mut trace = FlowTrace::new_with_trace_id("trace-1", "Render");
        trace.start_stage("load");
        trace.end_stage_success("load");
        trace.start_stage("run");
        trace.end_stage_timeout("run");
        trace.skip_stage("extract", "run failed");

        assert_eq!(trace.trace_id, "trace-1");
        assert_eq!(trace.stage("load").map(|s| s.status), Some(StageStatus::Success));
        assert_eq!(trace.stage("run").map(|s| s.status), Some(StageStatus::Timeout));
        assert_eq!(trace.count(StageStatus::Skipped), 1);
        assert!(!trace.ok);
        assert_eq!(trace.errors, vec!["run: timeout".to_string()]);
    }

    #[test]
    fn test_end_unknown_stage_is_ignored() {
        let mut trace = FlowTrace::new("AppRequest");
        trace.end_stage_success("never-started");
        assert!(trace.stage_logs.is_empty());
        assert!(trace.ok);
    }

    #[test]
    fn test_failed_stage_records_error() {
        let mut trace = FlowTrace::new("WebTrigger");
        trace.start_stage("load");
        trace.end_stage_failed("load", "package not installed");

        let log = trace.stage("load").unwrap();
        assert_eq!(log.status, StageStatus::Failed);
        assert_eq!(log.error_message.as_deref(), Some("package not installed"));
        assert!(log.duration().is_some());
        assert_eq!(trace.errors.len(), 1);
    }
}
