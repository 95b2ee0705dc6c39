//! The extension contract each request kind implements.

use crate::error::{ExecutionOutcome, FlowError};
use crate::kind::FlowKind;
use crate::value::{ParameterMap, ResultMap};
use crate::worker::WorkerTarget;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;

/// Detached metrics work started once the run result is known.
pub type MetricsUpload = BoxFuture<'static, anyhow::Result<()>>;

/// Raw result of the worker run as seen by the metrics side channel.
pub type RunResult = Result<ResultMap, FlowError>;

/// Lifecycle of one executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowState {
    Created,
    ReadinessChecked,
    WorkerLoading,
    Running,
    ResultExtracting,
    OutcomeDelivered,
    CleaningUp,
    Completed,
    Failed,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Completed | FlowState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::Created => "created",
            FlowState::ReadinessChecked => "readiness_checked",
            FlowState::WorkerLoading => "worker_loading",
            FlowState::Running => "running",
            FlowState::ResultExtracting => "result_extracting",
            FlowState::OutcomeDelivered => "outcome_delivered",
            FlowState::CleaningUp => "cleaning_up",
            FlowState::Completed => "completed",
            FlowState::Failed => "failed",
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything specific to one kind of request.
///
/// The executor owns worker lifecycle; implementors never load or unload
/// workers themselves. Each hook is called at most once per execution, in
/// pipeline order.
#[async_trait]
pub trait FlowDefinition: Send {
    type Output: Send + 'static;

    fn kind(&self) -> FlowKind;

    /// Validate preconditions. On `false` the definition has already
    /// delivered its own failure outcome.
    async fn is_ready(&mut self) -> bool;

    fn target_worker(&self) -> WorkerTarget;

    async fn build_parameters(&mut self) -> Result<ParameterMap, FlowError>;

    /// Side channel for latency/success stats. Must not block; any work goes
    /// into the returned future, which the executor detaches.
    fn upload_metrics(&self, run: &RunResult) -> Option<MetricsUpload>;

    async fn extract_result(&mut self, results: ResultMap) -> Result<Self::Output, FlowError>;

    /// Hand the outcome to the caller. Invoked exactly once per execution
    /// that passed the readiness check.
    fn deliver_outcome(&mut self, outcome: ExecutionOutcome<Self::Output>);

    /// Release non-worker resources acquired by the definition.
    async fn cleanup(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(FlowState::Completed.is_terminal());
        assert!(FlowState::Failed.is_terminal());
        assert!(!FlowState::CleaningUp.is_terminal());
        assert_eq!(FlowState::ResultExtracting.to_string(), "result_extracting");
    }
}
