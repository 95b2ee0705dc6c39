//! # Isoflow Core
//!
//! Data model and extension contracts for the isolated-worker orchestrator:
//! flow kinds, parameter/result maps, the error taxonomy, and the
//! `WorkerRunner`, `FlowDefinition` and `FlowCallback` traits.

#![cfg_attr(docsrs, feature(doc_cfg))]

mod callback;
mod definition;
mod error;
mod kind;
mod value;
mod worker;


pub use callback::{channel, CallbackSlot, ChannelCallback, FlowCallback, FnCallback};
pub use definition::{FlowDefinition, FlowState, MetricsUpload, RunResult};
pub use error::{ErrorCode, ExecutionOutcome, FlowError, ReadinessReason};
pub use kind::{FlowKind, FlowKindDescriptor, FlowKindTable, OpCode, Priority};
pub use value::{ParameterMap, ParameterMapBuilder, ResultMap, ServiceHandle, Value};
pub use worker::{WorkerHandle, WorkerRunner, WorkerTarget};

/// Prelude module for core functionality
pub mod prelude {
    pub use crate::{
        CallbackSlot, ErrorCode, ExecutionOutcome, FlowCallback, FlowDefinition, FlowError,
        FlowKind, FlowKindTable, FlowState, OpCode, ParameterMap, ReadinessReason, ResultMap,
        Value, WorkerHandle, WorkerRunner, WorkerTarget,
    };
}
