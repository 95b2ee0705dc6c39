//! Worker Runner contract: the narrow seam to the sandbox technology.

use crate::kind::OpCode;
use crate::value::{ParameterMap, ResultMap};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Component identity of the vendor service to load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerTarget {
    pub package: String,
    pub class: String,
}

impl WorkerTarget {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.package.trim().is_empty() || self.class.trim().is_empty()
    }
}

impl fmt::Display for WorkerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

/// A loaded sandbox instance. Owned by exactly one execution and moved into
/// [`WorkerRunner::unload`] when that execution ends.
pub struct WorkerHandle {
    target: WorkerTarget,
    task_name: String,
    instance_id: u64,
    created_at: Instant,
    transport: Arc<dyn Any + Send + Sync>,
}

impl WorkerHandle {
    pub fn new<T: Any + Send + Sync>(
        target: WorkerTarget,
        task_name: impl Into<String>,
        instance_id: u64,
        transport: Arc<T>,
    ) -> Self {
        Self {
            target,
            task_name: task_name.into(),
            instance_id,
            created_at: Instant::now(),
            transport,
        }
    }

    pub fn target(&self) -> &WorkerTarget {
        &self.target
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Runner-specific transport, recovered by the runner that created it.
    pub fn transport<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.transport.clone().downcast::<T>().ok()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("target", &self.target)
            .field("task_name", &self.task_name)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

/// Acquires, drives and releases sandboxed workers.
///
/// Implementations must tolerate concurrent calls for distinct handles. Any
/// one-at-a-time policy per target is the runner's business, not the
/// orchestrator's.
#[async_trait]
pub trait WorkerRunner: Send + Sync {
    async fn load(&self, task_name: &str, target: &WorkerTarget) -> Result<WorkerHandle>;

    async fn run(
        &self,
        handle: &WorkerHandle,
        op_code: OpCode,
        params: ParameterMap,
    ) -> Result<ResultMap>;

    async fn unload(&self, handle: WorkerHandle) -> Result<()>;
}
