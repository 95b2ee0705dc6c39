// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use async_trait::async_trait;
use isoflow_core::{OpCode, ParameterMap, ResultMap, WorkerHandle, WorkerRunner, WorkerTarget};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Default)]
struct Slots {
    gates: HashMap<WorkerTarget, Arc<Semaphore>>,
    held: HashMap<(WorkerTarget, u64), OwnedSemaphorePermit>,
}

/// Allows at most one live instance per target. A second `load` for the
/// same target waits until the first instance is unloaded.
///
/// Models sandboxes that share one isolated process per vendor package.
pub struct SerializedRunner<R> {
    inner: R,
    slots: Mutex<Slots>,
}

impl<R: WorkerRunner> SerializedRunner<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            slots: Mutex::new(Slots::default()),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Targets that currently have a live instance.
    pub fn busy_targets(&self) -> usize {
        self.lock().held.len()
    }

    fn gate(&self, target: &WorkerTarget) -> Arc<Semaphore> {
        self.lock()
            .gates
            .entry(target.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<R: WorkerRunner> WorkerRunner for SerializedRunner<R> {
    async fn load(&self, task_name: &str, target: &WorkerTarget) -> Result<WorkerHandle> {
        let gate = self.gate(target);
        let permit = gate
            .acquire_owned()
            .await
            .map_err(|e| anyhow::anyhow!("target gate closed: {e}"))?;
        tracing::trace!(target = %target, "target slot acquired");

        // a failed load drops the permit and frees the slot
        let handle = self.inner.load(task_name, target).await?;
        self.lock()
            .held
            .insert((target.clone(), handle.instance_id()), permit);
        Ok(handle)
    }

    async fn run(
        &self,
        handle: &WorkerHandle,
        op_code: OpCode,
        params: ParameterMap,
    ) -> Result<ResultMap> {
        self.inner.run(handle, op_code, params).await
    }

    async fn unload(&self, handle: WorkerHandle) -> Result<()> {
        let key = (handle.target().clone(), handle.instance_id());
        let result = self.inner.unload(handle).await;
        // free the slot even when the inner unload failed
        let permit = self.lock().held.remove(&key);
        drop(permit);
        result
    }
}
