// SPDX-License-Identifier: Apache-2.0

use crate::SandboxError;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use isoflow_core::{OpCode, ParameterMap, ResultMap, WorkerHandle, WorkerRunner, WorkerTarget};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Vendor logic hosted by the in-process runner.
#[async_trait]
pub trait VendorService: Send + Sync {
    async fn on_request(&self, op_code: OpCode, params: ParameterMap) -> Result<ResultMap>;
}

struct FnService<F> {
    f: F,
}

#[async_trait]
impl<F> VendorService for FnService<F>
where
    F: Fn(OpCode, ParameterMap) -> BoxFuture<'static, Result<ResultMap>> + Send + Sync,
{
    async fn on_request(&self, op_code: OpCode, params: ParameterMap) -> Result<ResultMap> {
        (self.f)(op_code, params).await
    }
}

/// Wrap an async closure as a [`VendorService`].
pub fn service_fn<F, Fut>(f: F) -> Arc<dyn VendorService>
where
    F: Fn(OpCode, ParameterMap) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResultMap>> + Send + 'static,
{
    Arc::new(FnService {
        f: move |op_code, params| -> BoxFuture<'static, Result<ResultMap>> {
            Box::pin(f(op_code, params))
        },
    })
}

/// Transport behind an in-process [`WorkerHandle`].
pub struct InprocInstance {
    id: u64,
    service: Arc<dyn VendorService>,
    alive: AtomicBool,
}

impl InprocInstance {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Runs vendor services as trait objects inside this process. Every load
/// creates a fresh instance; nothing is shared between handles.
#[derive(Default)]
pub struct InprocRunner {
    services: HashMap<WorkerTarget, Arc<dyn VendorService>>,
    live: Mutex<HashMap<u64, Arc<InprocInstance>>>,
    next_id: AtomicU64,
}

impl InprocRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, target: WorkerTarget, service: Arc<dyn VendorService>) -> Self {
        self.services.insert(target, service);
        self
    }

    pub fn live_instances(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or_default()
    }

    fn instance(&self, handle: &WorkerHandle) -> Result<Arc<InprocInstance>> {
        let instance = handle
            .transport::<InprocInstance>()
            .ok_or_else(|| SandboxError::ForeignHandle(handle.target().clone()))?;
        if !instance.is_alive() {
            return Err(SandboxError::InstanceGone(instance.id).into());
        }
        Ok(instance)
    }
}

#[async_trait]
impl WorkerRunner for InprocRunner {
    async fn load(&self, task_name: &str, target: &WorkerTarget) -> Result<WorkerHandle> {
        let service = self
            .services
            .get(target)
            .cloned()
            .ok_or_else(|| SandboxError::UnknownService(target.clone()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let instance = Arc::new(InprocInstance {
            id,
            service,
            alive: AtomicBool::new(true),
        });
        self.live
            .lock()
            .map_err(|_| anyhow::anyhow!("instance table poisoned"))?
            .insert(id, instance.clone());

        tracing::debug!(
            task = %task_name,
            target = %target,
            instance = id,
            "isolated service loaded"
        );
        Ok(WorkerHandle::new(target.clone(), task_name, id, instance))
    }

    async fn run(
        &self,
        handle: &WorkerHandle,
        op_code: OpCode,
        params: ParameterMap,
    ) -> Result<ResultMap> {
        let instance = self.instance(handle)?;
        instance.service.on_request(op_code, params).await
    }

    async fn unload(&self, handle: WorkerHandle) -> Result<()> {
        let instance = self.instance(&handle)?;
        instance.alive.store(false, Ordering::Release);
        self.live
            .lock()
            .map_err(|_| anyhow::anyhow!("instance table poisoned"))?
            .remove(&instance.id);
        tracing::debug!(
            target = %handle.target(),
            instance = instance.id,
            "isolated service unloaded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isoflow_core::Value;

    fn echo_runner() -> (InprocRunner, WorkerTarget) {
        let target = WorkerTarget::new("com.vendor.echo", "EchoService");
        let runner = InprocRunner::new().with_service(
            target.clone(),
            service_fn(|op_code, params| async move {
                let input: String = params.record("input")?;
                Ok(ResultMap::new().with("echo", Value::Text(format!("{op_code}:{input}"))))
            }),
        );
        (runner, target)
    }

    #[tokio::test]
    async fn test_load_run_unload() {
        let (runner, target) = echo_runner();
        let handle = runner.load("AppRequest", &target).await.unwrap();
        assert_eq!(runner.live_instances(), 1);

        let params = ParameterMap::builder()
            .record("input", &"ping")
            .unwrap()
            .build();
        let mut results = runner.run(&handle, OpCode::EXECUTE, params).await.unwrap();
        assert!(matches!(results.take("echo"), Some(Value::Text(text)) if text == "op:1:ping"));

        runner.unload(handle).await.unwrap();
        assert_eq!(runner.live_instances(), 0);
    }

    #[tokio::test]
    async fn test_unknown_service_fails_load() {
        let (runner, _) = echo_runner();
        let err = runner
            .load("Render", &WorkerTarget::new("com.missing", "Nope"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("com.missing/Nope"));
    }

    #[tokio::test]
    async fn test_each_load_gets_its_own_instance() {
        let (runner, target) = echo_runner();
        let first = runner.load("AppRequest", &target).await.unwrap();
        let second = runner.load("AppRequest", &target).await.unwrap();
        assert_ne!(first.instance_id(), second.instance_id());
        assert_eq!(runner.live_instances(), 2);

        runner.unload(first).await.unwrap();
        assert_eq!(runner.live_instances(), 1);
        runner.unload(second).await.unwrap();
    }

    #[tokio::test]
    async fn test_foreign_handle_is_rejected() {
        let (runner, target) = echo_runner();
        let handle = WorkerHandle::new(target, "AppRequest", 99, Arc::new(()));
        let err = runner
            .run(&handle, OpCode::EXECUTE, ParameterMap::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not created by this runner"));
    }
}
