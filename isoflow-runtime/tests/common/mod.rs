#![allow(dead_code)]

use async_trait::async_trait;
use isoflow_core::{
    FlowCallback, FnCallback, ErrorCode, OpCode, ParameterMap, ResultMap, WorkerHandle,
    WorkerRunner, WorkerTarget,
};
use isoflow_sandbox::{service_fn, InprocRunner};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Wraps a runner and counts every call that reaches it.
pub struct CountingRunner<R> {
    inner: R,
    pub loads: AtomicUsize,
    pub runs: AtomicUsize,
    pub unloads: AtomicUsize,
}

impl<R> CountingRunner<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            loads: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            unloads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn unloads(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: WorkerRunner> WorkerRunner for CountingRunner<R> {
    async fn load(&self, task_name: &str, target: &WorkerTarget) -> anyhow::Result<WorkerHandle> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(task_name, target).await
    }

    async fn run(
        &self,
        handle: &WorkerHandle,
        op_code: OpCode,
        params: ParameterMap,
    ) -> anyhow::Result<ResultMap> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.run(handle, op_code, params).await
    }

    async fn unload(&self, handle: WorkerHandle) -> anyhow::Result<()> {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        self.inner.unload(handle).await
    }
}

pub fn ad_service() -> WorkerTarget {
    WorkerTarget::new("com.vendor.ads", "AdService")
}

pub fn slow_service() -> WorkerTarget {
    WorkerTarget::new("com.vendor.slow", "SlowService")
}

/// In-process vendor services used by the scenarios: a well-behaved ad
/// service and one that never answers.
pub fn vendor_runner() -> InprocRunner {
    InprocRunner::new()
        .with_service(
            ad_service(),
            service_fn(|op_code, _params| async move {
                let reply = match op_code {
                    OpCode::RENDER => serde_json::json!({"content": "<div>ad</div>"}),
                    OpCode::DOWNLOAD => serde_json::json!({"retained_keys": ["banner"]}),
                    OpCode::WEB_VIEW_EVENT => serde_json::json!({
                        "event": {"event_type": 1, "row_index": 0},
                    }),
                    _ => serde_json::json!({
                        "rendering_keys": ["banner"],
                        "request_log": [{"ad": 1}],
                    }),
                };
                ResultMap::new().with_record("result", &reply)
            }),
        )
        .with_service(
            slow_service(),
            service_fn(|_, _| async {
                std::future::pending::<()>().await;
                Ok(ResultMap::new())
            }),
        )
}

/// Records every outcome a callback receives.
pub struct Recorder<T> {
    pub successes: Mutex<Vec<T>>,
    pub failures: Mutex<Vec<ErrorCode>>,
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            successes: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Send + 'static> Recorder<T> {
    pub fn callback(self: &Arc<Self>) -> Box<dyn FlowCallback<T>> {
        let on_success = self.clone();
        let on_failure = self.clone();
        Box::new(FnCallback::new(
            move |payload: T| on_success.successes.lock().unwrap().push(payload),
            move |code: ErrorCode| on_failure.failures.lock().unwrap().push(code),
        ))
    }

    pub fn calls(&self) -> usize {
        self.successes.lock().unwrap().len() + self.failures.lock().unwrap().len()
    }

    pub fn failures(&self) -> Vec<ErrorCode> {
        self.failures.lock().unwrap().clone()
    }
}

pub async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}
