mod common;

use common::*;
use isoflow_config::{ConfigLoader, OrchestratorConfig};
use isoflow_core::{
    channel, ErrorCode, ExecutionOutcome, FlowKind, FlowKindTable, FlowState, ReadinessReason,
};
use isoflow_runtime::flows::{
    AppRequestArgs, DownloadArgs, DownloadCompleted, RenderArgs, WebTriggerArgs, WebViewArgs,
};
use isoflow_runtime::{
    BackgroundPool, DispatchError, FlowArgs, FlowDispatcher, FlowServices, SlotToken,
    StaticManifest,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn dispatcher_with(
    runner: Arc<CountingRunner<isoflow_sandbox::InprocRunner>>,
    config: &OrchestratorConfig,
) -> FlowDispatcher {
    let manifests = StaticManifest::new()
        .declare(&ad_service())
        .declare(&slow_service())
        .with("com.vendor.uninstalled", "GhostService");
    let services = FlowServices::builder(runner)
        .manifests(Arc::new(manifests))
        .build();
    let pool = BackgroundPool::current(config.runtime.max_concurrent_flows).unwrap();
    FlowDispatcher::from_config(services, config, pool)
}

fn render_token(dispatcher: &FlowDispatcher, package: &str) -> String {
    dispatcher
        .services()
        .tokens
        .encode(&SlotToken {
            query_id: Some(1),
            service_package: package.to_string(),
            slot_index: 0,
            rendering_keys: vec!["banner".into()],
        })
        .unwrap()
}

fn app_request(service: isoflow_core::WorkerTarget) -> AppRequestArgs {
    AppRequestArgs {
        calling_package: "com.example.app".into(),
        service,
        app_params: Some(serde_json::json!({})),
    }
}

#[tokio::test]
async fn render_success_unloads_once() {
    let runner = Arc::new(CountingRunner::new(vendor_runner()));
    let dispatcher = dispatcher_with(runner.clone(), &OrchestratorConfig::default());
    let (callback, receiver) = channel();
    let args = RenderArgs {
        slot_token: render_token(&dispatcher, "com.vendor.ads"),
        width: 100,
        height: 50,
        display_id: 0,
    };

    let ticket = dispatcher
        .schedule(FlowKind::Render, FlowArgs::render(args, callback))
        .unwrap();

    let outcome = receiver.await.unwrap();
    let ExecutionOutcome::Success(surface) = outcome else {
        panic!("expected rendered surface, got {outcome:?}");
    };
    assert_eq!(surface.html, "<div>ad</div>");
    assert_eq!((surface.width, surface.height), (100, 50));

    let report = ticket.report().await.unwrap();
    assert_eq!(report.final_state, FlowState::Completed);
    wait_until(|| runner.unloads() == 1).await;
    assert_eq!(runner.loads(), 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_worker_times_out_within_deadline() {
    let runner = Arc::new(CountingRunner::new(vendor_runner()));
    let mut config = OrchestratorConfig::default();
    config.deadlines.overrides.insert(FlowKind::Render, 2);
    let dispatcher = dispatcher_with(runner.clone(), &config);
    let (callback, receiver) = channel();
    let args = RenderArgs {
        slot_token: render_token(&dispatcher, "com.vendor.slow"),
        width: 100,
        height: 50,
        display_id: 0,
    };

    let started = Instant::now();
    dispatcher
        .schedule(FlowKind::Render, FlowArgs::render(args, callback))
        .unwrap();

    assert_eq!(
        receiver.await.unwrap(),
        ExecutionOutcome::Failure(ErrorCode::Timeout)
    );
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(2), "timed out early: {waited:?}");
    assert!(waited < Duration::from_millis(2500), "timed out late: {waited:?}");

    wait_until(|| runner.unloads() == 1).await;
    assert_eq!(dispatcher.stats().timeouts, 1);
}

#[tokio::test]
async fn readiness_failure_never_loads() {
    let runner = Arc::new(CountingRunner::new(vendor_runner()));
    let mut config = OrchestratorConfig::default();
    config.flags.global_kill_switch = true;
    let dispatcher = dispatcher_with(runner.clone(), &config);
    let (callback, receiver) = channel();

    let ticket = dispatcher
        .schedule(
            FlowKind::AppRequest,
            FlowArgs::app_request(app_request(ad_service()), callback),
        )
        .unwrap();

    assert_eq!(
        receiver.await.unwrap(),
        ExecutionOutcome::Failure(ErrorCode::Readiness(ReadinessReason::KillSwitch))
    );
    ticket.report().await.unwrap();
    assert_eq!(runner.loads(), 0);
    assert_eq!(runner.unloads(), 0);
    assert_eq!(dispatcher.stats().rejected, 1);
}

#[tokio::test]
async fn load_failure_skips_unload() {
    let runner = Arc::new(CountingRunner::new(vendor_runner()));
    let dispatcher = dispatcher_with(runner.clone(), &OrchestratorConfig::default());
    let (callback, receiver) = channel();
    let ghost = isoflow_core::WorkerTarget::new("com.vendor.uninstalled", "GhostService");

    let ticket = dispatcher
        .schedule(
            FlowKind::AppRequest,
            FlowArgs::app_request(app_request(ghost), callback),
        )
        .unwrap();

    assert_eq!(
        receiver.await.unwrap(),
        ExecutionOutcome::Failure(ErrorCode::Load)
    );
    let report = ticket.report().await.unwrap();
    assert_eq!(report.error_code(), Some(ErrorCode::Load));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(runner.loads(), 1);
    assert_eq!(runner.unloads(), 0);
}

#[tokio::test]
async fn unsupported_and_mismatched_kinds_fail_at_dispatch() {
    let runner = Arc::new(CountingRunner::new(vendor_runner()));
    let dispatcher = dispatcher_with(runner.clone(), &OrchestratorConfig::default());

    let (callback, _receiver) = channel();
    let err = dispatcher
        .schedule(
            FlowKind::ExampleStore,
            FlowArgs::app_request(app_request(ad_service()), callback),
        )
        .unwrap_err();
    assert_eq!(err, DispatchError::UnsupportedKind(FlowKind::ExampleStore));

    let (callback, _receiver) = channel();
    let err = dispatcher
        .schedule(
            FlowKind::Render,
            FlowArgs::app_request(app_request(ad_service()), callback),
        )
        .unwrap_err();
    assert_eq!(
        err,
        DispatchError::KindMismatch {
            expected: FlowKind::Render,
            found: FlowKind::AppRequest,
        }
    );
    assert_eq!(dispatcher.stats().scheduled, 0);
    assert_eq!(runner.loads(), 0);
}

#[tokio::test]
async fn web_view_and_download_flows_dispatch() {
    let runner = Arc::new(CountingRunner::new(vendor_runner()));
    let dispatcher = dispatcher_with(runner.clone(), &OrchestratorConfig::default());

    let (callback, receiver) = channel();
    let args = WebViewArgs {
        service: ad_service(),
        query_id: 1,
        request_log: Some(vec![serde_json::json!({"ad": 1})]),
        event_params: Some(serde_json::json!({"action": "click"})),
    };
    let ticket = dispatcher
        .schedule(FlowKind::WebView, FlowArgs::web_view(args, callback))
        .unwrap();
    let ExecutionOutcome::Success(result) = receiver.await.unwrap() else {
        panic!("expected web view success");
    };
    assert!(result.event_written);
    assert!(ticket.report().await.unwrap().is_success());

    let (callback, receiver) = channel();
    let document = serde_json::json!({
        "syncToken": 3600,
        "contents": [{"key": "banner", "data": "<div>"}, {"key": "unused", "data": "x"}],
    });
    let args = DownloadArgs {
        package: "com.vendor.ads".into(),
        document: document.to_string(),
    };
    let ticket = dispatcher
        .schedule(FlowKind::Download, FlowArgs::download(args, callback))
        .unwrap();
    assert_eq!(
        receiver.await.unwrap(),
        ExecutionOutcome::Success(DownloadCompleted {
            retained_keys: Some(vec!["banner".to_string()]),
            sync_token: 3600,
            stored: 1,
        })
    );
    assert!(ticket.report().await.unwrap().is_success());

    wait_until(|| runner.unloads() == 2).await;
    assert_eq!(dispatcher.stats().succeeded, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_flows_each_get_one_callback() {
    let runner = Arc::new(CountingRunner::new(vendor_runner()));
    let dispatcher = dispatcher_with(runner.clone(), &OrchestratorConfig::default());
    let recorder = Arc::new(Recorder::default());

    let tickets: Vec<_> = (0..32)
        .map(|_| {
            dispatcher
                .schedule(
                    FlowKind::AppRequest,
                    FlowArgs::app_request(app_request(ad_service()), recorder.callback()),
                )
                .unwrap()
        })
        .collect();
    for ticket in tickets {
        assert!(ticket.report().await.unwrap().is_success());
    }

    assert_eq!(recorder.calls(), 32);
    assert!(recorder.failures().is_empty());
    wait_until(|| runner.unloads() == 32).await;
    assert_eq!(runner.loads(), 32);

    let stats = dispatcher.stats();
    assert_eq!(stats.scheduled, 32);
    assert_eq!(stats.completed, 32);
    assert_eq!(stats.succeeded, 32);
    assert_eq!(stats.in_flight(), 0);
}

#[tokio::test]
async fn bounded_pool_still_completes_every_flow() {
    let runner = Arc::new(CountingRunner::new(vendor_runner()));
    let config = ConfigLoader::from_yaml_str("runtime:\n  max_concurrent_flows: 2\n").unwrap();
    let dispatcher = dispatcher_with(runner.clone(), &config);
    let recorder = Arc::new(Recorder::default());
    let acks = Arc::new(Recorder::default());

    let mut tickets = Vec::new();
    for i in 0..6 {
        let ticket = if i % 2 == 0 {
            dispatcher.schedule(
                FlowKind::AppRequest,
                FlowArgs::app_request(app_request(ad_service()), recorder.callback()),
            )
        } else {
            dispatcher.schedule(
                FlowKind::WebTrigger,
                FlowArgs::web_trigger(
                    WebTriggerArgs {
                        destination_url: "https://example.com/c".into(),
                        app_package: "com.example.app".into(),
                        service: ad_service(),
                        payload: vec![1, 2, 3],
                    },
                    acks.callback(),
                ),
            )
        };
        tickets.push(ticket.unwrap());
    }
    for ticket in tickets {
        ticket.report().await.unwrap();
    }

    assert_eq!(recorder.calls(), 3);
    assert_eq!(acks.calls(), 3);
    assert!(acks.failures().is_empty());
    wait_until(|| runner.unloads() == 6).await;
}

#[test]
fn kind_table_comes_from_config() {
    let mut overrides = HashMap::new();
    overrides.insert(FlowKind::WebTrigger, Duration::from_secs(5));
    let expected = FlowKindTable::with_overrides(Duration::from_secs(30), &overrides);

    let config =
        ConfigLoader::from_yaml_str("deadlines:\n  overrides:\n    web_trigger: 5\n").unwrap();
    let table = config.deadlines.kind_table();
    for kind in FlowKind::ALL {
        assert_eq!(table.descriptor(kind), expected.descriptor(kind));
    }
}
