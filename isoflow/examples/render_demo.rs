//! Runs an app request against an in-process vendor service, then renders
//! the slot it returned.
//!
//! ```sh
//! RUST_LOG=isoflow_runtime=debug cargo run --example render_demo
//! ```

use isoflow::prelude::*;
use isoflow::runtime::flows::{AppRequestArgs, RenderArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::from_yaml_str(
        r#"
runtime:
  max_concurrent_flows: 4
deadlines:
  default_seconds: 5
logging:
  filter: "info,isoflow_runtime=debug"
"#,
    )?;
    Logger::init_with(&config.logging)?;

    let target = WorkerTarget::new("com.vendor.ads", "AdService");
    let runner = InprocRunner::new().with_service(
        target.clone(),
        service_fn(|op_code, _params| async move {
            let reply = if op_code == OpCode::RENDER {
                serde_json::json!({"content": "<div class=\"ad\">Hello</div>"})
            } else {
                serde_json::json!({"rendering_keys": ["banner"], "request_log": [{"bid": 3}]})
            };
            ResultMap::new().with_record("result", &reply)
        }),
    );

    let services = FlowServices::builder(Arc::new(runner))
        .manifests(Arc::new(StaticManifest::new().declare(&target)))
        .build();
    let dispatcher = FlowDispatcher::from_config(
        services,
        &config,
        BackgroundPool::current(config.runtime.max_concurrent_flows)?,
    );

    let (callback, outcome) = channel();
    let args = AppRequestArgs {
        calling_package: "com.example.app".into(),
        service: target,
        app_params: Some(serde_json::json!({"placement": "home"})),
    };
    dispatcher.schedule(FlowKind::AppRequest, FlowArgs::app_request(args, callback))?;

    let executed = match outcome.await? {
        ExecutionOutcome::Success(result) => result,
        ExecutionOutcome::Failure(code) => anyhow::bail!("app request failed: {code}"),
    };
    println!("query {:?} keys {:?}", executed.query_id, executed.output.rendering_keys);

    let Some(slot_token) = executed.slot_token else {
        anyhow::bail!("service did not ask for rendering");
    };

    let (callback, outcome) = channel();
    let args = RenderArgs {
        slot_token,
        width: 320,
        height: 50,
        display_id: 0,
    };
    let ticket = dispatcher.schedule(FlowKind::Render, FlowArgs::render(args, callback))?;

    match outcome.await? {
        ExecutionOutcome::Success(surface) => println!("rendered: {}", surface.html),
        ExecutionOutcome::Failure(code) => println!("render failed: {code}"),
    }

    let report = ticket.report().await?;
    Logger::log_trace_summary(&report.trace);
    println!("{:?}", dispatcher.stats());
    Ok(())
}
