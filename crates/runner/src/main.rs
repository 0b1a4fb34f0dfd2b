//! Composition root: one registry, one thread runtime, one scheduler per
//! process, constructed here and injected rather than reached through
//! globals.

use std::sync::Arc;
use std::time::Duration;

use jobforge_core::registry::{InMemoryRegistry, JobRegistry};
use jobforge_core::status::status_label;
use jobforge_core::JobRecord;
use jobforge_mail::{Notifier, SendOptions};
use jobforge_scheduler::{MethodCall, QueueEntry, Scheduler, ThreadRuntime, UnitRuntime};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobforge_runner=debug,jobforge_scheduler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let registry: Arc<InMemoryRegistry> = Arc::new(InMemoryRegistry::new());
    let runtime = Arc::new(ThreadRuntime::new());
    let notifier = Arc::new(Notifier::from_env()?);

    runtime.register("demo.sleep", |ctx| {
        let millis = ctx
            .payload()
            .get("millis")
            .and_then(|v| v.as_u64())
            .unwrap_or(250);
        std::thread::sleep(Duration::from_millis(millis));
        if ctx.is_stopped() {
            return Err("stopped before completion".to_string());
        }
        Ok(json!({ "slept_ms": millis }))
    });

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&registry) as Arc<dyn JobRegistry>,
        Arc::clone(&runtime) as Arc<dyn UnitRuntime>,
    ));
    tracing::info!(
        capacity = scheduler.capacity(),
        queue_limit = scheduler.queue_limit(),
        mail = notifier.is_enabled(),
        "jobforge runner starting",
    );

    let cancel = CancellationToken::new();
    let pump = Arc::clone(&scheduler);
    let pump_cancel = cancel.clone();
    let pump_task = tokio::spawn(async move { pump.run(pump_cancel).await });

    // Submit a demo batch so a bare `cargo run` shows the full lifecycle.
    for job_id in 1..=4 {
        registry.insert(JobRecord::new(job_id));
        let entry = QueueEntry::new(job_id, format!("demo-sleep-{job_id}"), {
            let mut payload = jobforge_scheduler::Payload::new();
            payload.insert(
                "millis".into(),
                jobforge_scheduler::PayloadValue::concrete(100 * job_id),
            );
            MethodCall::new("demo.sleep").with_payload(payload)
        })
        .on_message(|msg| {
            tracing::info!(job_id = msg.job_id, kind = %msg.kind, "custom message");
        });
        scheduler.enqueue_tail(entry)?;
    }

    // Wait for the batch to finish, then report.
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if scheduler.active_count() == 0 && scheduler.pending_count() == 0 {
            break;
        }
    }

    let mut summary = String::new();
    for job_id in 1..=4 {
        if let Some(record) = registry.get(job_id) {
            tracing::info!(
                job_id,
                status = record.status,
                label = status_label(record.status),
                "job finished",
            );
            summary.push_str(&format!(
                "job {}: {} ({})\n",
                job_id,
                status_label(record.status),
                record.response.message
            ));
        }
    }

    notifier
        .send(SendOptions {
            subject: "jobforge demo batch finished".into(),
            body: summary,
            ..Default::default()
        })
        .await
        .unwrap_or_else(|e| tracing::warn!(error = %e, "completion mail failed"));

    cancel.cancel();
    let _ = pump_task.await;
    Ok(())
}
