//! `research` — queue a task and follow it by polling until it settles.

use std::time::Duration;

use anyhow::{bail, Result};

use libsift::{Callbacks, ClientStatus, ProgressTracker};

use super::http::api;

pub async fn cmd_research(
    port: u16,
    user: &str,
    chat_id: &str,
    prompt: &str,
    interval: Duration,
) -> Result<()> {
    let tracker = ProgressTracker::new(api(port, user), chat_id, interval, Callbacks::default());
    tracker.start(prompt).await;

    let mut printed = 0;
    let mut last_status = ClientStatus::Idle;
    let settled = loop {
        let view = tracker.view();

        if view.status != last_status {
            match (&view.task_id, view.status) {
                (Some(id), ClientStatus::Queued) => println!("◷ queued    {}", id),
                (_, ClientStatus::Running) => {
                    let waited = tracker
                        .queue_elapsed()
                        .map(|d| d.num_milliseconds() as f64 / 1000.0)
                        .unwrap_or_default();
                    println!("▶ running   (waited {:.1}s in queue)", waited);
                }
                _ => {}
            }
            last_status = view.status;
        }

        for event in view.events.iter().skip(printed) {
            println!("  │ {:<16} {}", event.kind.as_str(), event.message);
        }
        printed = printed.max(view.events.len());

        match view.status {
            ClientStatus::Done => break view,
            ClientStatus::Error => {
                let message = view
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string());
                bail!("research failed: {}", message);
            }
            ClientStatus::Idle => bail!("nothing to research: prompt is empty"),
            _ => tokio::time::sleep(interval).await,
        }
    };

    println!("✓ completed");
    match settled.report {
        Some(report) => {
            println!("═══════════════════════════════════════");
            println!("{}", report);
        }
        None => println!("  (no report was produced)"),
    }
    Ok(())
}
