//! Task inspection commands.

use anyhow::Result;

use libsift::{observe, Observed, ResearchApi};

use super::http::api;

pub async fn cmd_task(port: u16, user: &str, task_id: &str) -> Result<()> {
    let snap = api(port, user).task_snapshot(task_id).await?;

    println!("═══════════════════════════════════════");
    println!("  Research Task");
    println!("═══════════════════════════════════════");
    println!("  ID       : {}", snap.task_id);
    println!("  Topic    : {}", snap.topic);
    println!("  Status   : {}", snap.status);
    if let Some(step) = &snap.progress.current_step {
        println!("  Step     : {}", step);
    }
    if let Some(total) = snap.progress.total_steps {
        println!("  Progress : {}/{}", snap.progress.completed_steps, total);
    }
    if let Some(q) = &snap.queue_info {
        println!("  Enqueued : {}", q.enqueued_at.to_rfc3339());
        if let Some(worker) = &q.worker_id {
            println!("  Worker   : {}", worker);
        }
    }

    if !snap.progress.events.is_empty() {
        println!("\n  Events:");
        for e in &snap.progress.events {
            println!(
                "  │ {}  {:<16} {}",
                e.timestamp.format("%H:%M:%S"),
                e.kind.as_str(),
                e.message
            );
        }
    }

    match (observe(&snap.status), &snap.report) {
        (Observed::Completed, Some(report)) => {
            println!("\n  Report:");
            println!("{}", report);
        }
        (Observed::Failed, _) => {
            if let Some(e) = snap.progress.last_error() {
                println!("\n  ✗ {}", e.message);
            }
        }
        _ => {}
    }

    Ok(())
}

pub async fn cmd_tasks(port: u16, user: &str, limit: usize) -> Result<()> {
    let tasks = api(port, user).list_tasks(limit).await?;

    if tasks.is_empty() {
        println!("No research tasks yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Research Tasks ({})", tasks.len());
    println!("═══════════════════════════════════════");
    for t in &tasks {
        println!("  ┌─ {}", t.task_id.as_str());
        println!("  │  topic   : {}", t.topic);
        println!("  │  status  : {}", t.status.as_str());
        if let Some(at) = t.updated_at.or(t.queued_at) {
            println!("  │  updated : {}", at.to_rfc3339());
        }
        println!("  └─ report  : {}", if t.report_available { "yes" } else { "no" });
    }

    Ok(())
}
