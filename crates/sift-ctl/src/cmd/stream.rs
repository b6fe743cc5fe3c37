//! `stream` — follow a task over the live relay instead of polling.

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use serde_json::{json, Value};

use sift_core::{FrameParser, SseBlock};

use super::http::post_stream;

pub enum Target<'a> {
    Prompt { prompt: &'a str, chat_id: &'a str },
    Task(&'a str),
}

pub async fn cmd_stream(port: u16, user: &str, target: Target<'_>) -> Result<()> {
    let body = match target {
        Target::Prompt { prompt, chat_id } => json!({ "prompt": prompt, "chatId": chat_id }),
        Target::Task(task_id) => json!({ "taskId": task_id }),
    };
    let resp = post_stream(port, user, &body).await?;

    let status = resp.status();
    let is_sse = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));

    if !is_sse {
        let value: Value = resp.json().await.context("failed to parse response")?;
        if !status.is_success() {
            bail!("{} {}", status.as_u16(), value);
        }
        // Already finished: the server answers with the final snapshot.
        println!("Task already finished ({}).", value["status"].as_str().unwrap_or("?"));
        if let Some(report) = value["report"].as_str() {
            println!("{}", report);
        }
        return Ok(());
    }

    let mut parser = FrameParser::new();
    let mut chunks = resp.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.context("stream interrupted")?;
        for block in parser.push(&chunk) {
            match block {
                SseBlock::Frame(frame) => println!("  │ {:<16} {}", frame.event, frame.data),
                SseBlock::Passthrough(raw) => println!("  │ {}", raw.trim_end()),
            }
        }
    }
    println!("  └─ stream closed");
    Ok(())
}
