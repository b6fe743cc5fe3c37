//! sift-ctl — command-line interface for the sift research daemon.

mod cmd;

use std::time::Duration;

use anyhow::{Context, Result};

use sift_core::config::SiftConfig;

use cmd::stream::Target;

const DEFAULT_LIMIT: usize = 10;
const DEFAULT_CHAT: &str = "cli";

fn default_user() -> String {
    std::env::var("SIFT_USER")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "local".to_string())
}

/// Shared config file, so the CLI talks to the port the daemon binds and
/// polls at the configured interval.
fn load_config() -> SiftConfig {
    SiftConfig::load().unwrap_or_else(|e| {
        eprintln!("warning: {}; using default config", e);
        SiftConfig::default()
    })
}

fn print_usage(config: &SiftConfig) {
    println!("Usage: sift-ctl [--port <port>] [--user <id>] <command>");
    println!();
    println!("Commands:");
    println!("  research <prompt>       Queue a research task and poll it to completion");
    println!("  stream <prompt>         Run a research task over the live stream");
    println!("  resume <task-id>        Reattach to a task's live stream");
    println!("  task <task-id>          Show one task's snapshot");
    println!("  tasks                   List your recent tasks");
    println!();
    println!("Options:");
    println!("  --port <port>    API port (default: {})", config.api.port);
    println!("  --user <id>      Caller identity (default: $SIFT_USER or $USER)");
    println!("  --chat <id>      Chat to file the task under (default: {})", DEFAULT_CHAT);
    println!("  --limit <n>      Number of tasks to list (default: {})", DEFAULT_LIMIT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Global options, defaulted from the config file.
#[derive(Debug)]
struct Options {
    port: u16,
    user: String,
    chat: String,
    limit: usize,
    interval: Duration,
}

/// Split flags from the command words.
fn parse_args<'a>(args: &'a [String], config: &SiftConfig) -> Result<(Options, Vec<&'a str>)> {
    let mut opts = Options {
        port: config.api.port,
        user: default_user(),
        chat: DEFAULT_CHAT.to_string(),
        limit: DEFAULT_LIMIT,
        interval: config.client.poll_interval(),
    };
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                opts.port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--limit" => {
                i += 1;
                opts.limit = args
                    .get(i)
                    .context("--limit requires a value")?
                    .parse()
                    .context("--limit must be a number")?;
            }
            "--user" => {
                i += 1;
                opts.user = args.get(i).context("--user requires a value")?.clone();
            }
            "--chat" => {
                i += 1;
                opts.chat = args.get(i).context("--chat requires a value")?.clone();
            }
            other => remaining.push(other),
        }
        i += 1;
    }
    Ok((opts, remaining))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = load_config();
    let (opts, remaining) = parse_args(&args, &config)?;
    let Options {
        port,
        user,
        chat,
        limit,
        interval,
    } = opts;

    match remaining.as_slice() {
        ["research", words @ ..] if !words.is_empty() => {
            let prompt = words.join(" ");
            cmd::research::cmd_research(port, &user, &chat, &prompt, interval).await
        }
        ["stream", words @ ..] if !words.is_empty() => {
            let prompt = words.join(" ");
            let target = Target::Prompt {
                prompt: &prompt,
                chat_id: &chat,
            };
            cmd::stream::cmd_stream(port, &user, target).await
        }
        ["resume", task_id] => cmd::stream::cmd_stream(port, &user, Target::Task(task_id)).await,
        ["task", task_id] => cmd::tasks::cmd_task(port, &user, task_id).await,
        ["tasks"] | [] => cmd::tasks::cmd_tasks(port, &user, limit).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage(&config);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage(&config);
            std::process::exit(1);
        }
    }
}
