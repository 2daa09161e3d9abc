use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sandbox_sdk::{SandboxClient, SandboxConfig};
use uuid::Uuid;

use marquee::cli::Cli;
use marquee::config::EngineOptions;
use marquee::preview::{PreviewEngine, PreviewFrame, RenderTarget};
use marquee::telemetry::logging;
use marquee::workspace::{ProjectTree, build_snapshot};

/// How often the project directory is re-read for changes.
const FS_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// How often buffered remote logs are drained to the console.
const LOG_DRAIN_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).context("failed to initialize logging")?;

    let tree = ProjectTree::from_dir(&cli.project_dir).with_context(|| {
        format!("failed to load project from {}", cli.project_dir.display())
    })?;
    let snapshot = build_snapshot(&tree);
    tracing::info!(
        target = "marquee",
        files = snapshot.len(),
        dir = %cli.project_dir.display(),
        "project loaded"
    );

    let config =
        SandboxConfig::new(&cli.sandbox_url)?.with_bearer_token(cli.sandbox_token.clone());
    let client = SandboxClient::new(config)?;
    let project_id = cli
        .project_id
        .clone()
        .unwrap_or_else(|| format!("proj-{}", Uuid::new_v4()));

    let options = EngineOptions {
        runtime_enabled: !cli.no_runtime,
        timings: cli.tuning.to_timings(),
        ..EngineOptions::default()
    };
    let engine = PreviewEngine::new(client, project_id, options);
    let mut frames = engine.subscribe();
    engine.open(snapshot);

    let mut log_seq = 0u64;
    let mut fs_poll = tokio::time::interval(FS_POLL_INTERVAL);
    let mut log_drain = tokio::time::interval(LOG_DRAIN_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target = "marquee", "interrupt received, shutting down");
                break;
            }
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = frames.borrow_and_update().clone();
                report_frame(&cli, &frame)?;
            }
            _ = fs_poll.tick() => {
                match ProjectTree::from_dir(&cli.project_dir) {
                    Ok(tree) => engine.refresh(build_snapshot(&tree)),
                    Err(err) => tracing::warn!(
                        target = "marquee",
                        error = %err,
                        "failed to re-read project directory"
                    ),
                }
            }
            _ = log_drain.tick() => {
                if let Some(controller) = engine.controller() {
                    let (lines, next) = controller.logs_since(log_seq);
                    log_seq = next;
                    report_logs(&cli, &lines)?;
                }
            }
        }
    }

    engine.shutdown();
    Ok(())
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "event")]
enum JsonEvent<'a> {
    Frame(&'a PreviewFrame),
    Logs { lines: &'a [String] },
}

fn report_frame(cli: &Cli, frame: &PreviewFrame) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string(&JsonEvent::Frame(frame))?);
        return Ok(());
    }
    if let Some(error) = &frame.error {
        eprintln!("preview unavailable: {error}");
        return Ok(());
    }
    let (Some(tier), Some(target)) = (&frame.tier, &frame.target) else {
        return Ok(());
    };
    match target {
        RenderTarget::Url(url) => println!("preview [{}] {url}", tier.label()),
        RenderTarget::Document(document) => match &cli.out {
            Some(path) => {
                std::fs::write(path, document)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                println!(
                    "preview [{}] wrote {} bytes to {}",
                    tier.label(),
                    document.len(),
                    path.display()
                );
            }
            None => println!(
                "preview [{}] rendered document ({} bytes)",
                tier.label(),
                document.len()
            ),
        },
    }
    Ok(())
}

fn report_logs(cli: &Cli, lines: &[String]) -> anyhow::Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    if cli.json {
        println!("{}", serde_json::to_string(&JsonEvent::Logs { lines })?);
    } else {
        for line in lines {
            println!("log | {line}");
        }
    }
    Ok(())
}
