//! Demo driver for the conveyor engine: publishes a sample task mix, drains
//! it with a worker group, then walks the query/stats/cleanup surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use conveyor_core::typed::{Handler, Task};
use conveyor_core::{
    Engine, Outcome, SortField, TaskFilter, TaskHandler, TaskSort, TaskSpec, TaskStatus,
};

#[derive(Parser)]
#[command(name = "conveyor", version, about = "Task queue engine demo driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish sample tasks, drain them with workers, show the results.
    Demo {
        /// Number of dispatcher workers.
        #[arg(long, default_value_t = 2)]
        workers: usize,

        /// Namespace to run in.
        #[arg(long, default_value = "default")]
        namespace: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct SendEmail {
    to: String,
    subject: String,
}

impl Task for SendEmail {
    const TYPE: &'static str = "email";
}

struct EmailHandler;

#[async_trait]
impl Handler<SendEmail> for EmailHandler {
    async fn handle(&self, task: SendEmail) -> Outcome {
        tracing::info!(to = %task.to, subject = %task.subject, "sending email");
        Outcome::done().with_data(serde_json::json!({ "delivered_to": task.to }))
    }
}

/// Fails a fixed number of times before succeeding, to show the retry loop.
struct ReportHandler {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl TaskHandler for ReportHandler {
    async fn handle(&self, params: serde_json::Value) -> Outcome {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Outcome::error(format!("report backend busy (failures left: {left})"));
        }
        let month = params["month"].as_str().unwrap_or("unknown");
        tracing::info!(month, "generating report");
        Outcome::done().with_message(format!("report for {month} generated"))
    }
}

/// Never succeeds; exhausts its retry ceiling and lands in ERROR.
struct BackupHandler;

#[async_trait]
impl TaskHandler for BackupHandler {
    async fn handle(&self, _params: serde_json::Value) -> Outcome {
        Outcome::error("backup volume not mounted")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo { workers, namespace } => demo(workers, &namespace).await,
    }
}

async fn demo(workers: usize, namespace: &str) -> anyhow::Result<()> {
    let engine = Arc::new(
        Engine::builder()
            .register_task::<SendEmail, _>(EmailHandler, 2)
            .register(
                "report",
                Arc::new(ReportHandler {
                    remaining_failures: AtomicU32::new(2),
                }),
                3,
            )
            .register("backup", Arc::new(BackupHandler), 1)
            .build(),
    );

    println!("Publishing demo tasks...");
    let specs = vec![
        TaskSpec::new(namespace, "email")
            .with_name("Send Welcome Email")
            .with_group("notification")
            .with_description("Welcome email for a new user")
            .with_params(serde_json::json!({
                "to": "user@example.com",
                "subject": "Welcome!"
            })),
        TaskSpec::new(namespace, "email")
            .with_name("Send Digest Email")
            .with_group("notification")
            .with_params(serde_json::json!({
                "to": "digest@example.com",
                "subject": "Your weekly digest"
            })),
        TaskSpec::new(namespace, "report")
            .with_name("Generate Monthly Report")
            .with_group("reports")
            .with_params(serde_json::json!({ "month": "2024-01" })),
        TaskSpec::new(namespace, "backup")
            .with_name("Backup Database")
            .with_group("maintenance")
            .with_params(serde_json::json!({ "source": "/var/lib/data" })),
    ];
    for spec in specs {
        let name = spec.name.clone();
        let id = engine.publish(spec).await?;
        println!("  published {name} ({id})");
    }

    println!("Draining with {workers} workers...");
    let group = engine.spawn_workers(workers, namespace);
    loop {
        let stats = engine.stats(namespace).await?;
        if stats.count(TaskStatus::Todo) == 0 && stats.count(TaskStatus::Processing) == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    group.shutdown_and_join().await;

    println!("\nFinal task states:");
    let records = engine
        .find(
            &TaskFilter::new().namespace(namespace),
            Some(TaskSort::asc(SortField::CreatedTime)),
            None,
        )
        .await?;
    for record in &records {
        println!(
            "  [{:<10}] {:<24} retries={} duration={} message={}",
            record.status,
            record.name,
            record.retry_count,
            record
                .duration
                .map(|d| format!("{d:.3}s"))
                .unwrap_or_else(|| "-".to_string()),
            record.result_message.as_deref().unwrap_or("-"),
        );
    }

    let stats = engine.stats(namespace).await?;
    println!("\nNamespace '{namespace}' stats:");
    for status in TaskStatus::ALL {
        println!("  {:<10} {}", status, stats.count(status));
    }
    println!("  groups: {:?}", stats.group_counts);

    // The failed backup stays claimable again after an operator requeue.
    if let Some(failed) = records.iter().find(|r| r.status == TaskStatus::Error) {
        println!("\nRequeueing failed task {}...", failed.id);
        engine.requeue(failed.id).await?;
        let record = engine.fetch(failed.id).await?.expect("record survives");
        println!(
            "  {} is {} again (retry_count preserved at {})",
            record.name, record.status, record.retry_count
        );
    }

    // Dry-run cleanup of everything terminal.
    let filter = TaskFilter::new()
        .namespace(namespace)
        .status(TaskStatus::Done)
        .status(TaskStatus::Skip)
        .status(TaskStatus::Error);
    let preview = engine.clean(&filter, true).await?;
    println!("\nCleanup would delete {} finished task(s).", preview.count());

    Ok(())
}
