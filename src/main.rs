#![forbid(unsafe_code)]

//! Load test binary - spawns simulated classroom participants against the IDE server
//!
//! Usage:
//!   cargo run --bin load_test -- --clients 10 --ramp-up 20
//!   cargo run --bin load_test -- --clients 1 --token <TOKEN> --seed 7
//!
//! Every flag can also be set through its `LOAD_*` environment variable.

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use collab_ide_load::config::{Cli, HarnessConfig, SessionConfig, SessionTiming, METADATA_ENV};
use collab_ide_load::engine::Engine;
use collab_ide_load::metrics::{MetricsCollector, TestSummary};
use collab_ide_load::session::control::resolve_task_arn;
use collab_ide_load::session::{
    run_session, HttpTestControl, SessionOutcome, TestControl, WsTransport,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = HarnessConfig::from_cli(cli, std::env::var(METADATA_ENV).ok());
    run_load_test(config).await
}

async fn run_load_test(config: HarnessConfig) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("building HTTP client")?;

    let task_arn = match &config.task_arn {
        Some(arn) => arn.clone(),
        None => resolve_task_arn(&client, config.metadata_url.as_deref()).await,
    };
    let control = HttpTestControl::new(client, config.config_url.clone(), task_arn);

    let start = control.start().await.context("registering tester")?;
    let token = match &config.token {
        Some(token) => token.clone(),
        None => control
            .login(&config.api_url, &start.user.email)
            .await
            .context("logging in")?,
    };

    let timing = SessionTiming {
        max_duration: config.max_duration,
        ..SessionTiming::default()
    };
    let session = Arc::new(SessionConfig::from_start(&start, token, timing));
    let control = Arc::new(control.with_status_endpoint(&session.server_url, session.test_id));

    println!("\n=== Starting Load Test ===");
    println!("Task: {}", control.task_arn());
    println!("Clients: {}", config.clients);
    println!("Ramp-up: {}s", config.ramp_up.as_secs());
    println!("Max duration: {}s", config.max_duration.as_secs());
    println!("Server: {}", session.socket_url);
    println!(
        "Test {} (course {}, lesson {}), participant {} -> {}",
        session.test_id,
        session.lesson.course_id,
        session.lesson.lesson_id,
        session.identity.id,
        session.identity.target_participant_id
    );
    println!("========================\n");

    let ramp_up_delay = config.ramp_up_delay();
    let mut handles = Vec::new();
    let mut metrics_collectors = Vec::new();

    // Spawn clients with gradual ramp-up
    for i in 0..config.clients {
        let client_id = format!("vu-{}", i);
        let metrics = Arc::new(MetricsCollector::new(client_id));
        metrics_collectors.push(metrics.clone());

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(i as u64)),
            None => StdRng::from_entropy(),
        };
        handles.push(tokio::spawn(run_client(
            session.clone(),
            control.clone(),
            rng,
            metrics,
        )));

        if i + 1 < config.clients && !ramp_up_delay.is_zero() {
            tracing::info!("Waiting {}ms before spawning next client...", ramp_up_delay.as_millis());
            sleep(ramp_up_delay).await;
        }
    }

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("client task panicked: {}", e);
        }
    }
    println!("All clients completed.");

    let summary = write_results_sync(&config.results_dir, &metrics_collectors);
    match serde_json::to_value(&summary) {
        Ok(summary) => {
            if let Err(e) = control.post_summary(&summary).await {
                tracing::warn!("summary upload failed: {}", e);
            }
        }
        Err(e) => tracing::error!("failed to serialize summary: {}", e),
    }

    Ok(())
}

async fn run_client(
    session: Arc<SessionConfig>,
    control: Arc<HttpTestControl>,
    rng: StdRng,
    metrics: Arc<MetricsCollector>,
) {
    let client_id = metrics.client_id().to_string();
    match run_client_inner(&session, control, rng, metrics.clone()).await {
        Ok(outcome) => tracing::info!(
            "{}: session finished ({}, ready: {}, {} events logged)",
            client_id,
            outcome.reason,
            outcome.became_ready,
            outcome.log_entries
        ),
        Err(e) => {
            tracing::error!("{}: Client failed: {:#}", client_id, e);
            metrics.record_error(format!("{e:#}"));
            metrics.set_stop_reason("connect_failed");
        }
    }
}

async fn run_client_inner(
    session: &SessionConfig,
    control: Arc<HttpTestControl>,
    rng: StdRng,
    metrics: Arc<MetricsCollector>,
) -> Result<SessionOutcome> {
    let transport = WsTransport::connect(&session.socket_url)
        .await
        .with_context(|| format!("connecting to {}", session.socket_url))?;
    metrics.mark_connection_successful();
    tracing::info!("{}: connected", metrics.client_id());

    let engine = Engine::new(session.identity.clone(), session.lesson, rng, metrics);
    let control: Arc<dyn TestControl> = control;
    Ok(run_session(&session.timing, control, transport, engine).await)
}

/// Write results to JSON files. Fully synchronous.
fn write_results_sync(dir: &Path, collectors: &[Arc<MetricsCollector>]) -> TestSummary {
    let all_metrics: Vec<_> = collectors.iter().map(|c| c.generate_report()).collect();

    let summary = TestSummary::from_metrics(&all_metrics);
    summary.print_summary();

    write_json(&dir.join("load_test_results.json"), &all_metrics, "Detailed results");
    write_json(&dir.join("load_test_summary.json"), &summary, "Summary");
    summary
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T, label: &str) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                tracing::error!("Failed to write {}: {}", path.display(), e);
            } else {
                println!("{} saved to: {}", label, path.display());
            }
        }
        Err(e) => tracing::error!("Failed to serialize {}: {}", label, e),
    }
}
