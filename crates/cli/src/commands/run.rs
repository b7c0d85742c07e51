//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::{PolicyFlag, SessionConfig, TransportKind};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cli::RunArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let mut session = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    apply_overrides(&mut session, args);
    config_loader::ConfigLoader::validate(&session)
        .context("Configuration invalid after command-line overrides")?;

    info!(
        transport = session.transport.kind.as_str(),
        policies = %session.policy_mask(),
        sinks = session.sinks.len(),
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&session);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        session,
        max_frames: (args.max_frames > 0).then_some(args.max_frames),
        timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
        buffer_size: args.buffer_size,
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
    };

    let pipeline = Pipeline::new(pipeline_config);
    let shutdown_signal = setup_shutdown_signal();

    info!("Starting connection...");

    tokio::select! {
        result = pipeline.run() => {
            let stats = result.context("Pipeline execution failed")?;
            info!(
                frames_released = stats.frames_released,
                notifications = stats.notifications,
                duration_secs = stats.duration.as_secs_f64(),
                fps = format!("{:.2}", stats.fps()),
                "Run completed successfully"
            );
            stats.print_summary();
        }
        _ = shutdown_signal => {
            warn!("Received shutdown signal, stopping connection...");
        }
    }

    info!("tracksync finished");
    Ok(())
}

/// Fold command-line overrides into the loaded configuration
fn apply_overrides(session: &mut SessionConfig, args: &RunArgs) {
    if let Some(transport) = args.transport {
        info!(transport = ?transport, "Overriding transport from CLI");
        session.transport.kind = transport.into();
    }
    if let Some(ref path) = args.replay {
        info!(path = %path.display(), "Replaying capture from CLI");
        session.transport.kind = TransportKind::Replay;
        session.transport.replay_path = Some(path.clone());
    }
    if let Some(speed) = args.replay_speed {
        session.transport.replay_speed = speed;
    }
    if args.replay_loop {
        session.transport.replay_loop = true;
    }
    for policy in &args.policies {
        let flag = PolicyFlag::from(*policy);
        if !session.policies.contains(&flag) {
            session.policies.push(flag);
        }
    }
}

/// Resolve on Ctrl+C or SIGTERM
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(session: &SessionConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Transport: {}", session.transport.kind.as_str());
    match session.transport.kind {
        TransportKind::Mock => println!(
            "  {} Hz, {}x{} images",
            session.transport.framerate_hz,
            session.transport.image_width,
            session.transport.image_height
        ),
        TransportKind::Replay => {
            if let Some(ref path) = session.transport.replay_path {
                println!(
                    "  {} at {}x{}",
                    path.display(),
                    session.transport.replay_speed,
                    if session.transport.replay_loop { " (loop)" } else { "" }
                );
            }
        }
    }

    println!("\nPolicies: {}", session.policy_mask());
    if !session.query_keys.is_empty() {
        println!("Query keys: {}", session.query_keys.join(", "));
    }

    let c = &session.connection;
    println!("\nBuffers:");
    println!(
        "  frames {}, images {}, quads {}",
        c.frame_buffer_len, c.image_buffer_len, c.quad_buffer_len
    );
    println!(
        "  pending timeout {} us, poll timeout {} ms",
        c.pending_timeout_us, c.poll_timeout_ms
    );

    if !session.sinks.is_empty() {
        println!("\nSinks ({}):", session.sinks.len());
        for sink in &session.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}
