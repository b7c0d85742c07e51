//! `info` command implementation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use contracts::{ConnectionConfig, SessionConfig, TransportKind};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    transport: TransportInfo,
    policies: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    query_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    buffers: Option<ConnectionConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct TransportInfo {
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    framerate_hz: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    replay_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    replay_speed: Option<f64>,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    params: HashMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let session = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&session, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&session, args);
    }

    Ok(())
}

fn build_config_info(session: &SessionConfig, args: &InfoArgs) -> ConfigInfo {
    let transport = &session.transport;
    let transport = match transport.kind {
        TransportKind::Mock => TransportInfo {
            kind: transport.kind.as_str().to_string(),
            framerate_hz: Some(transport.framerate_hz),
            image_size: Some(format!(
                "{}x{}",
                transport.image_width, transport.image_height
            )),
            replay_path: None,
            replay_speed: None,
        },
        TransportKind::Replay => TransportInfo {
            kind: transport.kind.as_str().to_string(),
            framerate_hz: None,
            image_size: None,
            replay_path: transport
                .replay_path
                .as_ref()
                .map(|p| p.display().to_string()),
            replay_speed: Some(transport.replay_speed),
        },
    };

    let sinks = if args.sinks {
        session
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
                params: s.params.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", session.version),
        transport,
        policies: session
            .policy_mask()
            .flags()
            .map(|flag| flag.as_str().to_string())
            .collect(),
        query_keys: session.query_keys.clone(),
        buffers: args.buffers.then(|| session.connection.clone()),
        sinks,
    }
}

fn print_config_info(session: &SessionConfig, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  tracksync Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    // Transport
    let transport = &session.transport;
    println!("📡 Transport");
    println!("   ├─ Version: {:?}", session.version);
    println!("   ├─ Kind: {}", transport.kind.as_str());
    match transport.kind {
        TransportKind::Mock => {
            println!("   ├─ Frame rate: {} Hz", transport.framerate_hz);
            println!(
                "   └─ Images: {}x{}",
                transport.image_width, transport.image_height
            );
        }
        TransportKind::Replay => {
            let path = transport
                .replay_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!("   ├─ Capture: {}", path);
            println!(
                "   └─ Speed: {}x{}",
                transport.replay_speed,
                if transport.replay_loop { " (loop)" } else { "" }
            );
        }
    }

    // Policies
    let flags: Vec<&str> = session.policy_mask().flags().map(|f| f.as_str()).collect();
    println!("\n🎛  Policies ({})", flags.len());
    for (i, flag) in flags.iter().enumerate() {
        let prefix = if i == flags.len() - 1 { "└─" } else { "├─" };
        println!("   {} {}", prefix, flag);
    }
    if !session.query_keys.is_empty() {
        println!("   Query keys: {}", session.query_keys.join(", "));
    }

    // Buffers
    if args.buffers {
        let c = &session.connection;
        println!("\n🧮 Buffers");
        println!("   ├─ Frame history: {}", c.frame_buffer_len);
        println!(
            "   ├─ Image pool: {}{}",
            c.image_buffer_len,
            if c.grow_image_pool { " (growable)" } else { "" }
        );
        println!("   ├─ Quad history: {}", c.quad_buffer_len);
        println!("   ├─ Pending timeout: {} us", c.pending_timeout_us);
        println!("   ├─ Max image lead: {} frames", c.max_image_lead);
        println!("   └─ Poll timeout: {} ms", c.poll_timeout_ms);
    }

    // Sinks
    if !session.sinks.is_empty() {
        println!("\n📤 Sinks ({})", session.sinks.len());
        for (i, sink) in session.sinks.iter().enumerate() {
            let is_last = i == session.sinks.len() - 1;
            let prefix = if is_last { "└─" } else { "├─" };
            if args.sinks {
                println!(
                    "   {} {} ({:?}, queue {})",
                    prefix, sink.name, sink.sink_type, sink.queue_capacity
                );
            } else {
                println!("   {} {} ({:?})", prefix, sink.name, sink.sink_type);
            }
        }
    }

    println!();
}
