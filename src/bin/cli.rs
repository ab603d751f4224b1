//! ledroid - LED marker extraction and calibration
//!
//! This is the CLI entry point for the ledroid tool.
//! Run with: cargo run --bin ledroid -- <command>

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use ledroid::bus::{BusEvent, ConnectOptions, LocalBroker, MessageBus};
use ledroid::calibration::wire;
use ledroid::{
    normalize, AppSettings, CalibrationProtocol, CalibrationRunner, DirectoryFrames,
    PointExtractor, PointSet,
};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage:
  ledroid extract <image>          Print marker centroids found in an image
  ledroid normalize <image>        Print centroids rescaled to unit height
  ledroid calibrate <frames-dir>   Run one calibration round on a local bus
  ledroid settings [--save]        Show (and optionally persist) settings";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let settings = AppSettings::load().with_env_overrides();

    match args.first().map(String::as_str) {
        Some("extract") => {
            let points = extract_file(&settings, args.get(1))?;
            println!("{} markers", points.len());
            for p in &points {
                println!("({:.2}, {:.2})", p.x, p.y);
            }
        }
        Some("normalize") => {
            let points = extract_file(&settings, args.get(1))?;
            let normalized = normalize(&points)?;
            println!(
                "origin ({:.2}, {:.2}), scale {:.6}",
                normalized.origin.x, normalized.origin.y, normalized.scale
            );
            for p in &normalized.points {
                println!("({:.4}, {:.4})", p.x, p.y);
            }
        }
        Some("calibrate") => {
            let dir = args.get(1).context("missing <frames-dir>")?;
            run_local_round(&settings, Path::new(dir)).await?;
        }
        Some("settings") => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            if args.iter().any(|a| a == "--save") {
                let path = settings.save()?;
                println!("Saved to {}", path.display());
            }
        }
        _ => {
            println!("{}", USAGE);
        }
    }

    Ok(())
}

fn extract_file(settings: &AppSettings, path: Option<&String>) -> anyhow::Result<PointSet> {
    let path = path.context("missing <image>")?;
    let frame = image::open(path).with_context(|| format!("failed to open {}", path))?;
    Ok(PointExtractor::new(settings.extractor_config()).extract(&frame))
}

/// Run a responder and a stand-in controller on an in-process broker.
///
/// The responder sends a start trigger; the controller answers it with a
/// start on the server topic, then prints the dataset it receives.
async fn run_local_round(settings: &AppSettings, dir: &Path) -> anyhow::Result<()> {
    let frames = DirectoryFrames::open(dir)?.with_repeat(true);
    println!("Frames: {} images in {}", frames.len(), dir.display());
    println!("Captures per round: {}", settings.capture_count);
    println!("Broker: in-process (server_url {} is not used)", settings.server_url);

    let broker = LocalBroker::new();
    let (client, events) = broker.connect(settings.connect_options())?;
    let (controller, mut controller_rx) = broker.connect(
        ConnectOptions::default()
            .with_client_id(format!("{}-controller", settings.client_id))
            .with_credentials(&settings.username, &settings.password),
    )?;
    controller.subscribe(&settings.publish_topic)?;

    let protocol = CalibrationProtocol::new(
        Arc::new(client),
        settings.session_config(),
        settings.protocol_config(),
    );
    let runner = CalibrationRunner::new(
        protocol,
        PointExtractor::new(settings.extractor_config()),
        frames,
        events,
        settings.runner_config(),
    );
    let (handle, tasks) = runner.run();

    while broker.subscriber_count(&settings.subscribe_topic) == 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.start_calibration()?;

    let captures = loop {
        let Some(event) = controller_rx.recv().await else {
            bail!("message bus closed before a dataset arrived");
        };
        let BusEvent::Message { payload, .. } = event else {
            continue;
        };
        match wire::parse_control(&payload) {
            Ok(wire::ControlMessage::Start) => {
                controller.publish(&settings.subscribe_topic, &payload)?;
            }
            Err(_) => break wire::decode_data(&payload)?,
        }
    };

    println!("\nReceived {} captures", captures.len());
    for (i, capture) in captures.iter().enumerate() {
        println!("  #{:02}: {} points", i + 1, capture.len());
    }
    if let Some(first) = captures.first() {
        match normalize(first) {
            Ok(normalized) => {
                println!("\nNormalized first capture (scale {:.6}):", normalized.scale);
                for p in &normalized.points {
                    println!("  ({:.4}, {:.4})", p.x, p.y);
                }
            }
            Err(e) => println!("\nFirst capture cannot be normalized: {}", e),
        }
    }

    handle.stop().await?;
    tasks.join().await;
    Ok(())
}
