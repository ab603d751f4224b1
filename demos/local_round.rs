//! Local calibration round example for ledroid.
//!
//! Synthesizes frames with three bright markers, runs a responder on an
//! in-process broker and plays the remote controller by hand.

use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use ledroid::bus::{BusEvent, ConnectOptions, LocalBroker, MessageBus};
use ledroid::calibration::wire;
use ledroid::{
    normalize, CalibrationProtocol, CalibrationRunner, FrameQueue, PointExtractor,
    ProtocolConfig, RunnerConfig, SessionConfig,
};

fn synthetic_frame(jitter: i32) -> DynamicImage {
    let mut img = RgbImage::from_fn(320, 240, |_, _| Rgb([15u8, 15u8, 20u8]));
    for (i, y) in [40, 110, 180].into_iter().enumerate() {
        let x = 150 + jitter + i as i32 * 4;
        draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(7, 7), Rgb([255u8, 255u8, 255u8]));
    }
    DynamicImage::ImageRgb8(img)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt::init();

    let config = ProtocolConfig::default();
    let broker = LocalBroker::new();
    let (client, events) = broker.connect(ConnectOptions::default())?;
    let (controller, mut controller_rx) =
        broker.connect(ConnectOptions::default().with_client_id("controller"))?;
    controller.subscribe(&config.publish_topic)?;

    let protocol = CalibrationProtocol::new(
        Arc::new(client),
        SessionConfig::default().with_capture_count(5),
        config.clone(),
    );
    let frames = FrameQueue::new((0..4).map(synthetic_frame)).with_repeat(true);
    let runner = CalibrationRunner::new(
        protocol,
        PointExtractor::default(),
        frames,
        events,
        RunnerConfig::default().with_frame_interval(Duration::from_millis(10)),
    );
    let (handle, tasks) = runner.run();

    while broker.subscriber_count(&config.subscribe_topic) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    println!("🎯 Sending start to {}", config.subscribe_topic);
    controller.publish(&config.subscribe_topic, wire::START_PAYLOAD.as_bytes())?;

    while let Some(event) = controller_rx.recv().await {
        if let BusEvent::Message { payload, .. } = event {
            println!("📥 {}", String::from_utf8_lossy(&payload));
            let captures = wire::decode_data(&payload)?;
            if let Some(first) = captures.first() {
                let normalized = normalize(first)?;
                println!("✅ Normalized layout: {:?}", normalized.points);
            }
            break;
        }
    }

    handle.stop().await?;
    tasks.join().await;
    Ok(())
}
