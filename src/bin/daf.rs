//! Delayed Auditory Feedback demo
//!
//! Captures the microphone, feeds it back with a configurable delay, and
//! runs until interrupted. Delay in milliseconds is the first argument.

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use daf_engine::{
    audio::{list_input_devices, CpalBackend},
    status::{TracingAnalytics, TracingStatusSink},
    Engine, ProcessingConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting DAF engine");

    let delay_ms: f32 = std::env::args()
        .nth(1)
        .map(|s| s.parse())
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid delay argument: {e}"))?
        .unwrap_or(100.0);

    println!("\n=== Available Capture Devices ===");
    match list_input_devices() {
        Ok(devices) => {
            for device in &devices {
                let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                let headset_marker = if device.is_headset { " [HEADSET]" } else { "" };
                println!("  {}{}{}", device.label, default_marker, headset_marker);
                println!("    ID: {}", device.id);
            }
        }
        Err(e) => println!("  enumeration failed: {e}"),
    }
    println!();

    let config = ProcessingConfig::default().with_delay_ms(delay_ms);
    let engine = Arc::new(
        Engine::new(Arc::new(CpalBackend), Arc::new(TracingStatusSink))
            .with_analytics(Arc::new(TracingAnalytics))
            .with_config(config),
    );

    engine.start().await?;
    let monitor = engine.spawn_monitor();

    tracing::info!("Running with {delay_ms} ms delay, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    monitor.abort();
    engine.stop().await?;
    tracing::info!("Stopped");
    Ok(())
}
