//! Scan for a facial tracker, connect, and print every notification.
//!
//! Run with: cargo run --example observe_tracker

use facial_tracker_ble::{DeviceScanner, Result, SERVICE_UUID};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("facial_tracker_ble=info".parse().unwrap()),
        )
        .init();

    println!("Simple Facial Tracker");
    println!("Scanning for service {}...", SERVICE_UUID);

    let scanner = DeviceScanner::new().await?;
    let trackers = scanner.scan_default().await?;

    let Some(tracker) = trackers.first() else {
        return Ok(());
    };

    tracker
        .on_value_changed(|data| println!("Notify: {}", data))
        .detach();

    println!("Connecting...");
    if let Err(e) = tracker.try_connect().await {
        println!("Failed to connect: {}", e);
        return Ok(());
    }
    println!("Successfully connected!");

    // Runs until interrupted.
    let _ = tokio::signal::ctrl_c().await;

    println!("\nDisconnecting...");
    tracker.disconnect().await;

    Ok(())
}
