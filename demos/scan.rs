//! Scan Demo - full scanner over a synthetic camera.
//!
//! This example demonstrates:
//! - Configuring the scanner from JSON
//! - Decoding on the thread worker with the bundled grid decoder
//! - Receiving results through `on_decode` and stopping cleanly
//!
//! ```sh
//! RUST_LOG=qrscan=debug cargo run --example scan -- "hello from qrscan"
//! ```

use std::time::Duration;

use qrcode::{Color, QrCode};
use qrscan::{setup_scanner, PixelBuffer, ScannerConfig};
use tracing_subscriber::EnvFilter;

/// A 640x480 grey frame with `text` as a QR symbol in the middle.
fn camera_frame(text: &str) -> Result<PixelBuffer, Box<dyn std::error::Error>> {
    const W: usize = 640;
    const H: usize = 480;
    const SCALE: usize = 6;

    let code = QrCode::new(text.as_bytes())?;
    let modules = code.width();
    let colors = code.to_colors();

    let mut luma = vec![200u8; W * H];
    let side = (modules + 8) * SCALE;
    let (ox, oy) = ((W - side) / 2, (H - side) / 2);
    for y in 0..side {
        for x in 0..side {
            let (mx, my) = ((x / SCALE).wrapping_sub(4), (y / SCALE).wrapping_sub(4));
            let dark = mx < modules && my < modules && colors[my * modules + mx] == Color::Dark;
            luma[(oy + y) * W + ox + x] = if dark { 0 } else { 255 };
        }
    }

    Ok(PixelBuffer::from_luma(&luma, W as u32, H as u32))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let text = std::env::args().nth(1).unwrap_or_else(|| "TEST123".to_string());
    let frame = camera_frame(&text)?;

    let config = ScannerConfig::from_json(
        r#"{ "workerAckTimeout": 1000, "frameInterval": 33, "captureSize": { "width": 400, "height": 400 } }"#,
    )?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let scanner = setup_scanner(config)
        .on_scanner_load(|mode| println!("decoder ready: {}", mode))
        .on_decode(move |result| {
            let _ = tx.send(result);
        })
        .start(move || Some(frame.clone()));

    for _ in 0..3 {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(result)) => println!("scanned {:?} at {:?}", result.data, result.location),
            _ => break,
        }
    }

    scanner.stop();
    Ok(())
}
