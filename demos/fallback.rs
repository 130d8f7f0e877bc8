//! Fallback Demo - a worker that never acknowledges.
//!
//! This example demonstrates:
//! - The ack handshake timing out after `workerAckTimeout`
//! - Watching the decoder move through `fallback` to `main-thread`
//! - Decoding inline once the main-thread decoder is loaded
//!
//! ```sh
//! RUST_LOG=qrscan=debug cargo run --example fallback
//! ```

use std::sync::Arc;
use std::time::Duration;

use qrcode::{Color, QrCode};
use qrscan::decoder::BoxFuture;
use qrscan::transport::{WorkerEndpoint, WorkerPort};
use qrscan::{Decoder, GridDecoder, PixelBuffer, PixelDecoder, ScannerConfig};
use tracing_subscriber::EnvFilter;

fn qr_frame(text: &str) -> Result<PixelBuffer, Box<dyn std::error::Error>> {
    const SCALE: usize = 4;

    let code = QrCode::new(text.as_bytes())?;
    let modules = code.width();
    let colors = code.to_colors();
    let side = (modules + 8) * SCALE;

    let luma: Vec<u8> = (0..side * side)
        .map(|i| {
            let (mx, my) = ((i % side / SCALE).wrapping_sub(4), (i / side / SCALE).wrapping_sub(4));
            let dark = mx < modules && my < modules && colors[my * modules + mx] == Color::Dark;
            if dark {
                0
            } else {
                255
            }
        })
        .collect();

    Ok(PixelBuffer::from_luma(&luma, side as u32, side as u32))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ScannerConfig::from_json(r#"{ "workerAckTimeout": 200 }"#)?;

    // Workers park their endpoint here and never answer
    let parked: Arc<std::sync::Mutex<Vec<WorkerEndpoint>>> = Arc::default();
    let held = parked.clone();
    let silent = move || -> qrscan::Result<WorkerPort> {
        let (port, endpoint) = WorkerPort::pair();
        held.lock().unwrap_or_else(|e| e.into_inner()).push(endpoint);
        Ok(port)
    };

    // Simulates fetching the decoding library on demand
    let loader = || -> BoxFuture<'static, qrscan::Result<Arc<dyn PixelDecoder>>> {
        Box::pin(async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(Arc::new(GridDecoder::new()) as Arc<dyn PixelDecoder>)
        })
    };

    let decoder = Arc::new(
        Decoder::builder()
            .spawner(silent)
            .fallback(loader)
            .ack_timeout(config.worker_ack_timeout())
            .on_load(|mode| println!("decoder ready: {}", mode))
            .build(),
    );

    let mut modes = decoder.subscribe();
    let watcher = tokio::spawn(async move {
        while modes.changed().await.is_ok() {
            println!("mode -> {}", *modes.borrow_and_update());
        }
    });

    let frame = qr_frame("TEST123")?;
    println!("decode while pending: {:?}", decoder.decode(&frame).await);

    decoder.initialize().await;
    match decoder.decode(&frame).await {
        Some(result) => println!("decoded on {}: {}", decoder.mode(), result.data),
        None => println!("nothing decoded"),
    }

    decoder.teardown();
    drop(decoder);
    watcher.await?;
    Ok(())
}
