//! Example demonstrating image cache tracing instrumentation.
//!
//! Run with: cargo run -p evidence-core --example cache_tracing

use chrono::Utc;
use evidence_core::{Config, EvidenceLibrary, NewEvidence};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use std::io::Cursor;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

fn sample_png(shade: u8) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(480, 120, Rgba([shade, 90, 160, 255]));
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("PNG encoding failed");
    buffer.into_inner()
}

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with debug level
    fmt()
        .with_env_filter(EnvFilter::new("evidence_core=debug,info"))
        .with_target(true)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .init();

    println!("=== Evidence Cache Tracing Demo ===\n");

    let config = Config {
        cache_capacity: 2,
        ..Config::ephemeral()
    };
    println!("Config: {:?}\n", config);

    let library = match EvidenceLibrary::open(config).await {
        Ok(library) => Arc::new(library),
        Err(e) => {
            eprintln!("Failed to open library: {}", e);
            return;
        }
    };

    println!("--- Ingesting three images into a cache of two ---");
    let mut ids = Vec::new();
    for shade in [40, 120, 200] {
        match library
            .add_evidence(NewEvidence::new(sample_png(shade), format!("shade-{shade}.png"), Utc::now()))
            .await
        {
            Ok(record) => ids.push(record.id),
            Err(e) => eprintln!("Ingest failed: {}", e),
        }
    }

    println!("\n--- Three concurrent requests for the evicted image ---");
    let Some(first) = ids.first().cloned() else {
        return;
    };
    let requests: Vec<_> = (0..3)
        .map(|_| {
            let library = Arc::clone(&library);
            let id = first.clone();
            tokio::spawn(async move { library.request_display(&id).await })
        })
        .collect();
    for request in requests {
        match request.await {
            Ok(Ok(Some(urls))) => println!("stamped: {}", urls.stamped_url),
            Ok(Ok(None)) => println!("artifacts missing"),
            Ok(Err(e)) => println!("error: {}", e),
            Err(e) => println!("task failed: {}", e),
        }
    }

    println!("\nStats: {:?}", library.cache_stats());
}
