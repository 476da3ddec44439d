//! Streams points to a running harbor server.
//!
//! Usage: harbor-ingest <points.jsonl | image-dir> --collection <name> [--server <url>]
//!                      [--origin <name>] [--batch <n>] [--retries <n>]

use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};
use std::{env, path::PathBuf, time::Duration};
use tracing::info;

use harbor_cli::{address_points, flag_value, init_tracing, read_jsonl, retry_with_backoff, scan_images};
use harbor_service::{Ack, AckStatus, IngestPoint};

async fn send_batch(client: &reqwest::Client, url: &str, batch: &[IngestPoint]) -> anyhow::Result<Vec<Ack>> {
    let acks = client
        .post(url)
        .json(batch)
        .send()
        .await?
        .error_for_status()?
        .json::<Vec<Ack>>()
        .await?;
    Ok(acks)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(source) = args.first().filter(|a| !a.starts_with('-')).map(PathBuf::from) else {
        eprintln!("Usage: harbor-ingest <points.jsonl | image-dir> --collection <name> [--server <url>] [--origin <name>] [--batch <n>] [--retries <n>]");
        std::process::exit(1);
    };
    let Some(collection) = flag_value(&args, "--collection") else {
        bail!("--collection is required");
    };
    let server = flag_value(&args, "--server").unwrap_or("http://127.0.0.1:50051").trim_end_matches('/').to_string();
    let batch_size: usize = flag_value(&args, "--batch").unwrap_or("32").parse().context("--batch requires a number")?;
    let retries: usize = flag_value(&args, "--retries").unwrap_or("5").parse().context("--retries requires a number")?;
    if batch_size == 0 {
        bail!("--batch must be at least 1");
    }

    let points = if source.is_dir() {
        scan_images(&source, flag_value(&args, "--origin").unwrap_or("local"))?
    } else {
        read_jsonl(&source)?
    };
    let points = address_points(points, collection)?;
    info!(source = %source.display(), points = points.len(), collection, %server, "ingesting");

    let client = reqwest::Client::builder().timeout(Duration::from_secs(120)).build()?;
    let url = format!("{server}/points");
    let pb = ProgressBar::new(points.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} points ({percent}%) {msg}")?
            .progress_chars("#>-"),
    );

    let (mut ok, mut failed) = (0usize, 0usize);
    for batch in points.chunks(batch_size) {
        let acks = retry_with_backoff(retries.max(1), Duration::from_millis(500), |_| send_batch(&client, &url, batch)).await?;
        for ack in &acks {
            match ack.status {
                AckStatus::Ok => ok += 1,
                AckStatus::Error => {
                    failed += 1;
                    pb.println(format!("❌ {}: {}", ack.id, ack.error.as_deref().unwrap_or("rejected")));
                }
            }
        }
        pb.inc(batch.len() as u64);
    }
    pb.finish_with_message("done");
    println!("📊 {ok} points stored, {failed} rejected");
    Ok(())
}
