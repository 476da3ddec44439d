//! Shared plumbing for the harbor binaries.

use anyhow::{bail, Context, Result};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use harbor_core::config::{AppConfig, Config};
use harbor_core::{DataPoint, FieldValue};
use harbor_service::IngestPoint;

const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];

/// `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

pub fn load_app_config() -> Result<AppConfig> {
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    Ok(config.app()?)
}

/// Value following `flag` in `args`, if present.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter().position(|a| a == flag).and_then(|i| args.get(i + 1)).map(String::as_str)
}

/// One point per non-empty line of a JSONL file.
pub fn read_jsonl(path: &Path) -> Result<Vec<DataPoint>> {
    let body = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("{}:{}: invalid point", path.display(), n + 1))
        })
        .collect()
}

/// Address `points` to `collection`. Points without an id get one derived
/// from their content, so resending a batch overwrites instead of
/// duplicating.
pub fn address_points(points: Vec<DataPoint>, collection: &str) -> Result<Vec<IngestPoint>> {
    points
        .into_iter()
        .map(|point| {
            let mut ingest = IngestPoint::new(collection, point);
            if ingest.id.is_empty() {
                ingest.id = DataPoint::from_fields("", ingest.fields.clone())?.content_id()?;
            }
            Ok(ingest)
        })
        .collect()
}

/// One point per image file under `dir`, with the file name under `meta/file`.
pub fn scan_images(dir: &Path, origin: &str) -> Result<Vec<DataPoint>> {
    let mut points = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase) else {
            continue;
        };
        if !entry.file_type().is_file() || !IMAGE_EXTS.contains(&ext.as_str()) {
            continue;
        }
        let content = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let file = path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
        let point = DataPoint::with_generated_id()
            .with_field("image", FieldValue::image(content, ext))?
            .with_field("meta/file", FieldValue::text(file))?
            .with_field("origin_name", FieldValue::text(origin))?;
        points.push(point);
    }
    Ok(points)
}

/// Run `call` up to `attempts` times, doubling the delay after each failure.
pub async fn retry_with_backoff<T, F, Fut>(attempts: usize, initial: Duration, mut call: F) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if attempts == 0 {
        bail!("retry_with_backoff needs at least one attempt");
    }
    let mut delay = initial;
    let mut attempt = 1;
    loop {
        match call(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "call failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e.context(format!("giving up after {attempts} attempts"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn jsonl_points_and_bad_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("points.jsonl");
        std::fs::write(
            &path,
            "{\"id\":\"abcd\",\"fields\":[{\"name\":\"meta/title\",\"value\":{\"type\":\"text\",\"text\":\"Arethusa\"}}]}\n\n",
        )
        .unwrap();
        let points = read_jsonl(&path).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].get("meta/title"), Some(&FieldValue::text("Arethusa")));

        std::fs::write(&path, "{\"id\": 3}\n").unwrap();
        let err = read_jsonl(&path).unwrap_err();
        assert!(err.to_string().contains(":1:"));
    }

    #[test]
    fn image_scan_skips_other_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/a.JPG"), [1u8, 2, 3]).unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        let points = scan_images(tmp.path(), "local").unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].get("image"), Some(&FieldValue::image(vec![1, 2, 3], "jpg")));
        assert_eq!(points[0].get("meta/file"), Some(&FieldValue::text("a.JPG")));
    }

    #[test]
    fn addressed_points_get_stable_ids() {
        let untitled = || DataPoint::new("").with_field("meta/title", FieldValue::text("Arethusa")).unwrap();
        let named = DataPoint::new("arethusa-1887").with_field("meta/title", FieldValue::text("Arethusa")).unwrap();

        let first = address_points(vec![untitled(), named], "wikimedia").unwrap();
        let second = address_points(vec![untitled()], "wikimedia").unwrap();
        assert_eq!(first[0].collection, "wikimedia");
        assert!(!first[0].id.is_empty());
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[1].id, "arethusa-1887");
    }

    #[tokio::test]
    async fn retries_until_success_or_budget() {
        let calls = AtomicUsize::new(0);
        let out = retry_with_backoff(3, Duration::from_millis(1), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    bail!("down")
                }
                Ok(attempt)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 3);

        let failed: Result<()> = retry_with_backoff(2, Duration::from_millis(1), |_| async { bail!("down") }).await;
        assert!(failed.unwrap_err().to_string().contains("2 attempts"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn flags() {
        let args: Vec<String> = ["--addr", "0.0.0.0:9000", "--inference"].iter().map(|s| s.to_string()).collect();
        assert_eq!(flag_value(&args, "--addr"), Some("0.0.0.0:9000"));
        assert_eq!(flag_value(&args, "--inference"), None);
        assert_eq!(flag_value(&args, "--port"), None);
    }
}
