use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use imagebank_core::domain::Upload;
use imagebank_core::ingest::BatchProgress;
use imagebank_core::permissions::{Action, Resource};
use imagebank_core::ImageBank;
use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use super::authorize;

/// Uploads are read and fingerprinted this many at a time.
const CHUNK: usize = 32;

/// MIME type implied by a file extension, for the formats the bank decodes.
fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => return None,
    };
    Some(mime)
}

/// Expand files and directories into the image files beneath them, sorted.
fn collect_files(paths: &[PathBuf]) -> Vec<(PathBuf, &'static str)> {
    let mut files: Vec<(PathBuf, &'static str)> = paths
        .iter()
        .flat_map(|root| WalkDir::new(root).follow_links(true))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let path = entry.into_path();
            mime_for_path(&path).map(|mime| (path, mime))
        })
        .collect();
    files.sort();
    files
}

fn read_upload(path: &Path, mime: &str, labels: &[String]) -> Result<Upload> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let original_filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(Upload {
        bytes,
        original_filename,
        mime_type: mime.to_string(),
        labels: labels.to_vec(),
    })
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "  {bar:30.cyan/blue} {spinner:.green} {pos:>5}/{len:<5} {prefix:.dim} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━╸─")
}

pub fn run(
    bank: &mut ImageBank,
    actor: Uuid,
    collection: Option<Uuid>,
    labels: &[String],
    paths: &[PathBuf],
) -> Result<()> {
    let collection_id = match collection {
        Some(id) => id,
        None => bank.default_collection(actor)?.id,
    };
    authorize(bank, actor, Resource::Collection(collection_id), Action::Add)?;

    let files = collect_files(paths);
    if files.is_empty() {
        println!("No image files found.");
        return Ok(());
    }
    debug!(files = files.len(), %collection_id, "import started");

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(progress_style());
    pb.set_prefix("Importing");
    pb.enable_steady_tick(std::time::Duration::from_millis(80));

    let mut imported = 0usize;
    let mut duplicates = 0usize;
    let mut failed: Vec<(PathBuf, String)> = Vec::new();

    for chunk in files.chunks(CHUNK) {
        let mut uploads = Vec::with_capacity(chunk.len());
        let mut names = Vec::with_capacity(chunk.len());
        for (path, mime) in chunk {
            match read_upload(path, mime, labels) {
                Ok(upload) => {
                    uploads.push(upload);
                    names.push(path.clone());
                }
                Err(e) => {
                    failed.push((path.clone(), format!("{e:#}")));
                    pb.inc(1);
                }
            }
        }

        let results = bank.ingest_batch(
            collection_id,
            &uploads,
            Some(&mut |progress: BatchProgress| match progress {
                BatchProgress::Fingerprinted { count } => {
                    pb.set_message(format!("fingerprinted {count}"));
                }
                BatchProgress::UploadDone { index, .. } => {
                    if let Some(name) = names.get(index).and_then(|p| p.file_name()) {
                        pb.set_message(name.to_string_lossy().to_string());
                    }
                    pb.inc(1);
                }
            }),
        )?;

        for (path, result) in names.iter().zip(results) {
            match result {
                Ok(ingested) => {
                    imported += 1;
                    if ingested.duplicate.is_some() {
                        duplicates += 1;
                    }
                }
                Err(e) => failed.push((path.clone(), e.to_string())),
            }
        }
    }
    pb.finish_and_clear();

    println!("Imported {imported} images ({duplicates} duplicates linked).");
    if !failed.is_empty() {
        println!("{} files were not imported:", failed.len());
        for (path, reason) in &failed {
            println!("  {}: {reason}", path.display());
        }
    }
    Ok(())
}
