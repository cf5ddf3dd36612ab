//! Permanent storage of accepted instances.
//!
//! Each accepted `CompilationResult` is written under its category's
//! partition with a freshly generated unique id:
//! `{output}/{category}/{metadata,images,structures,assets,text}/...`.
//! Errors here propagate and end the run: partial writes to permanent
//! storage are worse than stopping.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::compile::CompilationResult;
use crate::error::CollectError;
use crate::fetch::ScrapeResult;

/// Partitions created under each category directory.
const PARTITIONS: &[&str] = &["metadata", "images", "structures", "assets", "text"];

/// Directory prefixes excluded from structure archives.
const ARCHIVE_EXCLUDED_PREFIXES: &[&str] = &["_site", "."];

/// A persisted instance's identity.
#[derive(Debug, Clone)]
pub struct PersistedInstance {
    pub id: String,
    pub category: String,
}

/// Build the shared metadata for a candidate from its scrape result.
///
/// All `additional_info` fields are flattened to the top level next to
/// the result's own fields; dates are rendered as `%Y-%m-%d`.
pub fn base_metadata(result: &ScrapeResult) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        "download_url".to_string(),
        Value::String(result.download_url.clone()),
    );
    metadata.insert(
        "instance_name".to_string(),
        Value::String(result.instance_name.clone()),
    );
    metadata.insert(
        "date".to_string(),
        Value::String(result.date.format("%Y-%m-%d").to_string()),
    );
    for (key, value) in &result.additional_info {
        metadata.insert(key.clone(), value.clone());
    }
    metadata.insert(
        "date_scrapped".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    metadata
}

/// Extract a gzipped tarball into `destination`.
pub fn extract_tar_gz(archive: &Path, destination: &Path) -> std::io::Result<()> {
    let file = std::fs::File::open(archive)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut tar = tar::Archive::new(decoder);
    std::fs::create_dir_all(destination)?;
    tar.unpack(destination)
}

/// Archive `src` as a gzipped tarball at `destination` (extension
/// included by the caller), excluding directories whose name starts
/// with `_site` or a dot.
pub fn archive_dir(src: &Path, destination: &Path) -> std::io::Result<()> {
    let file = std::fs::File::create(destination)?;
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let excluded = |entry: &walkdir::DirEntry| {
        entry.file_type().is_dir()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| {
                    ARCHIVE_EXCLUDED_PREFIXES
                        .iter()
                        .any(|prefix| name.starts_with(prefix))
                })
            && entry.path() != src
    };

    for entry in walkdir::WalkDir::new(src)
        .into_iter()
        .filter_entry(|e| !excluded(e))
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        builder.append_path_with_name(entry.path(), rel)?;
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

fn copy_file(from: &Path, to: &Path, what: &str) -> Result<(), CollectError> {
    std::fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| CollectError::Persist(format!("copying {what} {}: {e}", from.display())))
}

/// Write one accepted compilation result to permanent storage.
///
/// The metadata JSON is the shared candidate metadata plus `category`,
/// `uuid` and the asset listing.
pub fn persist_instance(
    output_path: &Path,
    result: &CompilationResult,
    mut metadata: Map<String, Value>,
) -> Result<PersistedInstance, CollectError> {
    let id = Uuid::new_v4().to_string();
    let category_dir = output_path.join(&result.category);
    for partition in PARTITIONS {
        std::fs::create_dir_all(category_dir.join(partition))?;
    }

    metadata.insert("category".to_string(), Value::String(result.category.clone()));
    metadata.insert("uuid".to_string(), Value::String(id.clone()));
    metadata.insert(
        "assets".to_string(),
        Value::Array(
            result
                .assets_path
                .iter()
                .map(|p| Value::String(p.to_string_lossy().into_owned()))
                .collect(),
        ),
    );

    let metadata_path = category_dir.join("metadata").join(format!("{id}.json"));
    let rendered = serde_json::to_string_pretty(&Value::Object(metadata))?;
    std::fs::write(&metadata_path, rendered)?;

    let image_path = category_dir.join("images").join(format!("{id}.png"));
    copy_file(&result.rendering_path, &image_path, "image")?;

    for asset in &result.assets_path {
        let Some(name) = asset.file_name() else {
            continue;
        };
        copy_file(asset, &category_dir.join("assets").join(name), "asset")?;
    }

    if let Some(ref text) = result.text {
        std::fs::write(category_dir.join("text").join(format!("{id}.txt")), text)?;
    }

    if let Some(ref data_path) = result.data_path {
        if data_path.is_dir() {
            let archive_path = category_dir
                .join("structures")
                .join(format!("{id}.tar.gz"));
            archive_dir(data_path, &archive_path)
                .map_err(|e| CollectError::Persist(format!("archiving structure: {e}")))?;
        } else {
            let extension = data_path
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default();
            let structure_path = category_dir
                .join("structures")
                .join(format!("{id}{extension}"));
            copy_file(data_path, &structure_path, "structure")?;
        }
    }

    Ok(PersistedInstance {
        id,
        category: result.category.clone(),
    })
}

/// Remove `text` and `structures` partitions that ended up empty.
pub fn remove_empty_partitions<'a>(
    output_path: &Path,
    categories: impl Iterator<Item = &'a str>,
) -> std::io::Result<()> {
    for category in categories {
        for partition in ["text", "structures"] {
            let dir = output_path.join(category).join(partition);
            if dir.is_dir() && dir.read_dir()?.next().is_none() {
                std::fs::remove_dir(&dir)?;
            }
        }
    }
    Ok(())
}

/// Remove and recreate the temporary working directories, so stale
/// artifacts from a previous candidate cannot leak into the next one.
pub fn reset_dirs(dirs: &[&PathBuf]) -> std::io::Result<()> {
    for dir in dirs {
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
