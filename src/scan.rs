//! Local file discovery for `docchat ingest`.
//!
//! Paths named on the command line are taken as-is (exclusions still
//! apply); directories are walked and each file's path relative to the
//! walked root is matched against `ingest.include_globs` and
//! `ingest.exclude_globs`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use docchat_core::models::SourceDocument;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::extract::extract_text;

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalFile {
    pub path: PathBuf,
    /// Path as displayed and stored; also the document's source id.
    pub source_id: String,
}

pub fn scan_paths(paths: &[PathBuf], config: &IngestConfig) -> Result<Vec<LocalFile>> {
    let include_set = build_globset(&config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for root in paths {
        if !root.exists() {
            bail!("path does not exist: {}", root.display());
        }
        if root.is_file() {
            let name = root.to_string_lossy();
            if !exclude_set.is_match(name.as_ref()) {
                files.push(local_file(root));
            }
            continue;
        }

        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy();

            if exclude_set.is_match(rel_str.as_ref()) {
                continue;
            }
            if !include_set.is_match(rel_str.as_ref()) {
                continue;
            }
            files.push(local_file(path));
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn local_file(path: &Path) -> LocalFile {
    LocalFile {
        path: path.to_path_buf(),
        source_id: path.to_string_lossy().to_string(),
    }
}

/// Read and extract a file into a document ready for ingestion.
pub fn load_document(file: &LocalFile) -> Result<SourceDocument> {
    let bytes = std::fs::read(&file.path)
        .with_context(|| format!("failed to read {}", file.path.display()))?;
    let name = file
        .path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file.source_id.clone());
    let text = extract_text(&name, &bytes)
        .with_context(|| format!("failed to extract {}", file.path.display()))?;

    Ok(SourceDocument::new(file.source_id.clone(), text)
        .with_title(name)
        .with_locator(format!("file://{}", file.path.display())))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}
