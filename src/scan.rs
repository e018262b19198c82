use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::SourceFile;

/// Expand CLI paths into a deduplicated, sorted file list.
///
/// Explicit files are taken as-is; directories are walked and filtered by the
/// configured include/exclude globs.
pub fn collect_files(config: &Config, paths: &[String]) -> Result<Vec<SourceFile>> {
    let include_set = build_globset(&config.ingest.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.ingest.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();

    for raw in paths {
        let path = Path::new(raw);
        if !path.exists() {
            bail!("Path does not exist: {}", path.display());
        }

        if path.is_file() {
            files.push(source_file(path, &file_name(path))?);
            continue;
        }

        let walker = WalkDir::new(path).follow_links(config.ingest.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let child = entry.path();
            let relative = child.strip_prefix(path).unwrap_or(child);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) {
                continue;
            }
            if !include_set.is_match(&rel_str) {
                continue;
            }

            files.push(source_file(child, &rel_str)?);
        }
    }

    // Sort and dedupe for deterministic ordering across shells and re-runs
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);

    Ok(files)
}

fn source_file(path: &Path, relative: &str) -> Result<SourceFile> {
    let metadata = std::fs::metadata(path)?;
    Ok(SourceFile {
        path: path.to_path_buf(),
        relative: relative.to_string(),
        size: metadata.len(),
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
