use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use crate::log_parser;
use crate::storage::IndexedFileState;
use crate::store_manager::StoreManager;

pub const DEFAULT_EXTENSION: &str = "jsonl";

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub source_root: PathBuf,
    pub extension: String,
    pub force: bool,
}

impl SyncOptions {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            extension: DEFAULT_EXTENSION.to_string(),
            force: false,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncReport {
    pub files_scanned: usize,
    pub new_records: usize,
    pub errors: Vec<String>,
}

/// Bring the store up to date with every session log under the source root.
///
/// Layout is `<root>/<project>/<session>.<ext>`; files directly under the
/// root are not session logs and are ignored. Each file resumes from its
/// stored byte offset, and a failure on one file never stops the others.
pub fn sync(store: &mut StoreManager, options: &SyncOptions) -> SyncReport {
    let mut report = SyncReport::default();
    let root = &options.source_root;

    if !root.is_dir() {
        report
            .errors
            .push(format!("source directory not found: {}", root.display()));
        return report;
    }

    let files = collect_log_files(root, &options.extension, &mut report.errors);
    for path in files {
        report.files_scanned += 1;
        match index_file(store, &path, options.force) {
            Ok(inserted) => report.new_records += inserted,
            Err(e) => {
                log::warn!("failed to index {}: {:#}", path.display(), e);
                report.errors.push(format!("{}: {:#}", path.display(), e));
            }
        }
    }

    log::info!(
        "sync: {} files scanned, {} new commands, {} errors",
        report.files_scanned,
        report.new_records,
        report.errors.len()
    );
    report
}

fn collect_log_files(root: &Path, extension: &str, errors: &mut Vec<String>) -> Vec<PathBuf> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            errors.push(format!("{}: {}", root.display(), e));
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let project = entry.path();
        // Follows symlinks, so a dangling project link is reported below.
        match fs::metadata(&project) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => continue,
            Err(e) => {
                log::warn!("skipping unreadable entry {}: {}", project.display(), e);
                errors.push(format!("{}: {}", project.display(), e));
                continue;
            }
        }
        let sessions = match fs::read_dir(&project) {
            Ok(sessions) => sessions,
            Err(e) => {
                log::warn!("skipping unreadable directory {}: {}", project.display(), e);
                errors.push(format!("{}: {}", project.display(), e));
                continue;
            }
        };
        for session in sessions.filter_map(|e| e.ok()) {
            let path = session.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
                files.push(path);
            }
        }
    }

    files.sort();
    files
}

/// Index the unprocessed tail of one file; returns the number of new commands.
fn index_file(store: &mut StoreManager, path: &Path, force: bool) -> Result<usize> {
    let meta = fs::metadata(path).context("read metadata")?;
    let key = path.to_string_lossy().to_string();
    let previous = store.file_state(&key)?;

    let start = match (&previous, force) {
        (Some(prev), false) if prev.offset >= meta.len() => {
            log::debug!("{} already indexed", path.display());
            return Ok(0);
        }
        (Some(prev), false) => prev.offset,
        _ => 0,
    };

    let content = fs::read_to_string(path).context("read log file")?;
    let tail = tail_from_offset(&content, start);
    let session_id = path.file_stem().and_then(|s| s.to_str());
    let commands = log_parser::parse(tail, session_id);

    let state = IndexedFileState {
        path: key,
        offset: content.len() as u64,
        mtime: modified_secs(&meta),
    };
    let inserted = store.ingest_batch(&commands, &state)?;
    log::debug!(
        "{}: parsed {} commands from byte {}, {} new",
        path.display(),
        commands.len(),
        start,
        inserted
    );
    Ok(inserted)
}

/// Suffix of `content` starting at the first line that begins at or after
/// byte `offset`. A line the offset falls inside is skipped entirely.
pub fn tail_from_offset(content: &str, offset: u64) -> &str {
    let mut pos = 0usize;
    for line in content.split_inclusive('\n') {
        if pos as u64 >= offset {
            return &content[pos..];
        }
        pos += line.len();
    }
    &content[pos..]
}

fn modified_secs(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
