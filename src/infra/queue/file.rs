//! File-backed queue store.
//!
//! Each source is persisted as one JSON-lines file. Appends write a single
//! line; prefix removal and front insertion rewrite the file through a temp
//! file and rename, and memory only changes once the disk write succeeded. Everything is
//! reloaded into memory at construction.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::core::{QueueStore, SchedulerError, SourceId, WorkItem};

const EXTENSION: &str = "jsonl";

fn backend<E: std::fmt::Display>(e: E) -> SchedulerError {
    SchedulerError::Backend(e.to_string())
}

/// Encode a source id as a file stem: ASCII alphanumerics, `-` and `_` pass
/// through; every other byte becomes `~xx`.
fn encode_source(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    for byte in source.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("~{byte:02x}"));
        }
    }
    out
}

fn decode_source(stem: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(stem.len());
    let mut iter = stem.bytes();
    while let Some(byte) = iter.next() {
        if byte == b'~' {
            let hi = char::from(iter.next()?).to_digit(16)?;
            let lo = char::from(iter.next()?).to_digit(16)?;
            bytes.push(u8::try_from(hi * 16 + lo).ok()?);
        } else {
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).ok()
}

/// Durable queue store using one JSONL file per source.
#[derive(Debug)]
pub struct FileQueueStore {
    dir: PathBuf,
    queues: HashMap<SourceId, VecDeque<WorkItem>>,
}

impl FileQueueStore {
    /// Open (or create) a store rooted at `dir`, loading existing queues.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let dir = dir.as_ref().to_path_buf();
        create_dir_all(&dir).map_err(backend)?;
        let mut store = Self {
            dir,
            queues: HashMap::new(),
        };
        store.load_from_disk()?;
        Ok(store)
    }

    fn file_path(&self, source: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{EXTENSION}", encode_source(source)))
    }

    fn load_from_disk(&mut self) -> Result<(), SchedulerError> {
        for entry in fs::read_dir(&self.dir).map_err(backend)? {
            let path = entry.map_err(backend)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(source) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_source)
            else {
                tracing::warn!(path = %path.display(), "skipping queue file with undecodable name");
                continue;
            };

            let file = OpenOptions::new().read(true).open(&path).map_err(backend)?;
            let mut items = VecDeque::new();
            for line in BufReader::new(file).lines() {
                let line = line.map_err(backend)?;
                if line.trim().is_empty() {
                    continue;
                }
                items.push_back(serde_json::from_str(&line).map_err(backend)?);
            }
            tracing::debug!(source = %source, items = items.len(), "loaded persisted queue");
            self.queues.insert(source, items);
        }
        Ok(())
    }

    fn append_to_disk(&self, source: &str, item: &WorkItem) -> Result<(), SchedulerError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(source))
            .map_err(backend)?;
        let line = serde_json::to_string(item).map_err(backend)?;
        writeln!(file, "{line}").map_err(backend)
    }

    fn temp_path(&self, source: &str) -> PathBuf {
        self.file_path(source).with_extension(format!("{EXTENSION}.tmp"))
    }

    /// Replace `source`'s file with `items`. Writes a sibling temp file and
    /// renames it over the original, so a failure leaves the old file intact.
    fn rewrite_disk<'a>(
        &self,
        source: &str,
        items: impl IntoIterator<Item = &'a WorkItem>,
    ) -> Result<(), SchedulerError> {
        let tmp = self.temp_path(source);
        let write = || -> Result<(), SchedulerError> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)
                .map_err(backend)?;
            for item in items {
                let line = serde_json::to_string(item).map_err(backend)?;
                writeln!(file, "{line}").map_err(backend)?;
            }
            file.sync_all().map_err(backend)?;
            fs::rename(&tmp, self.file_path(source)).map_err(backend)
        };
        let result = write();
        if result.is_err() && tmp.is_file() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }

    /// Compute `source`'s queue after the edit, persist it, then swap it in.
    fn commit_edit(
        &mut self,
        source: &str,
        edit: impl FnOnce(&mut VecDeque<WorkItem>),
    ) -> Result<(), SchedulerError> {
        let mut next = self.queues.get(source).cloned().unwrap_or_default();
        edit(&mut next);
        self.rewrite_disk(source, &next)?;
        self.queues.insert(source.to_string(), next);
        Ok(())
    }
}

impl QueueStore for FileQueueStore {
    fn enqueue(&mut self, source: &str, item: WorkItem) -> Result<(), SchedulerError> {
        self.append_to_disk(source, &item)?;
        self.queues
            .entry(source.to_string())
            .or_default()
            .push_back(item);
        Ok(())
    }

    fn peek_all(&self, source: &str) -> Result<Vec<WorkItem>, SchedulerError> {
        Ok(self
            .queues
            .get(source)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn remove_prefix(
        &mut self,
        source: &str,
        count: usize,
    ) -> Result<Vec<WorkItem>, SchedulerError> {
        self.replace_front(source, count, Vec::new())
    }

    fn push_front(&mut self, source: &str, items: Vec<WorkItem>) -> Result<(), SchedulerError> {
        self.commit_edit(source, |queue| {
            for item in items.into_iter().rev() {
                queue.push_front(item);
            }
        })
    }

    fn len(&self, source: &str) -> usize {
        self.queues.get(source).map_or(0, VecDeque::len)
    }

    fn sources(&self) -> Vec<SourceId> {
        self.queues.keys().cloned().collect()
    }

    fn clear(&mut self, source: &str) -> Result<usize, SchedulerError> {
        let path = self.file_path(source);
        if path.exists() {
            fs::remove_file(path).map_err(backend)?;
        }
        Ok(self.queues.remove(source).map_or(0, |q| q.len()))
    }

    fn replace_front(
        &mut self,
        source: &str,
        count: usize,
        restore: Vec<WorkItem>,
    ) -> Result<Vec<WorkItem>, SchedulerError> {
        if !self.queues.contains_key(source) && restore.is_empty() {
            return Ok(Vec::new());
        }
        let mut removed = Vec::new();
        self.commit_edit(source, |queue| {
            let count = count.min(queue.len());
            removed = queue.drain(..count).collect();
            for item in restore.into_iter().rev() {
                queue.push_front(item);
            }
        })?;
        Ok(removed)
    }
}
