//! Shard storage for one metric.
//!
//! A shard is a directory `basePath/db/ns/metric/` holding an append-only
//! JSON-lines log plus the in-memory view replayed from it. Appends are
//! buffered and become visible (and durable) on [`ShardStore::flush`];
//! deletes rewrite the log through a temporary file.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use nsdb_lib::Bit;

use crate::error::StoreError;

const LOG_FILE: &str = "bits.log";

pub struct ShardStore {
    root: PathBuf,
    committed: Vec<Bit>,
    pending: Vec<Bit>,
}

impl ShardStore {
    /// Opens the shard rooted at `root`, creating the directory when absent
    /// and replaying any existing log.
    pub fn open(root: impl Into<PathBuf>) -> Result<ShardStore, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let log = root.join(LOG_FILE);
        let mut committed = Vec::new();
        if log.exists() {
            let reader = BufReader::new(File::open(&log)?);
            for (number, line) in reader.lines().enumerate() {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                let bit = serde_json::from_str(&line).map_err(|error| StoreError::Corrupt {
                    path: log.clone(),
                    reason: format!("line {}: {error}", number + 1),
                })?;
                committed.push(bit);
            }
        }
        Ok(ShardStore {
            root,
            committed,
            pending: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Buffers a record; it becomes visible on the next flush.
    pub fn append(&mut self, bit: Bit) {
        self.pending.push(bit);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Indexed record count, excluding buffered appends.
    pub fn count(&self) -> u64 {
        self.committed.len() as u64
    }

    /// Persists the buffered appends. Idempotent when the buffer is empty.
    pub fn flush(&mut self) -> Result<usize, StoreError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(LOG_FILE))?;
        let mut writer = BufWriter::new(file);
        for bit in &self.pending {
            serde_json::to_writer(&mut writer, bit)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        let flushed = self.pending.len();
        self.committed.append(&mut self.pending);
        Ok(flushed)
    }

    /// Removes every committed record identical to `bit`; returns how many
    /// went away.
    pub fn delete(&mut self, bit: &Bit) -> Result<usize, StoreError> {
        self.delete_matching(|candidate| candidate == bit)
    }

    pub fn delete_matching(
        &mut self,
        predicate: impl Fn(&Bit) -> bool,
    ) -> Result<usize, StoreError> {
        let before = self.committed.len();
        self.committed.retain(|candidate| !predicate(candidate));
        let removed = before - self.committed.len();
        if removed > 0 {
            self.rewrite()?;
        }
        Ok(removed)
    }

    pub fn query(&self, predicate: impl Fn(&Bit) -> bool) -> Vec<Bit> {
        self.committed
            .iter()
            .filter(|bit| predicate(bit))
            .cloned()
            .collect()
    }

    /// Erases the whole shard directory.
    pub fn destroy(self) -> Result<(), StoreError> {
        fs::remove_dir_all(&self.root)?;
        Ok(())
    }

    fn rewrite(&self) -> Result<(), StoreError> {
        let tmp = self.root.join(format!("{LOG_FILE}.tmp"));
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for bit in &self.committed {
                serde_json::to_writer(&mut writer, bit)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(tmp, self.root.join(LOG_FILE))?;
        Ok(())
    }
}
