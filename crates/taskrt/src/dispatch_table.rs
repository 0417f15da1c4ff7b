//! Persisted dispatch decisions.
//!
//! The on-disk format is plain text: a header line holding the space-separated symbol names,
//! followed by one row per resolved key (the key values, then the chosen candidate index).
//! Rows are only ever appended, so a crash can at worst leave a truncated final row, which the
//! next load reports as corruption.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{TaskError, TaskResult};
use crate::shape_key::DispatchKey;

pub const DISPATCH_TABLE_FILE: &str = "dispatch_table.txt";

#[derive(Debug)]
pub struct DispatchTable {
    path: PathBuf,
    symbols: Vec<String>,
    entries: HashMap<DispatchKey, usize>,
}

impl DispatchTable {
    /// Loads the table at `path`. A missing file yields an empty table.
    ///
    /// A malformed row deletes the file and fails with [`TaskError::CorruptState`]; loading
    /// again afterwards starts from an empty table.
    pub fn load(path: impl Into<PathBuf>, symbols: &[String]) -> TaskResult<Self> {
        let path = path.into();
        let mut table = Self {
            path,
            symbols: symbols.to_vec(),
            entries: HashMap::new(),
        };

        let contents = match fs::read_to_string(&table.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(table),
            Err(err) => return Err(TaskError::io(table.path, err)),
        };

        let expected = symbols.len() + 1;
        // The header is informational and never checked against the symbol list.
        for (line_idx, line) in contents.lines().enumerate().skip(1) {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            if tokens.len() != expected {
                return Err(discard_corrupt(
                    &table.path,
                    line_idx + 1,
                    format!("expected {expected} tokens, found {}", tokens.len()),
                ));
            }
            let (key_tokens, index_token) = tokens.split_at(symbols.len());
            let key = key_tokens
                .iter()
                .map(|token| token.parse::<i64>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| {
                    discard_corrupt(&table.path, line_idx + 1, format!("bad key value: {err}"))
                })?;
            let index = index_token[0].parse::<usize>().map_err(|err| {
                discard_corrupt(
                    &table.path,
                    line_idx + 1,
                    format!("bad candidate index '{}': {err}", index_token[0]),
                )
            })?;
            // Duplicate rows for one key are tolerated; the last one read wins.
            table.entries.insert(DispatchKey::from(key), index);
        }

        tracing::debug!(
            path = %table.path.display(),
            entries = table.entries.len(),
            "loaded dispatch table"
        );
        Ok(table)
    }

    /// Like [`DispatchTable::load`], but a corrupt file is replaced by an empty table instead
    /// of failing the load.
    pub fn load_or_reset(path: impl Into<PathBuf>, symbols: &[String]) -> TaskResult<Self> {
        let path = path.into();
        match Self::load(path.clone(), symbols) {
            Err(TaskError::CorruptState { .. }) => Ok(Self {
                path,
                symbols: symbols.to_vec(),
                entries: HashMap::new(),
            }),
            other => other,
        }
    }

    pub fn lookup(&self, key: &DispatchKey) -> Option<usize> {
        self.entries.get(key).copied()
    }

    /// Records a decision in memory and appends it to the backing file, writing the header
    /// first if the file does not exist yet.
    pub fn record(&mut self, key: DispatchKey, index: usize) -> TaskResult<()> {
        let mut row = String::new();
        if !self.path.exists() {
            row.push_str(&self.symbols.join(" "));
            row.push('\n');
        }
        for value in key.values() {
            row.push_str(&value.to_string());
            row.push(' ');
        }
        row.push_str(&index.to_string());
        row.push('\n');

        self.entries.insert(key, index);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| TaskError::io(&self.path, err))?;
        // One write per row keeps rows whole under a single writer.
        file.write_all(row.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| TaskError::io(&self.path, err))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all entries sorted by key.
    pub fn entries(&self) -> Vec<(DispatchKey, usize)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(key, index)| (key.clone(), *index))
            .collect();
        entries.sort();
        entries
    }
}

fn discard_corrupt(path: &Path, line: usize, reason: String) -> TaskError {
    match fs::remove_file(path) {
        Ok(()) => tracing::warn!(
            path = %path.display(),
            line,
            reason = %reason,
            "deleted corrupt dispatch table"
        ),
        Err(err) => tracing::warn!(
            path = %path.display(),
            line,
            error = %err,
            "failed to delete corrupt dispatch table"
        ),
    }
    TaskError::CorruptState {
        path: path.to_path_buf(),
        line,
        reason,
    }
}
