use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::RunStoreError;
use crate::schema::{RunRecord, RUN_RECORD_VERSION};

pub const RUNS_FILE_NAME: &str = "runs.jsonl";

/// Append-only JSONL file of run records.
pub struct RunStore {
    path: PathBuf,
    file: File,
}

impl RunStore {
    /// Open `path` for appending, creating it and its parent directories.
    pub fn open(path: &Path) -> Result<Self, RunStoreError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|source| RunStoreError::io("creating run directory", parent, source))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| RunStoreError::io("opening run file for append", path, source))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Open `<dir>/runs.jsonl`.
    pub fn in_dir(dir: &Path) -> Result<Self, RunStoreError> {
        Self::open(&dir.join(RUNS_FILE_NAME))
    }

    pub fn append(&mut self, record: &RunRecord) -> Result<(), RunStoreError> {
        let mut line =
            serde_json::to_string(record).map_err(|source| RunStoreError::JsonSerialize {
                path: self.path.clone(),
                source,
            })?;
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|source| RunStoreError::io("appending run record", &self.path, source))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate every record in `path`. Blank lines are skipped.
    pub fn load(path: &Path) -> Result<Vec<RunRecord>, RunStoreError> {
        let file = File::open(path)
            .map_err(|source| RunStoreError::io("opening run file", path, source))?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        let mut seen = HashSet::new();
        for (line_index, line_result) in reader.lines().enumerate() {
            let line_number = line_index + 1;
            let line =
                line_result.map_err(|source| RunStoreError::io_line(path, line_number, source))?;
            if line.trim().is_empty() {
                continue;
            }

            let record = serde_json::from_str::<RunRecord>(&line)
                .map_err(|source| RunStoreError::json_line(path, line_number, source))?;
            validate_record(path, line_number, &record)?;
            if !seen.insert(record.run_id.clone()) {
                return Err(RunStoreError::DuplicateRunId {
                    path: path.to_path_buf(),
                    line: line_number,
                    run_id: record.run_id,
                });
            }
            records.push(record);
        }

        Ok(records)
    }
}

fn validate_record(path: &Path, line_number: usize, record: &RunRecord) -> Result<(), RunStoreError> {
    if record.version != RUN_RECORD_VERSION {
        return Err(RunStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            line: line_number,
            found: record.version,
        });
    }
    if Uuid::parse_str(&record.run_id).is_err() {
        return Err(RunStoreError::InvalidRunId {
            path: path.to_path_buf(),
            line: line_number,
            value: record.run_id.clone(),
        });
    }
    if OffsetDateTime::parse(&record.created_at, &Rfc3339).is_err() {
        return Err(RunStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            line: line_number,
            value: record.created_at.clone(),
        });
    }
    Ok(())
}
