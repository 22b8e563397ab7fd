//! Replays a JSON-lines change log as a change-capture source.
//!
//! Every non-empty line is one serialized [`ChangeRecord`]. The engine stamps
//! each record's offset with its line number and, when a checkpoint manager
//! is configured, persists the offset of every committed batch so a restart
//! resumes after the last committed line.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace};

use super::{ChangeEngine, ChangeRecord, PollResult, SourceOffset};
use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::{Error, Result};

const LINE_FIELD: &str = "line";

pub struct ReplayEngine {
    path: PathBuf,
    batch_size: usize,
    follow: bool,
    checkpoints: Option<CheckpointManager>,
    reader: Option<BufReader<File>>,
    line: u64,
    resume_after: u64,
    committed: u64,
    /// Line numbers of delivered records not yet covered by a commit.
    in_flight: VecDeque<u64>,
    /// A bad line found after some valid records; reported on the next poll.
    deferred: Option<Error>,
}

impl ReplayEngine {
    pub fn new(path: impl AsRef<Path>, batch_size: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            batch_size: batch_size.max(1),
            follow: false,
            checkpoints: None,
            reader: None,
            line: 0,
            resume_after: 0,
            committed: 0,
            in_flight: VecDeque::new(),
            deferred: None,
        }
    }

    pub fn with_checkpoints(mut self, manager: CheckpointManager) -> Self {
        self.checkpoints = Some(manager);
        self
    }

    /// Keep waiting for appended lines at end of file instead of ending the
    /// source.
    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    fn read_batch(&mut self) -> Result<Vec<ChangeRecord>> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(Error::EngineRuntime("replay engine is not started".to_string()));
        };

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut buf = String::new();

        while batch.len() < self.batch_size {
            buf.clear();
            let line_start = reader.stream_position()?;
            if reader.read_line(&mut buf)? == 0 {
                break;
            }
            if self.follow && !buf.ends_with('\n') {
                // The writer has not finished this line yet.
                reader.seek(SeekFrom::Start(line_start))?;
                trace!(line = self.line + 1, "Partial line at end of file, retrying later");
                break;
            }
            self.line += 1;

            let text = buf.trim();
            if text.is_empty() || self.line <= self.resume_after {
                continue;
            }

            let mut record: ChangeRecord = match serde_json::from_str(text) {
                Ok(record) => record,
                Err(e) => {
                    let error = Error::EngineRuntime(format!(
                        "{}:{}: invalid change record: {}",
                        self.path.display(),
                        self.line,
                        e
                    ));
                    if batch.is_empty() {
                        return Err(error);
                    }
                    self.deferred = Some(error);
                    break;
                }
            };
            record.offset.0.insert(LINE_FIELD.to_string(), self.line.into());
            self.in_flight.push_back(self.line);
            batch.push(record);
        }

        Ok(batch)
    }
}

impl ChangeEngine for ReplayEngine {
    fn start(&mut self) -> Result<()> {
        let file = File::open(&self.path).map_err(|e| {
            Error::EngineStartup(format!("cannot open {}: {}", self.path.display(), e))
        })?;
        self.reader = Some(BufReader::new(file));

        if let Some(manager) = &self.checkpoints {
            let checkpoint = manager
                .load()
                .map_err(|e| Error::EngineStartup(format!("cannot load checkpoint: {}", e)))?;
            if let Some(checkpoint) = checkpoint {
                self.resume_after = checkpoint
                    .offset
                    .get(LINE_FIELD)
                    .and_then(|line| line.as_u64())
                    .unwrap_or(0);
                self.committed = checkpoint.record_count;
            }
        }

        info!(
            path = %self.path.display(),
            resume_after = self.resume_after,
            "Replay engine started"
        );
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<PollResult> {
        if let Some(error) = self.deferred.take() {
            return Err(error);
        }

        let batch = self.read_batch()?;
        if !batch.is_empty() {
            return Ok(PollResult::Records(batch));
        }

        if self.follow {
            thread::sleep(timeout);
            Ok(PollResult::Idle)
        } else {
            Ok(PollResult::Exhausted)
        }
    }

    fn commit(&mut self, offset: &SourceOffset) -> Result<()> {
        let Some(manager) = &self.checkpoints else {
            return Ok(());
        };

        let line = offset
            .get(LINE_FIELD)
            .and_then(|line| line.as_u64())
            .unwrap_or(self.line);
        while self.in_flight.front().is_some_and(|&delivered| delivered <= line) {
            self.in_flight.pop_front();
            self.committed += 1;
        }
        self.resume_after = line;

        manager.save(&Checkpoint::new(offset.clone(), self.committed))?;
        debug!(line, "Replay offset committed");
        Ok(())
    }

    fn close(&mut self) {
        if self.reader.take().is_none() {
            debug!(path = %self.path.display(), "Replay engine closed before it was started");
        }
    }
}
