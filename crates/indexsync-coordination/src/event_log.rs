//! Event logs carrying change records between processes.
//!
//! A log is an append-only sequence of [`ChangeRecord`]s addressed by
//! offset, plus a committed offset per named consumer. Consumers read from
//! their committed offset and commit after processing, so every record is
//! processed at least once.
//!
//! - [`MemoryEventLog`]: shared in-process log, for tests and embedded use.
//! - [`FileEventLog`]: JSON lines on disk, with consumer offsets in a
//!   sidecar file (`<log>.offsets.json`).

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use indexsync_core::{ChangeRecord, Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};

/// A record and its position in the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Position of the record.
    pub offset: u64,
    /// The record.
    pub record: ChangeRecord,
}

/// Append-only log of change records with per-consumer offsets.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends records; returns the offset following the last one.
    async fn append(&self, records: &[ChangeRecord]) -> Result<u64>;

    /// Reads up to `max` records starting at `offset`.
    async fn read(&self, offset: u64, max: usize) -> Result<Vec<LogEntry>>;

    /// Offset following the last record.
    async fn end_offset(&self) -> Result<u64>;

    /// Offset a consumer resumes from (0 if it never committed).
    async fn committed(&self, consumer: &str) -> Result<u64>;

    /// Records that a consumer processed everything before `offset`.
    async fn commit(&self, consumer: &str, offset: u64) -> Result<()>;
}

// ============================================================================
// MemoryEventLog
// ============================================================================

#[derive(Debug, Default)]
struct MemoryLogState {
    records: Vec<ChangeRecord>,
    offsets: BTreeMap<String, u64>,
}

/// Event log held in memory.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    state: Mutex<MemoryLogState>,
}

impl MemoryEventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryLogState>> {
        self.state
            .lock()
            .map_err(|_| Error::backend("event log lock poisoned"))
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, records: &[ChangeRecord]) -> Result<u64> {
        let mut state = self.lock()?;
        state.records.extend_from_slice(records);
        Ok(state.records.len() as u64)
    }

    async fn read(&self, offset: u64, max: usize) -> Result<Vec<LogEntry>> {
        let state = self.lock()?;
        Ok(state
            .records
            .iter()
            .enumerate()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(max)
            .map(|(i, record)| LogEntry {
                offset: i as u64,
                record: record.clone(),
            })
            .collect())
    }

    async fn end_offset(&self) -> Result<u64> {
        Ok(self.lock()?.records.len() as u64)
    }

    async fn committed(&self, consumer: &str) -> Result<u64> {
        Ok(self.lock()?.offsets.get(consumer).copied().unwrap_or(0))
    }

    async fn commit(&self, consumer: &str, offset: u64) -> Result<()> {
        self.lock()?.offsets.insert(consumer.to_string(), offset);
        Ok(())
    }
}

// ============================================================================
// FileEventLog
// ============================================================================

/// Byte positions of the complete lines seen so far.
#[derive(Debug, Default)]
struct LineIndex {
    starts: Vec<u64>,
    /// End of the last complete line.
    scanned: u64,
}

/// Event log stored as JSON lines.
///
/// Appends and commits from this process are serialized; the file may be
/// read by consumers in other processes. Only lines appended since the last
/// call are scanned, and reads seek straight to the requested record.
///
/// A line that does not parse (for example the tail of an append torn by a
/// crash) is logged and skipped; it still occupies its offset.
#[derive(Debug)]
pub struct FileEventLog {
    path: PathBuf,
    offsets_path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
    index: tokio::sync::Mutex<LineIndex>,
}

impl FileEventLog {
    /// Opens (or prepares to create) a log at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_with_path(e, parent))?;
        }
        let mut offsets_name = path.file_name().unwrap_or_default().to_os_string();
        offsets_name.push(".offsets.json");
        let offsets_path = path.with_file_name(offsets_name);
        Ok(Self {
            path,
            offsets_path,
            write_lock: tokio::sync::Mutex::new(()),
            index: tokio::sync::Mutex::new(LineIndex::default()),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the consumer offsets file.
    pub fn offsets_path(&self) -> &Path {
        &self.offsets_path
    }

    async fn open_for_read(&self) -> Result<Option<tokio::fs::File>> {
        match tokio::fs::File::open(&self.path).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io_with_path(e, &self.path)),
        }
    }

    /// Indexes the complete lines appended since the last scan. A trailing
    /// line without its newline is left for a later scan.
    async fn scan(&self, index: &mut LineIndex) -> Result<()> {
        let Some(mut file) = self.open_for_read().await? else {
            return Ok(());
        };
        let io = |e: std::io::Error| Error::io_with_path(e, &self.path);
        file.seek(SeekFrom::Start(index.scanned)).await.map_err(io)?;

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line).await.map_err(io)?;
            if read == 0 || line.last() != Some(&b'\n') {
                break;
            }
            index.starts.push(index.scanned);
            index.scanned += read as u64;
        }
        Ok(())
    }

    async fn file_len(&self) -> Result<u64> {
        match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(Error::io_with_path(e, &self.path)),
        }
    }

    async fn read_offsets(&self) -> Result<BTreeMap<String, u64>> {
        match tokio::fs::read_to_string(&self.offsets_path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(Error::io_with_path(e, &self.offsets_path)),
        }
    }
}

#[async_trait]
impl EventLog for FileEventLog {
    async fn append(&self, records: &[ChangeRecord]) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.index.lock().await;
        self.scan(&mut index).await?;

        let mut buffer = String::new();
        // Terminate a torn tail so it stays a line of its own.
        if self.file_len().await? > index.scanned {
            log::warn!("Event log {} ends with a partial record", self.path.display());
            buffer.push('\n');
        }
        for record in records {
            buffer.push_str(&serde_json::to_string(record)?);
            buffer.push('\n');
        }

        let io = |e: std::io::Error| Error::io_with_path(e, &self.path);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io)?;
        file.write_all(buffer.as_bytes()).await.map_err(io)?;
        file.flush().await.map_err(io)?;

        self.scan(&mut index).await?;
        Ok(index.starts.len() as u64)
    }

    async fn read(&self, offset: u64, max: usize) -> Result<Vec<LogEntry>> {
        let mut index = self.index.lock().await;
        self.scan(&mut index).await?;
        let first = usize::try_from(offset).unwrap_or(usize::MAX);
        let Some(&position) = index.starts.get(first) else {
            return Ok(Vec::new());
        };
        let Some(mut file) = self.open_for_read().await? else {
            return Ok(Vec::new());
        };
        let io = |e: std::io::Error| Error::io_with_path(e, &self.path);
        file.seek(SeekFrom::Start(position)).await.map_err(io)?;

        // Skipped lines do not count towards `max`, so a run of bad lines
        // never yields an empty batch while good records follow.
        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let mut entries = Vec::new();
        for line_offset in first..index.starts.len() {
            if entries.len() >= max {
                break;
            }
            line.clear();
            if reader.read_until(b'\n', &mut line).await.map_err(io)? == 0 {
                break;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice(&line) {
                Ok(record) => entries.push(LogEntry {
                    offset: line_offset as u64,
                    record,
                }),
                Err(e) => log::error!(
                    "Skipping malformed record {line_offset} of {}: {e}",
                    self.path.display()
                ),
            }
        }
        Ok(entries)
    }

    async fn end_offset(&self) -> Result<u64> {
        let mut index = self.index.lock().await;
        self.scan(&mut index).await?;
        Ok(index.starts.len() as u64)
    }

    async fn committed(&self, consumer: &str) -> Result<u64> {
        Ok(self.read_offsets().await?.get(consumer).copied().unwrap_or(0))
    }

    async fn commit(&self, consumer: &str, offset: u64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut offsets = self.read_offsets().await?;
        offsets.insert(consumer.to_string(), offset);

        // Write then rename, so readers never see a partial file.
        let staging = self.offsets_path.with_extension("json.tmp");
        tokio::fs::write(&staging, serde_json::to_vec_pretty(&offsets)?)
            .await
            .map_err(|e| Error::io_with_path(e, &staging))?;
        tokio::fs::rename(&staging, &self.offsets_path)
            .await
            .map_err(|e| Error::io_with_path(e, &self.offsets_path))?;
        Ok(())
    }
}
