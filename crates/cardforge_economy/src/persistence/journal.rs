//! # Ledger Journal
//!
//! **Crash-Safe Append-Only Store**
//!
//! Every committed [`WriteBatch`] is appended as one framed transaction and
//! fsynced before `commit` returns. On open the journal is replayed:
//! - committed batches: applied to the in-memory index
//! - a torn batch at the tail (crash mid-append): discarded and truncated
//!
//! ## Format
//!
//! ```text
//! [4 bytes: magic "CFJL"]
//! [4 bytes: version]
//! [8 bytes: reserved]
//!
//! Frame format:
//! [8 bytes: LSN (Log Sequence Number)]
//! [1 byte: frame type (BEGIN/RECORD/COMMIT)]
//! [4 bytes: payload length]
//! [N bytes: payload]
//! [4 bytes: CRC32 of above]
//!
//! RECORD payload: [8 bytes: expected version][encoded record]
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::codec;
use super::memory::RecordTable;
use super::{run_hook, AccountHook, PersistError, PersistResult, Persistence, Record, RecordKey, WriteBatch};
use crate::model::Versioned;

/// Magic bytes identifying a journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"CFJL";

/// Current journal format version.
const JOURNAL_VERSION: u32 = 2;

/// Header size in bytes.
const HEADER_LEN: u64 = 16;

/// Frame overhead: LSN + type + length + CRC.
const FRAME_OVERHEAD: u64 = 8 + 1 + 4 + 4;

/// Journal frame types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum FrameType {
    /// Start of a batch.
    Begin = 1,
    /// One write of the batch.
    Record = 2,
    /// The batch is durable.
    Commit = 3,
}

impl FrameType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Begin),
            2 => Some(Self::Record),
            3 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// The append handle and the length of its durable prefix.
struct JournalFile {
    file: File,
    len: u64,
    /// Set when a failed append could not be cut back off the file.
    failed: bool,
}

/// A frame read back from disk.
struct Frame {
    lsn: u64,
    frame_type: FrameType,
    payload: Vec<u8>,
}

/// File-backed [`Persistence`].
pub struct JournalStore {
    /// Path to the journal file.
    path: PathBuf,
    /// Next Log Sequence Number.
    next_lsn: AtomicU64,
    /// Append handle; holding it serializes commits.
    file: Mutex<JournalFile>,
    /// Latest version of every record.
    index: RwLock<RecordTable>,
    /// Committed batches.
    commits: AtomicU64,
    hook: Option<Box<dyn AccountHook>>,
}

impl JournalStore {
    /// Opens or creates a journal, replaying committed batches.
    ///
    /// # Errors
    ///
    /// Returns `PersistError::Io` if the file cannot be opened and
    /// `PersistError::Corrupt` if the header is not a journal header.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| PersistError::Io(format!("failed to open journal: {e}")))?;

        let len = file
            .metadata()
            .map_err(|e| PersistError::Io(format!("failed to stat journal: {e}")))?
            .len();

        if len == 0 {
            let mut header = Vec::with_capacity(16);
            header.extend_from_slice(JOURNAL_MAGIC);
            header.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
            header.extend_from_slice(&0u64.to_le_bytes());
            file.write_all(&header).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }

        let store = Self {
            path,
            next_lsn: AtomicU64::new(0),
            file: Mutex::new(JournalFile {
                file,
                len: len.max(HEADER_LEN),
                failed: false,
            }),
            index: RwLock::new(RecordTable::default()),
            commits: AtomicU64::new(0),
            hook: None,
        };
        store.replay()?;
        Ok(store)
    }

    /// Installs the account pipeline step.
    #[must_use]
    pub fn with_hook(mut self, hook: impl AccountHook + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Number of batches committed or replayed.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Acquire)
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rebuilds the index from disk and truncates any torn tail.
    fn replay(&self) -> PersistResult<()> {
        let file = File::open(&self.path)
            .map_err(|e| PersistError::Io(format!("failed to open journal for replay: {e}")))?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| PersistError::Corrupt(format!("journal header unreadable: {e}")))?;
        if &magic != JOURNAL_MAGIC {
            return Err(PersistError::Corrupt("invalid journal magic".to_string()));
        }
        let mut version = [0u8; 4];
        let mut reserved = [0u8; 8];
        reader
            .read_exact(&mut version)
            .and_then(|()| reader.read_exact(&mut reserved))
            .map_err(|e| PersistError::Corrupt(format!("journal header unreadable: {e}")))?;
        let version = u32::from_le_bytes(version);
        if version != JOURNAL_VERSION {
            return Err(PersistError::Corrupt(format!(
                "unsupported journal version: {version}"
            )));
        }

        let mut index = self.index.write();
        let mut pending: Option<WriteBatch> = None;
        let mut durable_len = HEADER_LEN;
        let mut offset = HEADER_LEN;
        let mut max_lsn = None;
        let mut commits = 0u64;

        while let Some(frame) = Self::read_frame(&mut reader) {
            offset += FRAME_OVERHEAD + frame.payload.len() as u64;
            max_lsn = Some(frame.lsn);

            match frame.frame_type {
                FrameType::Begin => pending = Some(WriteBatch::new()),
                FrameType::Record => {
                    let Some(batch) = pending.as_mut() else {
                        break;
                    };
                    if frame.payload.len() < 8 {
                        break;
                    }
                    let (version, body) = frame.payload.split_at(8);
                    let Ok(record) = codec::decode(body) else {
                        break;
                    };
                    let mut expected = [0u8; 8];
                    expected.copy_from_slice(version);
                    batch.put(u64::from_le_bytes(expected), record);
                }
                FrameType::Commit => {
                    let Some(batch) = pending.take() else {
                        break;
                    };
                    index.apply(&batch);
                    commits += 1;
                    durable_len = offset;
                }
            }
        }

        let mut journal = self.file.lock();
        if journal.len > durable_len {
            tracing::warn!(
                path = %self.path.display(),
                discarded_bytes = journal.len - durable_len,
                "journal replay: torn batch discarded"
            );
            journal.file.set_len(durable_len).map_err(io_err)?;
            journal.file.sync_all().map_err(io_err)?;
        }
        journal.len = durable_len;

        self.next_lsn.store(max_lsn.map_or(0, |lsn| lsn + 1), Ordering::SeqCst);
        self.commits.store(commits, Ordering::Release);
        tracing::info!(path = %self.path.display(), commits, "journal replayed");
        Ok(())
    }

    /// Reads one frame; `None` at end of file or on any damage.
    fn read_frame(reader: &mut BufReader<File>) -> Option<Frame> {
        let mut lsn_bytes = [0u8; 8];
        reader.read_exact(&mut lsn_bytes).ok()?;
        let mut type_byte = [0u8; 1];
        reader.read_exact(&mut type_byte).ok()?;
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes).ok()?;
        let payload_len = u32::from_le_bytes(len_bytes) as usize;

        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload).ok()?;
        let mut crc_bytes = [0u8; 4];
        reader.read_exact(&mut crc_bytes).ok()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn_bytes);
        hasher.update(&type_byte);
        hasher.update(&len_bytes);
        hasher.update(&payload);
        if hasher.finalize() != u32::from_le_bytes(crc_bytes) {
            return None;
        }

        Some(Frame {
            lsn: u64::from_le_bytes(lsn_bytes),
            frame_type: FrameType::from_u8(type_byte[0])?,
            payload,
        })
    }

    /// Encodes one frame into `buf`.
    fn encode_frame(&self, buf: &mut Vec<u8>, frame_type: FrameType, payload: &[u8]) -> PersistResult<()> {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);
        let len = u32::try_from(payload.len())
            .map_err(|_| PersistError::Io("journal frame too large".to_string()))?;

        let start = buf.len();
        buf.extend_from_slice(&lsn.to_le_bytes());
        buf.push(frame_type as u8);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(payload);
        let crc = crc32fast::hash(&buf[start..]);
        buf.extend_from_slice(&crc.to_le_bytes());
        Ok(())
    }
}

impl Persistence for JournalStore {
    fn load(&self, key: RecordKey) -> PersistResult<Option<Versioned<Record>>> {
        Ok(self.index.read().get(key))
    }

    fn scan(&self) -> PersistResult<Vec<Versioned<Record>>> {
        Ok(self.index.read().all())
    }

    fn commit(&self, batch: &WriteBatch, timeout: Duration) -> PersistResult<u64> {
        let mut file = self.file.try_lock_for(timeout).ok_or(PersistError::Timeout)?;
        if file.failed {
            return Err(PersistError::Io(
                "journal has an unrecoverable partial write; reopen it to replay".to_string(),
            ));
        }

        // The file lock serializes commits, so the index cannot move between
        // this check and the apply below.
        self.index.read().check(batch)?;
        run_hook(self.hook.as_deref(), batch)?;

        let mut buf = Vec::with_capacity(64 + batch.len() * 192);
        self.encode_frame(&mut buf, FrameType::Begin, &[])?;
        for write in batch.writes() {
            let mut payload = write.expected_version.to_le_bytes().to_vec();
            payload.extend_from_slice(&codec::encode(&write.record));
            self.encode_frame(&mut buf, FrameType::Record, &payload)?;
        }
        self.encode_frame(&mut buf, FrameType::Commit, &[])?;

        if let Err(e) = file.file.write_all(&buf).and_then(|()| file.file.sync_data()) {
            // Cut the partial batch off so later appends stay replayable.
            let durable = file.len;
            if let Err(cleanup) = file.file.set_len(durable).and_then(|()| file.file.sync_all()) {
                file.failed = true;
                tracing::error!(
                    path = %self.path.display(),
                    durable_len = durable,
                    error = %cleanup,
                    "journal: partial batch could not be truncated, refusing further commits"
                );
            }
            return Err(io_err(e));
        }
        file.len += buf.len() as u64;

        self.index.write().apply(batch);
        Ok(self.commits.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

fn io_err(e: std::io::Error) -> PersistError {
    PersistError::Io(e.to_string())
}
