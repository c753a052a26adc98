// Rotated on-disk journal of entry batches
//
// One line per batch, one JSON array per line. Filenames sort
// chronologically because the timestamp component is zero-padded.

use crate::config::{FileProtection, PersistenceConfig};
use crate::model::LogEntry;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;
use thiserror::Error;

pub const FILE_PREFIX: &str = "porby_logs";
const FILE_EXTENSION: &str = "json";

/// Capacity of the pre-allocated crash-path write buffer.
const EMERGENCY_BUFFER_CAPACITY: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Journal encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

enum WorkerOp {
    Save(Vec<LogEntry>),
}

struct CurrentFile {
    path: Option<PathBuf>,
    /// Running size of the current file. May drift from the on-disk size
    /// after a partial write failure; rotation still occurs on the nominal
    /// crossing and the next rotation resynchronizes.
    size: u64,
}

/// Append-only rotated journal.
///
/// Regular saves run on a dedicated worker thread (the single serialized
/// persistence context); `emergency_save` runs inline on the caller thread
/// with a pre-allocated buffer and raw file primitives so the crash path
/// stays allocation- and lock-light.
pub struct Journal {
    dir: PathBuf,
    max_file_size: u64,
    max_file_count: usize,
    max_retention: std::time::Duration,
    max_replay_entries: usize,
    protection: FileProtection,
    current: Mutex<CurrentFile>,
    emergency_buf: Mutex<Vec<u8>>,
    worker_tx: Mutex<Option<mpsc::Sender<WorkerOp>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Journal {
    /// Open (creating if needed) the journal directory and start the
    /// persistence worker.
    pub fn open(config: &PersistenceConfig) -> Result<Arc<Self>, JournalError> {
        let dir = match &config.base_dir {
            Some(base) => base.join("porby").join("logs"),
            None => std::env::temp_dir().join("porby").join("logs"),
        };
        fs::create_dir_all(&dir)?;

        let journal = Arc::new(Journal {
            dir,
            max_file_size: config.max_file_size,
            max_file_count: config.max_file_count,
            max_retention: config.max_retention,
            max_replay_entries: config.max_replay_entries,
            protection: config.protection,
            current: Mutex::new(CurrentFile {
                path: None,
                size: 0,
            }),
            emergency_buf: Mutex::new(Vec::with_capacity(EMERGENCY_BUFFER_CAPACITY)),
            worker_tx: Mutex::new(None),
            worker: Mutex::new(None),
        });

        let (tx, rx) = mpsc::channel::<WorkerOp>();
        let worker_journal = Arc::clone(&journal);
        let handle = std::thread::Builder::new()
            .name("porby-journal".to_string())
            .spawn(move || {
                while let Ok(op) = rx.recv() {
                    match op {
                        WorkerOp::Save(batch) => {
                            if let Err(e) = worker_journal.save_sync(&batch) {
                                tracing::warn!("Journal save failed: {}", e);
                            }
                        }
                    }
                }
            })?;

        *journal.worker_tx.lock() = Some(tx);
        *journal.worker.lock() = Some(handle);
        Ok(journal)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hand a batch to the persistence worker. Never blocks the caller.
    pub fn queue_save(&self, batch: Vec<LogEntry>) {
        if batch.is_empty() {
            return;
        }
        let tx = self.worker_tx.lock();
        match tx.as_ref() {
            Some(tx) => {
                if tx.send(WorkerOp::Save(batch)).is_err() {
                    tracing::warn!("Journal worker is gone; batch dropped");
                }
            }
            None => tracing::warn!("Journal is shut down; batch dropped"),
        }
    }

    /// Append one batch as a single newline-terminated JSON array, rotating
    /// first when the write would cross `max_file_size`.
    pub fn save_sync(&self, batch: &[LogEntry]) -> Result<(), JournalError> {
        if batch.is_empty() {
            return Ok(());
        }
        let encoded = serde_json::to_vec(batch)?;

        let mut current = self.current.lock();
        let incoming = encoded.len() as u64 + 1;
        if current.path.is_some() && current.size + incoming > self.max_file_size {
            // Forget the current file; the next write below creates a fresh one.
            current.path = None;
            current.size = 0;
        }

        let path = match &current.path {
            Some(path) => path.clone(),
            None => {
                let path = self.fresh_file_path();
                current.path = Some(path.clone());
                current.size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                path
            }
        };

        let created = !path.exists();
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(&encoded)?;
        file.write_all(b"\n")?;
        current.size += incoming;
        drop(current);

        if created {
            self.apply_protection(&path);
        }
        self.run_retention();
        Ok(())
    }

    /// Crash-path write: inline on the caller thread, no journal lock, raw
    /// file primitives. Everything is best-effort; there is nobody left to
    /// report errors to.
    pub fn emergency_save(&self, batch: &[LogEntry]) {
        if batch.is_empty() {
            return;
        }

        // try_lock: if another thread is mid-crash the buffer is busy and a
        // fresh allocation is the lesser evil.
        let mut guard;
        let mut fallback;
        let buf: &mut Vec<u8> = match self.emergency_buf.try_lock() {
            Some(g) => {
                guard = g;
                guard.clear();
                &mut *guard
            }
            None => {
                fallback = Vec::with_capacity(EMERGENCY_BUFFER_CAPACITY);
                &mut fallback
            }
        };

        if serde_json::to_writer(&mut *buf, batch).is_err() {
            return;
        }
        buf.push(b'\n');

        let path = self.fresh_file_path();
        raw_append(&path, buf);
    }

    /// Walk files newest-first and lines newest-first, reversing each
    /// decoded batch, until `max_replay_entries` entries are gathered.
    /// Undecodable lines are skipped individually.
    pub fn load_for_replay(&self) -> Vec<LogEntry> {
        let files = self.matching_files();
        let mut out: Vec<LogEntry> = Vec::new();

        'files: for path in files.iter().rev() {
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };
            let lines: Vec<&str> = content.lines().collect();
            for line in lines.iter().rev() {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(mut batch) = serde_json::from_str::<Vec<LogEntry>>(line) else {
                    continue;
                };
                batch.reverse();
                out.extend(batch);
                if out.len() >= self.max_replay_entries {
                    break 'files;
                }
            }
        }

        out.truncate(self.max_replay_entries);
        out
    }

    /// Delete every journal file after a successful replay and forget the
    /// current-file state.
    pub fn clear_replayed_entries(&self) {
        for path in self.matching_files() {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to delete replayed journal file {:?}: {}", path, e);
            }
        }
        let mut current = self.current.lock();
        current.path = None;
        current.size = 0;
    }

    /// Delete files older than the retention window, then the oldest excess
    /// beyond `max_file_count`. Individual failures are swallowed; the next
    /// sweep retries.
    fn run_retention(&self) {
        let files = self.matching_files();
        let now = SystemTime::now();

        let mut survivors: Vec<PathBuf> = Vec::with_capacity(files.len());
        for path in files {
            let expired = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .map(|age| age > self.max_retention)
                .unwrap_or(false);
            if expired {
                let _ = fs::remove_file(&path);
            } else {
                survivors.push(path);
            }
        }

        if survivors.len() > self.max_file_count {
            let excess = survivors.len() - self.max_file_count;
            for path in survivors.into_iter().take(excess) {
                let _ = fs::remove_file(&path);
            }
        }
    }

    /// Journal files sorted ascending by filename, which is chronological
    /// by construction.
    fn matching_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.starts_with(FILE_PREFIX)
                    && p.extension().and_then(|e| e.to_str()) == Some(FILE_EXTENSION)
            })
            .collect();
        files.sort();
        files
    }

    fn fresh_file_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        self.dir
            .join(format!("{}_{}.{}", FILE_PREFIX, stamp, FILE_EXTENSION))
    }

    /// Map the configured data-at-rest class onto what this platform has.
    /// Unix gets owner-only permissions; real protection classes exist only
    /// on Apple platforms and are applied by the host shim there.
    fn apply_protection(&self, path: &Path) {
        let _ = self.protection;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
        }
        #[cfg(not(unix))]
        {
            let _ = path;
        }
    }

    /// Stop the worker and wait for queued saves to land.
    pub fn shutdown(&self) {
        let tx = self.worker_tx.lock().take();
        drop(tx);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Append `buf` to `path` using raw open/write/close so the crash path does
/// not go through buffered std I/O.
#[cfg(unix)]
fn raw_append(path: &Path, buf: &[u8]) {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return;
    };
    unsafe {
        let fd = libc::open(
            c_path.as_ptr(),
            libc::O_CREAT | libc::O_WRONLY | libc::O_APPEND,
            0o600,
        );
        if fd < 0 {
            return;
        }
        let mut written = 0usize;
        while written < buf.len() {
            let n = libc::write(
                fd,
                buf.as_ptr().add(written) as *const libc::c_void,
                buf.len() - written,
            );
            if n <= 0 {
                break;
            }
            written += n as usize;
        }
        libc::close(fd);
    }
}

#[cfg(not(unix))]
fn raw_append(path: &Path, buf: &[u8]) {
    if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) {
        let _ = file.write_all(buf);
    }
}
