//! # replog-storage
//!
//! why: persist the hard consensus state so a restart cannot forget a vote or a log entry
//! relations: restores replog-core node state, synced by the replog-agent dispatch loop
//! what: Storage trait, FileStorage implementation, InMemoryStorage for testing

use replog_core::{LogEntry, PeerId};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// durable storage for the state that must survive a crash
///
/// the protocol acts on `current_term`, `voted_for`, and the log before any
/// message leaves the node, so implementations must make these writes
/// durable before returning.
pub trait Storage {
    /// persist the current term and vote
    fn save_term_and_vote(&mut self, term: u64, voted_for: Option<&PeerId>) -> io::Result<()>;

    /// load the persisted term and vote
    fn load_term_and_vote(&self) -> io::Result<(u64, Option<PeerId>)>;

    /// persist the full log after an append or a conflict truncation
    fn save_log(&mut self, log: &[LogEntry]) -> io::Result<()>;

    /// load the persisted log (for crash recovery)
    fn load_log(&self) -> io::Result<Vec<LogEntry>>;

    /// drop all persisted state
    fn clear(&mut self) -> io::Result<()>;
}

// -- file storage implementation --

/// file-based storage using std::fs
///
/// keeps the state in a directory with two files:
/// - meta.json: term and voted_for
/// - log.json: array of log entries
pub struct FileStorage {
    /// directory holding the state files
    dir: PathBuf,
}

impl FileStorage {
    /// open a storage directory, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn meta_path(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join("log.json")
    }

    /// atomic write: temp file, fsync, rename over the target
    fn write_atomic(&self, name: &str, target: PathBuf, payload: &str) -> io::Result<()> {
        let temp_path = self.dir.join(name);
        let mut file = File::create(&temp_path)?;
        file.write_all(payload.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, target)?;
        Ok(())
    }
}

/// metadata file layout for term and vote
#[derive(serde::Serialize, serde::Deserialize, Default)]
struct MetaData {
    term: u64,
    voted_for: Option<PeerId>,
}

impl Storage for FileStorage {
    fn save_term_and_vote(&mut self, term: u64, voted_for: Option<&PeerId>) -> io::Result<()> {
        let meta = MetaData {
            term,
            voted_for: voted_for.cloned(),
        };
        let json = serde_json::to_string_pretty(&meta)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.write_atomic("meta.tmp", self.meta_path(), &json)
    }

    fn load_term_and_vote(&self) -> io::Result<(u64, Option<PeerId>)> {
        let path = self.meta_path();
        if !path.exists() {
            return Ok((0, None)); // default for new nodes
        }

        let mut file = File::open(&path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let meta: MetaData = serde_json::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok((meta.term, meta.voted_for))
    }

    fn save_log(&mut self, log: &[LogEntry]) -> io::Result<()> {
        // rewriting the whole file keeps truncation and append one code path;
        // an append-only segment file would be the next step if this write
        // ever shows up in profiles
        let json = serde_json::to_string_pretty(log)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.write_atomic("log.tmp", self.log_path(), &json)
    }

    fn load_log(&self) -> io::Result<Vec<LogEntry>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut file = File::open(&path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let log: Vec<LogEntry> = serde_json::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok(log)
    }

    fn clear(&mut self) -> io::Result<()> {
        let _ = fs::remove_file(self.meta_path());
        let _ = fs::remove_file(self.log_path());
        Ok(())
    }
}

// -- in-memory storage implementation --

/// in-memory storage for tests and the non-durable reference setup
#[derive(Default)]
pub struct InMemoryStorage {
    term: u64,
    voted_for: Option<PeerId>,
    log: Vec<LogEntry>,
}

impl InMemoryStorage {
    /// create an empty in-memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn save_term_and_vote(&mut self, term: u64, voted_for: Option<&PeerId>) -> io::Result<()> {
        self.term = term;
        self.voted_for = voted_for.cloned();
        Ok(())
    }

    fn load_term_and_vote(&self) -> io::Result<(u64, Option<PeerId>)> {
        Ok((self.term, self.voted_for.clone()))
    }

    fn save_log(&mut self, log: &[LogEntry]) -> io::Result<()> {
        self.log = log.to_vec();
        Ok(())
    }

    fn load_log(&self) -> io::Result<Vec<LogEntry>> {
        Ok(self.log.clone())
    }

    fn clear(&mut self) -> io::Result<()> {
        self.term = 0;
        self.voted_for = None;
        self.log.clear();
        Ok(())
    }
}
