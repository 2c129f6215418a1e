//! Durable document storage
//!
//! Two JSON documents back the store: `universe.json` (the branch tree and
//! the people) and `catalogue.json` (the function catalogue). Writes go
//! through a temp/backup rotation so a crash at any point leaves either the
//! previous or the new generation valid on disk, and loading falls back to
//! the backup when the live file is unreadable.

use crate::catalogue::Catalogue;
use crate::error::{Result, StoreError};
use crate::tree::Universe;
use parking_lot::{Mutex, RwLock};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

const UNIVERSE_FILE: &str = "universe";
const CATALOGUE_FILE: &str = "catalogue";

/// The in-memory working set plus the directory it persists to.
pub struct Documents {
    pub universe: RwLock<Universe>,
    pub catalogue: RwLock<Catalogue>,
    dir: PathBuf,
}

impl Documents {
    /// Load both documents from `dir`, seeding missing ones.
    ///
    /// A brand-new directory yields a universe with a lone root branch
    /// named `root` and an empty catalogue.
    pub fn load(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let universe = load_one(dir, UNIVERSE_FILE)?
            .unwrap_or_else(|| {
                info!(dir = %dir.display(), "no universe document, bootstrapping an empty tree");
                Universe::bootstrap("root")
            });
        let catalogue = load_one(dir, CATALOGUE_FILE)?.unwrap_or_default();
        Ok(Self {
            universe: RwLock::new(universe),
            catalogue: RwLock::new(catalogue),
            dir: dir.to_path_buf(),
        })
    }

    /// Write both documents to disk through the rotation protocol.
    pub fn flush(&self) -> Result<()> {
        rotate_write(&self.dir, UNIVERSE_FILE, &*self.universe.read())?;
        rotate_write(&self.dir, CATALOGUE_FILE, &*self.catalogue.read())?;
        debug!(dir = %self.dir.display(), "documents flushed");
        Ok(())
    }
}

fn live_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.json"))
}

fn backup_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.bk.json"))
}

fn temp_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.temp.json"))
}

fn load_one<T: DeserializeOwned>(dir: &Path, stem: &str) -> Result<Option<T>> {
    match read_json(&live_path(dir, stem)) {
        Ok(Some(doc)) => Ok(Some(doc)),
        // a crash between the two renames leaves only the backup behind
        Ok(None) => match read_json(&backup_path(dir, stem))? {
            Some(doc) => {
                warn!(stem, "live document missing, recovered the backup generation");
                Ok(Some(doc))
            }
            None => Ok(None),
        },
        Err(err) => {
            warn!(stem, %err, "live document unreadable, trying the backup");
            match read_json(&backup_path(dir, stem))? {
                Some(doc) => Ok(Some(doc)),
                None => Err(err),
            }
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StoreError::Io(err)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Write `doc` as the new live generation for `stem`.
///
/// Order matters: the new content lands fully in the temp file before any
/// existing generation is touched, then live becomes backup, then temp
/// becomes live. A crash between the renames still leaves a loadable
/// generation behind.
fn rotate_write<T: Serialize>(dir: &Path, stem: &str, doc: &T) -> Result<()> {
    let live = live_path(dir, stem);
    let backup = backup_path(dir, stem);
    let temp = temp_path(dir, stem);

    let body = serde_json::to_vec_pretty(doc)?;
    std::fs::write(&temp, body)?;

    if backup.exists() {
        std::fs::remove_file(&backup)?;
    }
    if live.exists() {
        std::fs::rename(&live, &backup)?;
    }
    std::fs::rename(&temp, &live)?;
    Ok(())
}

/// Tuning for the debounced flush.
#[derive(Debug, Clone)]
pub struct SaverConfig {
    /// Pending mutations that force an immediate flush.
    pub flush_threshold: u32,
    /// Quiet period before a scheduled flush fires.
    pub debounce: Duration,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 8,
            debounce: Duration::from_secs(2),
        }
    }
}

#[derive(Default)]
struct SaverState {
    pending: u32,
    timer: Option<AbortHandle>,
}

/// Debounced writer over a [`Documents`] instance.
///
/// The saver is a three-state machine: clean (no pending mutations),
/// dirty (mutations recorded, no timer yet), and scheduled (a timer will
/// flush soon). A burst of mutations collapses into one write unless it
/// crosses the threshold, which flushes synchronously.
pub struct Saver {
    docs: Arc<Documents>,
    config: SaverConfig,
    state: Mutex<SaverState>,
}

impl Saver {
    pub fn new(docs: Arc<Documents>, config: SaverConfig) -> Self {
        Self {
            docs,
            config,
            state: Mutex::new(SaverState::default()),
        }
    }

    pub fn documents(&self) -> &Arc<Documents> {
        &self.docs
    }

    /// Record one mutation and arrange for it to reach disk.
    ///
    /// Below the threshold this schedules (or keeps) a debounce timer and
    /// returns immediately; at the threshold, or when no tokio runtime is
    /// available to host a timer, it flushes right here and surfaces any
    /// write error to the mutating caller.
    pub fn mark_dirty(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock();
        state.pending += 1;

        if state.pending >= self.config.flush_threshold {
            debug!(pending = state.pending, "pending threshold reached, flushing now");
            return self.flush_locked(&mut state);
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return self.flush_locked(&mut state);
        };

        if state.timer.is_none() {
            let saver = Arc::clone(self);
            let delay = self.config.debounce;
            let task = handle.spawn(async move {
                tokio::time::sleep(delay).await;
                let mut state = saver.state.lock();
                state.timer = None;
                if let Err(err) = saver.flush_locked(&mut state) {
                    warn!(%err, "debounced flush failed, documents remain dirty");
                }
            });
            state.timer = Some(task.abort_handle());
        }
        Ok(())
    }

    /// Cancel any timer and flush unconditionally.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        self.docs.flush()?;
        state.pending = 0;
        Ok(())
    }

    fn flush_locked(&self, state: &mut SaverState) -> Result<()> {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        self.docs.flush()?;
        state.pending = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Branch;

    fn docs_in(dir: &Path) -> Arc<Documents> {
        Arc::new(Documents::load(dir).unwrap())
    }

    #[test]
    fn bootstrap_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = docs_in(tmp.path());
        docs.universe.write().root.children.push(Branch::new("dept"));
        docs.flush().unwrap();

        let again = docs_in(tmp.path());
        assert_eq!(again.universe.read().root.children.len(), 1);
    }

    #[test]
    fn rotation_keeps_a_backup_generation() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = docs_in(tmp.path());
        docs.flush().unwrap();
        docs.universe.write().root.children.push(Branch::new("dept"));
        docs.flush().unwrap();

        assert!(tmp.path().join("universe.json").exists());
        assert!(tmp.path().join("universe.bk.json").exists());
        assert!(!tmp.path().join("universe.temp.json").exists());
    }

    #[test]
    fn corrupt_live_falls_back_to_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = docs_in(tmp.path());
        docs.universe.write().root.children.push(Branch::new("dept"));
        docs.flush().unwrap();
        docs.flush().unwrap(); // second generation creates the backup

        std::fs::write(tmp.path().join("universe.json"), b"{ truncated").unwrap();
        let recovered = docs_in(tmp.path());
        assert_eq!(recovered.universe.read().root.children.len(), 1);
    }

    #[test]
    fn orphan_temp_file_is_ignored_on_load() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = docs_in(tmp.path());
        docs.flush().unwrap();
        std::fs::write(tmp.path().join("universe.temp.json"), b"garbage").unwrap();
        // a crash before the renames leaves the temp file behind
        let again = docs_in(tmp.path());
        assert!(again.universe.read().root.children.is_empty());
    }

    #[tokio::test]
    async fn threshold_forces_immediate_flush() {
        let tmp = tempfile::tempdir().unwrap();
        let saver = Arc::new(Saver::new(
            docs_in(tmp.path()),
            SaverConfig {
                flush_threshold: 2,
                debounce: Duration::from_secs(60),
            },
        ));

        saver.documents().universe.write().root.children.push(Branch::new("dept"));
        saver.mark_dirty().unwrap();
        assert!(!tmp.path().join("universe.json").exists());
        saver.mark_dirty().unwrap();
        assert!(tmp.path().join("universe.json").exists());
    }

    #[tokio::test]
    async fn debounce_collapses_a_burst() {
        let tmp = tempfile::tempdir().unwrap();
        let saver = Arc::new(Saver::new(
            docs_in(tmp.path()),
            SaverConfig {
                flush_threshold: 100,
                debounce: Duration::from_millis(20),
            },
        ));

        for _ in 0..5 {
            saver.mark_dirty().unwrap();
        }
        assert!(!tmp.path().join("universe.json").exists());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(tmp.path().join("universe.json").exists());
        assert_eq!(saver.state.lock().pending, 0);
    }

    #[test]
    fn without_a_runtime_mark_dirty_flushes_synchronously() {
        let tmp = tempfile::tempdir().unwrap();
        let saver = Arc::new(Saver::new(docs_in(tmp.path()), SaverConfig::default()));
        saver.mark_dirty().unwrap();
        assert!(tmp.path().join("universe.json").exists());
    }

    #[test]
    fn shutdown_flushes_pending_work() {
        let tmp = tempfile::tempdir().unwrap();
        let saver = Saver::new(docs_in(tmp.path()), SaverConfig::default());
        saver.documents().universe.write().root.children.push(Branch::new("dept"));
        saver.shutdown().unwrap();

        let again = docs_in(tmp.path());
        assert_eq!(again.universe.read().root.children.len(), 1);
    }
}
