//! Debounced write-back of the proxy list

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error};

use super::list::write_proxy_file;

#[derive(Debug, Default)]
struct WriterState {
    last_write: Option<Instant>,
    dirty: bool,
}

/// Rewrites the proxy file at most once per debounce window.
///
/// Marking changes never touches the disk; writes happen in `flush_if_due` and
/// `flush`, which block and belong on a blocking thread. Callers pass a
/// snapshot closure instead of the data so the list is read while the writer
/// lock is held, keeping file contents in mutation order.
#[derive(Debug)]
pub struct ProxyFileWriter {
    path: PathBuf,
    debounce: Duration,
    state: Mutex<WriterState>,
}

impl ProxyFileWriter {
    pub fn new(path: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            path: path.into(),
            debounce,
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    /// Mark the list changed. Returns true if a write is already due.
    pub fn mark_dirty(&self) -> bool {
        let mut state = self.state.lock();
        state.dirty = true;
        let due = self.window_elapsed(&state);
        if !due {
            debug!("Proxy file write deferred (debounce)");
        }
        due
    }

    /// Write pending changes once the debounce window has passed
    pub fn flush_if_due<F>(&self, snapshot: F) -> bool
    where
        F: FnOnce() -> Vec<String>,
    {
        let mut state = self.state.lock();
        if !state.dirty || !self.window_elapsed(&state) {
            return false;
        }
        self.write_locked(&mut state, snapshot())
    }

    /// Write pending changes regardless of the debounce window
    pub fn flush<F>(&self, snapshot: F) -> bool
    where
        F: FnOnce() -> Vec<String>,
    {
        let mut state = self.state.lock();
        if !state.dirty {
            return false;
        }
        self.write_locked(&mut state, snapshot())
    }

    fn window_elapsed(&self, state: &WriterState) -> bool {
        state
            .last_write
            .map_or(true, |at| at.elapsed() >= self.debounce)
    }

    fn write_locked(&self, state: &mut WriterState, proxies: Vec<String>) -> bool {
        match write_proxy_file(&self.path, &proxies) {
            Ok(()) => {
                state.dirty = false;
                state.last_write = Some(Instant::now());
                debug!(
                    "Wrote {} proxies to {}",
                    proxies.len(),
                    self.path.display()
                );
                true
            }
            Err(e) => {
                // Stays dirty; the next mutation or flush retries
                error!(
                    "Failed to update proxy file {}: {}",
                    self.path.display(),
                    e
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_marking_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        let writer = ProxyFileWriter::new(&path, Duration::from_secs(60));

        assert!(writer.mark_dirty());
        assert!(writer.is_dirty());
        assert!(!path.exists());
    }

    #[test]
    fn test_first_write_is_immediate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        let writer = ProxyFileWriter::new(&path, Duration::from_secs(60));

        writer.mark_dirty();
        assert!(writer.flush_if_due(|| list(&["http://a:1"])));
        assert!(!writer.is_dirty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "http://a:1\n");
    }

    #[test]
    fn test_writes_inside_window_are_deferred_until_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        let writer = ProxyFileWriter::new(&path, Duration::from_secs(60));

        writer.mark_dirty();
        assert!(writer.flush_if_due(|| list(&["http://a:1", "http://b:2"])));
        assert!(!writer.mark_dirty());
        assert!(writer.is_dirty());
        assert!(!writer.flush_if_due(|| list(&["http://b:2"])));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "http://a:1\nhttp://b:2\n"
        );

        assert!(writer.flush(|| list(&["http://b:2"])));
        assert!(!writer.is_dirty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "http://b:2\n");

        // Nothing pending, nothing written
        assert!(!writer.flush(|| list(&["ignored"])));
    }

    #[test]
    fn test_zero_debounce_writes_every_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        let writer = ProxyFileWriter::new(&path, Duration::ZERO);

        assert!(writer.mark_dirty());
        assert!(writer.flush_if_due(|| list(&["http://a:1"])));
        assert!(writer.mark_dirty());
        assert!(writer.flush_if_due(Vec::new));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_write_failure_keeps_dirty_flag() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in place of the file makes the write fail
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        let writer = ProxyFileWriter::new(&path, Duration::ZERO);

        writer.mark_dirty();
        assert!(!writer.flush_if_due(|| list(&["http://a:1"])));
        assert!(writer.is_dirty());
    }
}
