//! Device token import from text files.
//!
//! Token files are UTF-8 text with one token per line. Blank lines and lines
//! starting with `#` are skipped; everything else must pass
//! [`normalize_token`], so both plain hex and `<a1b2 c3d4>` dumps are accepted.
//! Lines that are not UTF-8 or longer than [`MAX_LINE_BYTES`] are reported and
//! skipped without buffering the rest of the line.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::token::{normalize_token, TokenError, MAX_TOKEN_HEX_LEN};

/// Room for a maximal token in the spaced `<a1b2 c3d4>` form plus indentation.
pub const MAX_LINE_BYTES: usize = MAX_TOKEN_HEX_LEN * 4;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("an import is already running")]
    AlreadyWorking,

    #[error("line {line}: {source}")]
    InvalidToken { line: usize, source: TokenError },

    #[error("line {line}: not valid UTF-8")]
    InvalidEncoding { line: usize },

    #[error("line {line}: longer than {max} bytes", max = MAX_LINE_BYTES)]
    LineTooLong { line: usize },

    #[error("cannot read file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Default)]
struct ImportState {
    files: Vec<PathBuf>,
    tokens: Vec<String>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<ImportState>,
    working: AtomicBool,
}

/// Clears the working flag when a scan ends, even if a callback panics.
struct WorkingGuard(Arc<Inner>);

impl WorkingGuard {
    fn acquire(inner: &Arc<Inner>) -> Result<WorkingGuard, ImportError> {
        inner.working
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ImportError::AlreadyWorking)?;
        Ok(WorkingGuard(Arc::clone(inner)))
    }
}

impl Drop for WorkingGuard {
    fn drop(&mut self) {
        self.0.working.store(false, Ordering::Release);
    }
}

/// Collects device tokens from registered files. Cloning shares the same state.
#[derive(Clone, Default)]
pub struct TokenImporter {
    inner: Arc<Inner>,
}

impl TokenImporter {
    pub fn new() -> TokenImporter {
        TokenImporter::default()
    }

    /// Tokens found by the last completed scan.
    pub fn available_tokens(&self) -> Vec<String> {
        self.inner.state.lock().tokens.clone()
    }

    pub fn is_working(&self) -> bool {
        self.inner.working.load(Ordering::Acquire)
    }

    pub fn registered_files(&self) -> Vec<PathBuf> {
        self.inner.state.lock().files.clone()
    }

    /// Register a file for the next scan. Returns false if it was already registered.
    pub fn add_tokens_file<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();
        let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        let mut state = self.inner.state.lock();
        if state.files.contains(&path) {
            debug!("importer:: {} already registered", path.display());
            return false;
        }
        state.files.push(path);
        true
    }

    /// Scan every registered file on the calling thread.
    pub fn parse_tokens<F>(&self, mut on_entry: F) -> Result<Vec<String>, ImportError>
    where
        F: FnMut(&Path, Result<String, ImportError>),
    {
        let guard = WorkingGuard::acquire(&self.inner)?;
        let files = self.registered_files();

        let tokens = scan_files(&files, &mut on_entry);
        self.inner.state.lock().tokens = tokens.clone();
        drop(guard);
        Ok(tokens)
    }

    /// Scan every registered file on the blocking pool.
    ///
    /// `on_complete` runs once after `is_working` has gone back to false and
    /// `available_tokens` holds the result. Must be called within a Tokio runtime.
    pub fn parse_tokens_async<F, C>(&self, mut on_entry: F, on_complete: C) -> Result<JoinHandle<()>, ImportError>
    where
        F: FnMut(&Path, Result<String, ImportError>) + Send + 'static,
        C: FnOnce(Vec<String>) + Send + 'static,
    {
        let guard = WorkingGuard::acquire(&self.inner)?;
        let files = self.registered_files();
        let inner = Arc::clone(&self.inner);

        Ok(tokio::task::spawn_blocking(move || {
            let tokens = scan_files(&files, &mut on_entry);
            inner.state.lock().tokens = tokens.clone();
            drop(guard);
            on_complete(tokens);
        }))
    }
}

fn scan_files<F>(files: &[PathBuf], on_entry: &mut F) -> Vec<String>
where
    F: FnMut(&Path, Result<String, ImportError>),
{
    let mut tokens = Vec::new();

    for file in files {
        let mut reader = match File::open(file) {
            Ok(f) => BufReader::new(f),
            Err(e) => {
                warn!("importer:: cannot open {}: {}", file.display(), e);
                on_entry(file, Err(ImportError::Io(e)));
                continue;
            }
        };

        let before = tokens.len();
        let mut buf = Vec::with_capacity(128);
        let mut line = 0;
        loop {
            let (read, overflow) = match read_line_capped(&mut reader, &mut buf, MAX_LINE_BYTES) {
                Ok(result) => result,
                Err(e) => {
                    warn!("importer:: stopped reading {} after line {}: {}", file.display(), line, e);
                    on_entry(file, Err(ImportError::Io(e)));
                    break;
                }
            };
            if read == 0 {
                break;
            }
            line += 1;

            let first = buf.iter().find(|b| !b.is_ascii_whitespace());
            if first.is_none() || first == Some(&b'#') {
                continue;
            }
            if overflow {
                on_entry(file, Err(ImportError::LineTooLong { line }));
                continue;
            }
            let Ok(text) = std::str::from_utf8(&buf) else {
                on_entry(file, Err(ImportError::InvalidEncoding { line }));
                continue;
            };

            match normalize_token(text) {
                Ok(token) => {
                    tokens.push(token.clone());
                    on_entry(file, Ok(token));
                }
                Err(source) => on_entry(file, Err(ImportError::InvalidToken { line, source })),
            }
        }
        info!("importer:: {} tokens from {}", tokens.len() - before, file.display());
    }

    tokens
}

/// Read one line into `buf`, keeping at most `cap` bytes of it.
///
/// Returns the bytes consumed (0 at end of file) and whether the line was cut.
fn read_line_capped<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>, cap: usize) -> io::Result<(usize, bool)> {
    buf.clear();
    let mut consumed = 0;
    let mut overflow = false;

    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            break;
        }

        let newline = available.iter().position(|&b| b == b'\n');
        let end = newline.unwrap_or(available.len());
        let room = cap.saturating_sub(buf.len());
        if end > room {
            overflow = true;
        }
        buf.extend_from_slice(&available[..end.min(room)]);

        let used = newline.map_or(end, |i| i + 1);
        reader.consume(used);
        consumed += used;
        if newline.is_some() {
            break;
        }
    }

    Ok((consumed, overflow))
}
