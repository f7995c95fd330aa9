//! Cooperative cancellation for the timed display loops.
//!
//! Loops poll a [`CancelSignal`] once per tick, so a request takes effect
//! within one tick. The cross-process contract is the stop file: another
//! invocation (`as111 stop`) creates it and the looping invocation removes
//! it once seen.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::config;

/// Something a timed loop can poll to learn it should stop early.
pub trait CancelSignal: Send {
    /// Poll once. A signal backed by a one-shot request consumes it here.
    fn is_cancelled(&self) -> bool;
}

impl<T: CancelSignal + ?Sized> CancelSignal for Box<T> {
    fn is_cancelled(&self) -> bool {
        (**self).is_cancelled()
    }
}

/// Never fires.
#[derive(Debug, Default, Clone, Copy)]
pub struct Never;

impl CancelSignal for Never {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Marker file whose presence requests cancellation.
#[derive(Debug, Clone)]
pub struct StopFile {
    path: PathBuf,
}

impl StopFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The well-known location shared by all invocations.
    pub fn shared() -> Self {
        Self::new(config::stop_file_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ask whichever invocation is looping to stop.
    pub fn request(&self) -> io::Result<()> {
        File::create(&self.path)?;
        debug!("stop requested: {}", self.path.display());
        Ok(())
    }

    pub fn is_requested(&self) -> bool {
        self.path.exists()
    }

    /// Remove the marker; a missing file is fine.
    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("stop file removed: {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove {}: {}", self.path.display(), e),
        }
    }
}

impl CancelSignal for StopFile {
    fn is_cancelled(&self) -> bool {
        if !self.is_requested() {
            return false;
        }
        info!("stop file found, cancelling");
        self.clear();
        true
    }
}

/// In-process flag, sticky once set.
#[derive(Debug, Default, Clone)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CancelSignal for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Ctrl-C as a cancellation source.
///
/// The first SIGINT only raises the flag so the running loop can return and
/// the dock is left synced and disconnected. The handler resets itself, so
/// a second SIGINT terminates as usual.
#[derive(Debug, Clone, Copy)]
pub struct Interrupt;

impl Interrupt {
    pub fn install() -> io::Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(on_sigint),
            SaFlags::SA_RESETHAND,
            SigSet::empty(),
        );
        // the handler only touches an atomic
        unsafe { sigaction(Signal::SIGINT, &action) }.map_err(io::Error::from)?;
        Ok(Interrupt)
    }
}

impl CancelSignal for Interrupt {
    fn is_cancelled(&self) -> bool {
        INTERRUPTED.load(Ordering::SeqCst)
    }
}

/// Fires when either side fires.
#[derive(Debug, Clone)]
pub struct AnyOf<A, B>(pub A, pub B);

impl<A: CancelSignal, B: CancelSignal> CancelSignal for AnyOf<A, B> {
    fn is_cancelled(&self) -> bool {
        self.0.is_cancelled() || self.1.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_file_is_consumed_once() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopFile::new(dir.path().join(".as111_stop"));

        assert!(!stop.is_cancelled());
        stop.request().unwrap();
        assert!(stop.is_requested());
        assert!(stop.is_cancelled());
        assert!(!stop.path().exists());
        assert!(!stop.is_cancelled());
    }

    #[test]
    fn clearing_a_missing_stop_file_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopFile::new(dir.path().join("absent"));
        stop.clear();
        assert!(!stop.is_requested());
    }

    #[test]
    fn flag_and_combinator() {
        let flag = CancelFlag::new();
        let any = AnyOf(Never, flag.clone());
        assert!(!any.is_cancelled());
        flag.cancel();
        assert!(any.is_cancelled());
        assert!(any.is_cancelled());

        let boxed: Box<dyn CancelSignal> = Box::new(Never);
        assert!(!boxed.is_cancelled());
    }
}
