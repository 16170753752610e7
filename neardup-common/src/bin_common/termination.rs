use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use signal_hook::{
    consts::signal::*,
    flag::{register, register_conditional_default},
};

/// A single-writer cancellation flag. Long-running loops check it at their
/// per-file or per-frame boundaries and wind down when it is set.
#[derive(Clone, Debug)]
pub struct Cookie {
    terminating: Arc<AtomicBool>,
}

impl Cookie {
    /// A cookie wired up to SIGINT and SIGTERM. A second signal falls back to
    /// the default handler.
    pub fn new() -> Result<Self, std::io::Error> {
        let terminating = Arc::new(AtomicBool::new(false));

        for flag in [SIGINT, SIGTERM] {
            register_conditional_default(flag, terminating.clone())?;
            register(flag, terminating.clone())?;
        }

        Ok(Self { terminating })
    }

    /// A cookie without signal handlers, only triggered through `cancel`.
    pub fn detached() -> Self {
        Self {
            terminating: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.terminating.store(true, Ordering::SeqCst);
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn detached_cancel() {
        let cookie = Cookie::detached();
        assert!(!cookie.is_terminating());

        let clone = cookie.clone();
        clone.cancel();
        assert!(cookie.is_terminating());
    }
}
