use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewState {
    Idle,
    /// Edits arrived and the quiet period has not elapsed yet.
    Waiting { revision: u64 },
    Compiling { revision: u64 },
    Ready { revision: u64, pdf: Arc<Vec<u8>> },
    Failed { revision: u64, message: String },
}

/// Coalesces TeX edits into preview compilations.
///
/// Each edit bumps the revision and restarts the quiet period. Results are
/// kept only for the newest revision.
#[derive(Debug)]
pub struct PreviewDebouncer {
    delay: Duration,
    revision: u64,
    source: String,
    timer: Option<AbortHandle>,
    state: PreviewState,
}

impl PreviewDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            revision: 0,
            source: String::new(),
            timer: None,
            state: PreviewState::Idle,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> &PreviewState {
        &self.state
    }

    /// Loads text fetched from the backend without scheduling a preview.
    pub fn load(&mut self, source: String) {
        self.cancel_timer();
        self.revision += 1;
        self.source = source;
        self.state = PreviewState::Idle;
    }

    pub fn edit(&mut self, source: String) -> u64 {
        self.revision += 1;
        self.source = source;
        self.state = PreviewState::Waiting {
            revision: self.revision,
        };
        self.revision
    }

    /// Replaces the pending quiet-period timer.
    pub fn arm(&mut self, timer: AbortHandle) {
        self.cancel_timer();
        self.timer = Some(timer);
    }

    /// Returns the source to compile when `revision` is still the newest.
    pub fn due(&mut self, revision: u64) -> Option<String> {
        if revision != self.revision {
            return None;
        }
        self.timer = None;
        self.state = PreviewState::Compiling { revision };
        Some(self.source.clone())
    }

    pub fn finish(&mut self, revision: u64, outcome: Result<Vec<u8>, String>) -> bool {
        if revision != self.revision {
            tracing::debug!(
                revision,
                latest = self.revision,
                "discarding preview for an older revision"
            );
            return false;
        }
        self.state = match outcome {
            Ok(pdf) => PreviewState::Ready {
                revision,
                pdf: Arc::new(pdf),
            },
            Err(message) => PreviewState::Failed { revision, message },
        };
        true
    }

    pub fn reset(&mut self) {
        self.cancel_timer();
        self.revision += 1;
        self.source.clear();
        self.state = PreviewState::Idle;
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for PreviewDebouncer {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}
