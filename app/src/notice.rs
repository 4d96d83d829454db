//! Transient notices ("toasts").
//!
//! Every mutation reports its outcome as a short-lived notice: successes stay
//! visible for 3 s, errors for 4 s by default. The [`NoticeBoard`] keeps the
//! posted notices, logs them and forwards them to an optional [`Notifier`]
//! (the terminal, in the CLI).

use chrono::{DateTime, Utc};
use gather_core::environment::Clock;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Success or error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoticeLevel {
    /// Operation succeeded
    Success,
    /// Operation failed
    Error,
}

/// One posted notice
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    /// Success or error
    pub level: NoticeLevel,
    /// Text shown to the user
    pub message: String,
    /// When it was posted
    pub posted_at: DateTime<Utc>,
    /// How long it stays visible
    pub ttl: Duration,
}

impl Notice {
    /// Whether the notice is still visible at `now`
    #[must_use]
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(self.ttl)
            .map(|ttl| now < self.posted_at + ttl)
            .unwrap_or(true)
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            NoticeLevel::Success => write!(f, "✓ {}", self.message),
            NoticeLevel::Error => write!(f, "✗ {}", self.message),
        }
    }
}

/// Receives every notice as it is posted
pub trait Notifier: Send + Sync {
    /// Show `notice`
    fn notify(&self, notice: &Notice);
}

/// Prints notices to stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, notice: &Notice) {
        eprintln!("{notice}");
    }
}

/// How long notices stay visible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeDurations {
    /// Success notices
    pub success: Duration,
    /// Error notices
    pub error: Duration,
}

impl Default for NoticeDurations {
    fn default() -> Self {
        Self {
            success: Duration::from_millis(3000),
            error: Duration::from_millis(4000),
        }
    }
}

struct BoardInner {
    clock: Arc<dyn Clock>,
    durations: NoticeDurations,
    posted: Mutex<Vec<Notice>>,
    sink: Option<Arc<dyn Notifier>>,
}

/// Shared notice board
///
/// Clones share the same notices.
#[derive(Clone)]
pub struct NoticeBoard {
    inner: Arc<BoardInner>,
}

impl NoticeBoard {
    /// Board without a sink
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, durations: NoticeDurations) -> Self {
        Self {
            inner: Arc::new(BoardInner {
                clock,
                durations,
                posted: Mutex::new(Vec::new()),
                sink: None,
            }),
        }
    }

    /// Board that also forwards every notice to `sink`
    #[must_use]
    pub fn with_sink(
        clock: Arc<dyn Clock>,
        durations: NoticeDurations,
        sink: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            inner: Arc::new(BoardInner {
                clock,
                durations,
                posted: Mutex::new(Vec::new()),
                sink: Some(sink),
            }),
        }
    }

    /// Post a success notice
    pub fn success(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(notice = %message, "Success notice");
        self.post(NoticeLevel::Success, message, self.inner.durations.success);
    }

    /// Post an error notice
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(notice = %message, "Error notice");
        self.post(NoticeLevel::Error, message, self.inner.durations.error);
    }

    fn post(&self, level: NoticeLevel, message: String, ttl: Duration) {
        let notice = Notice {
            level,
            message,
            posted_at: self.inner.clock.now(),
            ttl,
        };
        if let Some(sink) = &self.inner.sink {
            sink.notify(&notice);
        }
        self.inner
            .posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
    }

    /// Notices still visible now; expired ones are dismissed
    #[must_use]
    pub fn visible(&self) -> Vec<Notice> {
        let now = self.inner.clock.now();
        let mut posted = self
            .inner
            .posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        posted.retain(|notice| notice.is_visible_at(now));
        posted.clone()
    }

    /// Messages of the visible notices, oldest first
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.visible().into_iter().map(|n| n.message).collect()
    }

    /// Dismiss everything
    pub fn clear(&self) {
        self.inner
            .posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl fmt::Debug for NoticeBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoticeBoard")
            .field("durations", &self.inner.durations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that tests move forward by hand
    struct ManualClock {
        start: DateTime<Utc>,
        offset_ms: AtomicI64,
    }

    impl ManualClock {
        fn advance(&self, ms: i64) {
            self.offset_ms.fetch_add(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.start + chrono::Duration::milliseconds(self.offset_ms.load(Ordering::SeqCst))
        }
    }

    struct Recorder(Mutex<Vec<String>>);

    impl Notifier for Recorder {
        fn notify(&self, notice: &Notice) {
            self.0.lock().unwrap().push(notice.to_string());
        }
    }

    #[test]
    fn notices_expire_after_their_duration() {
        let clock = Arc::new(ManualClock {
            start: Utc::now(),
            offset_ms: AtomicI64::new(0),
        });
        let board = NoticeBoard::new(clock.clone(), NoticeDurations::default());

        board.success("Comment added");
        board.error("Comment cannot be empty");
        assert_eq!(board.messages().len(), 2);

        clock.advance(3500);
        assert_eq!(board.messages(), vec!["Comment cannot be empty".to_string()]);

        clock.advance(1000);
        assert!(board.visible().is_empty());
    }

    #[test]
    fn sink_sees_every_notice() {
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let board = NoticeBoard::with_sink(
            Arc::new(gather_core::environment::SystemClock),
            NoticeDurations::default(),
            recorder.clone(),
        );

        board.success("RSVP removed");
        board.error("Please sign in to RSVP");

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec!["✓ RSVP removed".to_string(), "✗ Please sign in to RSVP".to_string()]
        );
    }
}
