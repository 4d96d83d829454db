//! # Gather Testing
//!
//! Testing utilities for Gather views.
//!
//! This crate provides:
//! - [`ReducerTest`]: Given-When-Then tests for reducers
//! - [`FixedClock`]: deterministic time
//! - [`InMemoryBackend`]: in-process stand-in for the hosted backend, with
//!   row-level policies, password accounts and a realtime change feed
//! - proptest strategies for search input
//!
//! ## Example
//!
//! ```ignore
//! use gather_testing::{InMemoryBackend, test_clock};
//!
//! #[tokio::test]
//! async fn lists_seeded_events() {
//!     let backend = InMemoryBackend::new();
//!     backend.seed(Table::Events, [demo_event("Rust meetup")]);
//!
//!     let view = EventListView::mount(env_for(backend.client()), SearchFilters::default()).await?;
//!     view.settle().await;
//!     assert_eq!(view.snapshot().await.events.len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use gather_core::environment::Clock;

mod backend;
mod matching;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use gather_testing::mocks::FixedClock;
    /// use gather_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers
pub mod helpers {
    use std::future::Future;
    use std::time::Duration;

    /// Install a tracing subscriber that writes through the test harness
    ///
    /// Honors `RUST_LOG`; safe to call from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }

    /// Poll `check` until it returns true or `timeout` elapses
    ///
    /// Returns the last result of `check`.
    pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Free-text search input: empty, short words, mixed case
    pub fn search_text() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[a-zA-Z]{1,8}",
            "[a-z]{1,5} [a-z]{1,5}",
        ]
    }

    /// Calendar date in 2030, as `YYYY-MM-DD`
    pub fn date_2030() -> impl Strategy<Value = String> {
        (1u32..=12, 1u32..=28).prop_map(|(month, day)| format!("2030-{month:02}-{day:02}"))
    }

    /// Attendance counts for a list of events
    pub fn attendance(max_events: usize) -> impl Strategy<Value = Vec<usize>> {
        proptest::collection::vec(0usize..6, 0..=max_events)
    }
}

// Re-export commonly used items
pub use backend::{InMemoryBackend, InMemoryClient, Operation, RequestRecord};
pub use mocks::{FixedClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};
