//! Dependencies shared by every view.

use crate::error::SyncError;
use crate::notice::NoticeBoard;
use crate::session::Session;
use gather_core::auth::AuthProvider;
use gather_core::environment::Clock;
use gather_core::remote::DataClient;
use std::sync::Arc;

/// Environment of the data-sync reducers
#[derive(Clone)]
pub struct SyncEnvironment {
    /// Remote data client
    pub client: Arc<dyn DataClient>,
    /// Signed-in user
    pub session: Session,
    /// Where mutations report their outcome
    pub notices: NoticeBoard,
    /// Clock for "today" and timestamps
    pub clock: Arc<dyn Clock>,
}

impl SyncEnvironment {
    /// Creates a new `SyncEnvironment`
    #[must_use]
    pub fn new(
        client: Arc<dyn DataClient>,
        session: Session,
        notices: NoticeBoard,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            session,
            notices,
            clock,
        }
    }

    /// Environment over a backend that serves both data and auth, restoring
    /// any session the backend already holds
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Remote`] when the auth provider cannot be reached.
    pub async fn start<B>(
        backend: Arc<B>,
        notices: NoticeBoard,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SyncError>
    where
        B: DataClient + AuthProvider + 'static,
    {
        let session = Session::start(backend.clone(), backend.clone(), clock.clone()).await?;
        Ok(Self::new(backend, session, notices, clock))
    }
}

impl std::fmt::Debug for SyncEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEnvironment")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
