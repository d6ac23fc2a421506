mod pending;
mod server;
mod session_manager;

pub use pending::{AppliedMapping, PendingBreakpoint, PendingBreakpoints};
pub use server::Daemon;
pub use session_manager::{ManagerEvent, SessionManager};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::Error;

    #[tokio::test]
    async fn test_resolve_with_no_sessions() {
        let manager = SessionManager::new(Config::default());

        let err = manager.resolve(None).err().expect("expected an error");
        assert!(matches!(err, Error::NoActiveSession));

        let err = manager.resolve(Some("sess-9")).err().expect("expected an error");
        match err {
            Error::SessionNotFound(id) => assert_eq!(id, "sess-9"),
            other => panic!("expected SessionNotFound, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_set_active_requires_live_session() {
        let manager = SessionManager::new(Config::default());
        assert!(matches!(
            manager.set_active("sess-1"),
            Err(Error::SessionNotFound(_))
        ));
        assert!(manager.active_id().is_none());
    }

    #[tokio::test]
    async fn test_pending_store_reachable_through_manager() {
        let manager = SessionManager::new(Config::default());
        let bp = manager.pending().add_line("/a.php", 5, None);
        assert!(PendingBreakpoints::is_pending_id(&bp.id));
        assert_eq!(manager.pending().list().len(), 1);
    }
}
