//! Session-scoped model escalations.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::routing::types::{ModelTier, OverrideSource};

use super::ModelOverride;

/// An active session-level escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEscalation {
    pub session_id: String,
    pub model: ModelTier,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Report row for the active-sessions view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSessionInfo {
    pub model: ModelTier,
    pub expires_in_minutes: i64,
    pub reason: String,
}

/// Tracks per-session model escalations with lazy expiry on access.
///
/// Sessions are intentionally not persisted across restarts.
pub struct SessionEscalationManager {
    default_duration: Duration,
    sessions: Mutex<HashMap<String, SessionEscalation>>,
}

impl SessionEscalationManager {
    /// Default escalation lifetime in minutes.
    pub const DEFAULT_DURATION_MINUTES: i64 = 30;

    pub fn new(default_duration_minutes: i64) -> Self {
        Self {
            default_duration: Duration::minutes(default_duration_minutes.max(1)),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Escalate a session to a model for a duration (default when `None`).
    pub fn set_session_model(
        &self,
        session_id: impl Into<String>,
        model: ModelTier,
        duration_minutes: Option<i64>,
        reason: Option<String>,
    ) {
        let session_id = session_id.into();
        let duration = duration_minutes
            .map(Duration::minutes)
            .unwrap_or(self.default_duration);
        let now = Utc::now();

        info!(
            session_id = %session_id,
            model = %model,
            minutes = duration.num_minutes(),
            "session escalated"
        );

        self.sessions
            .lock()
            .expect("session map poisoned")
            .insert(
                session_id.clone(),
                SessionEscalation {
                    session_id,
                    model,
                    expires_at: now + duration,
                    reason: reason.unwrap_or_else(|| "Session escalation".to_string()),
                    created_at: now,
                },
            );
    }

    /// Active override for a session.
    ///
    /// Every read sweeps expired escalations out of the map first.
    pub fn get_session_model(&self, session_id: &str) -> Option<ModelOverride> {
        let mut sessions = self.sessions.lock().expect("session map poisoned");

        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, escalation| now <= escalation.expires_at);
        if sessions.len() < before {
            debug!(removed = before - sessions.len(), "expired session escalations");
        }

        let escalation = sessions.get(session_id)?;
        Some(ModelOverride {
            model: escalation.model,
            source: OverrideSource::Session,
            reason: escalation.reason.clone(),
        })
    }

    /// Drop a session's escalation.
    pub fn clear_session(&self, session_id: &str) {
        if self
            .sessions
            .lock()
            .expect("session map poisoned")
            .remove(session_id)
            .is_some()
        {
            info!(session_id, "cleared session escalation");
        }
    }

    /// Remove all expired sessions; returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.lock().expect("session map poisoned");
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, escalation| now <= escalation.expires_at);
        let removed = before - sessions.len();

        if removed > 0 {
            debug!(removed, "cleaned up expired sessions");
        }
        removed
    }

    /// All active sessions with time remaining.
    pub fn active_sessions(&self) -> HashMap<String, ActiveSessionInfo> {
        self.cleanup_expired();

        let now = Utc::now();
        self.sessions
            .lock()
            .expect("session map poisoned")
            .iter()
            .map(|(id, escalation)| {
                (
                    id.clone(),
                    ActiveSessionInfo {
                        model: escalation.model,
                        expires_in_minutes: (escalation.expires_at - now).num_minutes(),
                        reason: escalation.reason.clone(),
                    },
                )
            })
            .collect()
    }
}

impl Default for SessionEscalationManager {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DURATION_MINUTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let manager = SessionEscalationManager::default();
        manager.set_session_model("s1", ModelTier::Large, None, Some("debugging".to_string()));

        let override_ = manager.get_session_model("s1").unwrap();
        assert_eq!(override_.model, ModelTier::Large);
        assert_eq!(override_.source, OverrideSource::Session);
        assert_eq!(override_.reason, "debugging");
    }

    #[test]
    fn test_unknown_session() {
        let manager = SessionEscalationManager::default();
        assert!(manager.get_session_model("nope").is_none());
    }

    #[test]
    fn test_expired_session_removed_on_access() {
        let manager = SessionEscalationManager::default();
        manager.set_session_model("s1", ModelTier::Large, Some(-1), None);

        assert!(manager.get_session_model("s1").is_none());
        // Removed, not just hidden
        assert!(manager.active_sessions().is_empty());
    }

    #[test]
    fn test_clear_session() {
        let manager = SessionEscalationManager::default();
        manager.set_session_model("s1", ModelTier::Medium, None, None);
        manager.clear_session("s1");
        assert!(manager.get_session_model("s1").is_none());
    }

    #[test]
    fn test_cleanup_expired() {
        let manager = SessionEscalationManager::default();
        manager.set_session_model("live", ModelTier::Medium, Some(30), None);
        manager.set_session_model("dead", ModelTier::Large, Some(-1), None);

        assert_eq!(manager.cleanup_expired(), 1);
        assert!(manager.get_session_model("live").is_some());
    }

    #[test]
    fn test_active_sessions_report() {
        let manager = SessionEscalationManager::default();
        manager.set_session_model("s1", ModelTier::Large, Some(30), Some("audit".to_string()));

        let active = manager.active_sessions();
        assert_eq!(active.len(), 1);
        let info = &active["s1"];
        assert_eq!(info.model, ModelTier::Large);
        assert!(info.expires_in_minutes <= 30);
        assert!(info.expires_in_minutes >= 28);
        assert_eq!(info.reason, "audit");
    }
}
