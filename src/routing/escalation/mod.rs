//! Escalation layer: explicit, session, and inline model overrides.

mod session;

pub use session::{ActiveSessionInfo, SessionEscalation, SessionEscalationManager};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::routing::types::{ModelTier, OverrideSource, Query};

/// A forced model choice that bypasses the rule stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOverride {
    pub model: ModelTier,
    pub source: OverrideSource,
    pub reason: String,
}

/// An inline hint parsed out of query text.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineHint {
    pub model: ModelTier,
    /// Query text with the hint token removed
    pub cleaned_text: String,
}

fn hint_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Tier names are canonical; the legacy model-family aliases are accepted
    // for callers migrating from @opus/@sonnet/@haiku habits.
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)@(small|medium|large|haiku|sonnet|opus)\b").expect("valid hint pattern")
    })
}

/// Parse a leading or embedded `@tier` token out of query text.
///
/// Returns `None` when there is no hint or when stripping it would leave
/// the query empty.
pub fn parse_inline_hint(text: &str) -> Option<InlineHint> {
    let pattern = hint_pattern();
    let found = pattern.find(text)?;

    let model = ModelTier::from_str(&found.as_str()[1..]).ok()?;

    let mut cleaned = String::with_capacity(text.len());
    cleaned.push_str(&text[..found.start()]);
    cleaned.push_str(&text[found.end()..]);
    let cleaned_text = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if cleaned_text.is_empty() {
        return None;
    }

    Some(InlineHint {
        model,
        cleaned_text,
    })
}

/// Per-source override counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EscalationCounters {
    pub explicit: u64,
    pub session: u64,
    pub inline: u64,
}

/// Resolves model overrides in strict precedence:
/// explicit preference, then session escalation, then inline hint.
pub struct EscalationLayer {
    sessions: Arc<SessionEscalationManager>,
    inline_hints_enabled: bool,
    explicit_count: AtomicU64,
    session_count: AtomicU64,
    inline_count: AtomicU64,
}

impl EscalationLayer {
    pub fn new(sessions: Arc<SessionEscalationManager>, inline_hints_enabled: bool) -> Self {
        Self {
            sessions,
            inline_hints_enabled,
            explicit_count: AtomicU64::new(0),
            session_count: AtomicU64::new(0),
            inline_count: AtomicU64::new(0),
        }
    }

    pub fn sessions(&self) -> &SessionEscalationManager {
        &self.sessions
    }

    /// Resolve an override for the query, if any source fires.
    pub fn resolve(&self, query: &Query, session_id: Option<&str>) -> Option<ModelOverride> {
        if let Some(model) = query.preferred_model {
            self.explicit_count.fetch_add(1, Ordering::Relaxed);
            debug!(model = %model, "explicit override");
            return Some(ModelOverride {
                model,
                source: OverrideSource::Explicit,
                reason: "user preference".to_string(),
            });
        }

        if let Some(session_id) = session_id {
            if let Some(override_) = self.sessions.get_session_model(session_id) {
                self.session_count.fetch_add(1, Ordering::Relaxed);
                debug!(session_id, model = %override_.model, "session override");
                return Some(override_);
            }
        }

        if self.inline_hints_enabled {
            if let Some(hint) = parse_inline_hint(&query.text) {
                self.inline_count.fetch_add(1, Ordering::Relaxed);
                debug!(model = %hint.model, "inline hint override");
                return Some(ModelOverride {
                    model: hint.model,
                    source: OverrideSource::Inline,
                    reason: format!("inline @{} hint", hint.model),
                });
            }
        }

        None
    }

    /// Per-source counters for metrics.
    pub fn counters(&self) -> EscalationCounters {
        EscalationCounters {
            explicit: self.explicit_count.load(Ordering::Relaxed),
            session: self.session_count.load(Ordering::Relaxed),
            inline: self.inline_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for EscalationLayer {
    fn default() -> Self {
        Self::new(Arc::new(SessionEscalationManager::default()), true)
    }
}
