//! Session identity
//!
//! Identifiers shared by every layer: which match a session belongs to,
//! which role this process plays, and the handle returned by the registry.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Role this process plays in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Captures and serves the stream
    Host,
    /// Consumes a host's stream and events
    Viewer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Viewer => f.write_str("viewer"),
        }
    }
}

/// Identifiers of one live match
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchInfo {
    pub league_id: String,
    pub match_id: String,
    /// Correlates a host's broadcast with the viewers seeking it
    pub live_match_id: String,
}

impl MatchInfo {
    pub fn new(
        league_id: impl Into<String>,
        match_id: impl Into<String>,
        live_match_id: impl Into<String>,
    ) -> Self {
        Self {
            league_id: league_id.into(),
            match_id: match_id.into(),
            live_match_id: live_match_id.into(),
        }
    }

    /// A viewer only knows the live match it is looking for
    pub fn viewer(live_match_id: impl Into<String>) -> Self {
        Self::new("", "", live_match_id)
    }
}

/// Handle to the session registered for this process
///
/// Cheap to clone. The cancellation token fires when the session is stopped
/// or fails, which aborts any in-flight discovery, connect or peer task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    role: Role,
    info: MatchInfo,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub(crate) fn new(id: u64, role: Role, info: MatchInfo, cancel: CancellationToken) -> Self {
        Self {
            id,
            role,
            info,
            cancel,
        }
    }

    /// Unique session ID
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn info(&self) -> &MatchInfo {
        &self.info
    }

    pub fn live_match_id(&self) -> &str {
        &self.info.live_match_id
    }

    /// Token cancelled when the session ends
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionHandle {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_info_json_uses_camel_case() {
        let info = MatchInfo::new("L1", "M1", "LM1");
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"leagueId":"L1","matchId":"M1","liveMatchId":"LM1"}"#);
    }

    #[test]
    fn test_handle_equality_by_id() {
        let a = SessionHandle::new(7, Role::Host, MatchInfo::viewer("LM1"), CancellationToken::new());
        let b = SessionHandle::new(7, Role::Viewer, MatchInfo::viewer("LM9"), CancellationToken::new());
        assert_eq!(a, b);
        assert!(!a.is_cancelled());
        assert_eq!(a.live_match_id(), "LM1");
    }
}
