//! Registry error types
//!
//! Error types for session registry operations.

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another session is registered in this process
    AlreadyActive,
    /// Handle does not name the current session, or the session is past the
    /// phase the operation needs
    StaleHandle(u64),
    /// The host session already serves its maximum number of viewers
    PeerLimit(usize),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::AlreadyActive => write!(f, "A session is already active"),
            RegistryError::StaleHandle(id) => write!(f, "Session {} is no longer current", id),
            RegistryError::PeerLimit(max) => write!(f, "Peer limit of {} reached", max),
        }
    }
}

impl std::error::Error for RegistryError {}
