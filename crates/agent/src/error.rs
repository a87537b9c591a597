use std::fmt;

/// Why a dispatch gave up. `E` is the transport's own error type and is
/// handed back untouched.
#[derive(Debug)]
pub enum AgentError<E> {
    /// Nothing registered, or every registered weight is zero.
    NoBackend,
    /// Every selectable backend is down and still cooling off.
    Unavailable,
    /// The last backend tried could not be turned into a request URI.
    InvalidTarget(http::Error),
    /// The last transport failure the dispatch saw.
    Transport(E),
}

impl<E> AgentError<E> {
    pub fn into_transport(self) -> Option<E> {
        match self {
            AgentError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for AgentError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::NoBackend => write!(f, "no backend registered"),
            AgentError::Unavailable => write!(f, "no backend available"),
            AgentError::InvalidTarget(err) => write!(f, "invalid backend target: {err}"),
            AgentError::Transport(err) => write!(f, "{err}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AgentError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::InvalidTarget(err) => Some(err),
            // displayed verbatim, so the chain continues below it
            AgentError::Transport(err) => err.source(),
            AgentError::NoBackend | AgentError::Unavailable => None,
        }
    }
}
