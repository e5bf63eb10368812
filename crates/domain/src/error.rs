use uuid::Uuid;

/// Shared error type used across all Coda crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("session: {0}")]
    Session(String),

    #[error("parent entry {0} not found")]
    DetachedParent(Uuid),

    #[error("entry {0} not found")]
    UnknownEntry(Uuid),

    #[error("provider {provider} ({kind}): {message}")]
    Provider {
        provider: String,
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("tool '{tool}': {message}")]
    Tool { tool: String, message: String },

    #[error("extension '{extension}': {message}")]
    Extension { extension: String, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("aborted")]
    Aborted,

    #[error("shutting down")]
    ShuttingDown,

    #[error("{0}")]
    Other(String),
}

/// Provider error taxonomy.
///
/// Adapters classify their own wire errors into this set; the scheduler's
/// retry policy switches only on the kind, never on provider specifics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Network faults, 5xx, rate limits. Retried with backoff.
    Transient,
    /// The request exceeded the model's context window. Triggers compaction.
    ContextOverflow,
    /// Authentication or authorization failure. Never retried.
    Auth,
    /// Everything else. Never retried.
    Fatal,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderErrorKind::Transient => "transient",
            ProviderErrorKind::ContextOverflow => "context_overflow",
            ProviderErrorKind::Auth => "auth",
            ProviderErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Build a provider error.
    pub fn provider(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Error::Provider {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    /// True when the retry policy should back off and try again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Provider {
                kind: ProviderErrorKind::Transient,
                ..
            }
        )
    }

    /// True when the error signals the context window was exceeded.
    pub fn is_context_overflow(&self) -> bool {
        matches!(
            self,
            Error::Provider {
                kind: ProviderErrorKind::ContextOverflow,
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
