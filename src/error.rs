use std::fmt;

/// Which pipeline stage produced an [`Error`], so callers can branch
/// without string-matching the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Input,
    Dns,
    Key,
    Entrypoint,
    SiteIndex,
    Manifest,
    Assets,
    Integrity,
    Assembly,
    Rpc,
    RateLimit,
    Internal,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Input => "input",
            Stage::Dns => "dns",
            Stage::Key => "key",
            Stage::Entrypoint => "entrypoint",
            Stage::SiteIndex => "site_index",
            Stage::Manifest => "manifest",
            Stage::Assets => "assets",
            Stage::Integrity => "integrity",
            Stage::Assembly => "assembly",
            Stage::Rpc => "rpc",
            Stage::RateLimit => "rate_limit",
            Stage::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// The closed error taxonomy from the error handling design: one stable
/// code per variant, each carrying whatever structured detail its
/// callers need instead of a free-text message alone.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("dns resolution failed: {0}")]
    DnsError(String),

    #[error("bad key: {0}")]
    BadKey(String),

    #[error("not published: {0}")]
    NotPublished(String),

    #[error("bad entrypoint: {0}")]
    BadEntrypoint(String),

    #[error("route not found: {route}")]
    RouteNotFound {
        route: String,
        available: Vec<String>,
    },

    #[error("manifest missing: {0}")]
    ManifestMissing(String),

    #[error("assets missing: {missing:?}")]
    AssetsMissing { missing: Vec<String> },

    #[error("no html asset in bundle")]
    NoHtml,

    #[error("wrong author for event {event_id}")]
    WrongAuthor { event_id: String },

    #[error("integrity failure for event {event_id} ({mime}): {reason}")]
    IntegrityFailure {
        event_id: String,
        mime: String,
        reason: String,
    },

    #[error("assembled bundle too large: {size} bytes > {limit} bytes")]
    BundleTooLarge { size: usize, limit: usize },

    #[error("{stage} timed out")]
    Timeout { stage: Stage },

    #[error("rate limited: {key}")]
    RateLimited { key: String },

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The stable string code from the error handling design (§7).
    pub fn code(&self) -> &'static str {
        match self {
            Error::BadInput(_) => "BAD_INPUT",
            Error::DnsError(_) => "DNS_ERROR",
            Error::BadKey(_) => "BAD_KEY",
            Error::NotPublished(_) => "NOT_PUBLISHED",
            Error::BadEntrypoint(_) => "BAD_ENTRYPOINT",
            Error::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            Error::ManifestMissing(_) => "MANIFEST_MISSING",
            Error::AssetsMissing { .. } => "ASSETS_MISSING",
            Error::NoHtml => "NO_HTML",
            Error::WrongAuthor { .. } => "WRONG_AUTHOR",
            Error::IntegrityFailure { .. } => "INTEGRITY_FAILURE",
            Error::BundleTooLarge { .. } => "BUNDLE_TOO_LARGE",
            Error::Timeout { .. } => "TIMEOUT",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::ProtocolError(_) => "PROTOCOL_ERROR",
            Error::Internal(_) => "INTERNAL",
        }
    }

    /// Log this error at the level the error handling design mandates:
    /// WARN for everything, except integrity/authorship failures which
    /// additionally get logged at ERROR.
    pub fn log(&self) {
        match self {
            Error::IntegrityFailure { .. } | Error::WrongAuthor { .. } => {
                tracing::error!(code = self.code(), "{self}");
            }
            _ => {
                tracing::warn!(code = self.code(), "{self}");
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ProtocolError(format!("json: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
