#![forbid(unsafe_code)]

use rl_core::bundle::BundleRegistryError;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    InvalidInput(&'static str),
    ConfigurationMissing { bundle: String },
    HostAlreadyExists,
    UnknownHost,
    UnknownMeta,
    UnknownRevision { revision: i64 },
    RevisionIntegrity { detail: String },
}

impl StoreError {
    /// Stable machine-readable code per variant. `InvalidInput` messages
    /// prefixed `RESET_REQUIRED` keep that prefix as their code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Sql(_) => "SQL",
            Self::InvalidInput(message) if message.starts_with("RESET_REQUIRED") => {
                "RESET_REQUIRED"
            }
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConfigurationMissing { .. } => "CONFIGURATION_MISSING",
            Self::HostAlreadyExists => "ALREADY_EXISTS",
            Self::UnknownHost => "UNKNOWN_HOST",
            Self::UnknownMeta => "UNKNOWN_META",
            Self::UnknownRevision { .. } => "UNKNOWN_REVISION",
            Self::RevisionIntegrity { .. } => "REVISION_INTEGRITY",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::ConfigurationMissing { bundle } => {
                write!(f, "no relation mapping configured for bundle '{bundle}'")
            }
            Self::HostAlreadyExists => write!(f, "host already exists"),
            Self::UnknownHost => write!(f, "unknown host"),
            Self::UnknownMeta => write!(f, "unknown meta"),
            Self::UnknownRevision { revision } => {
                write!(f, "unknown revision {revision}")
            }
            Self::RevisionIntegrity { detail } => {
                write!(f, "revision integrity violation: {detail}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<BundleRegistryError> for StoreError {
    fn from(value: BundleRegistryError) -> Self {
        match value {
            BundleRegistryError::UnknownBundle { bundle } => {
                Self::ConfigurationMissing { bundle }
            }
            BundleRegistryError::DuplicateBundle { .. } => {
                Self::InvalidInput("bundle registered more than once")
            }
            BundleRegistryError::NoFields { .. } => {
                Self::InvalidInput("bundle declares no fields")
            }
        }
    }
}
