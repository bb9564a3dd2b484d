#![forbid(unsafe_code)]

pub mod bundle;
pub mod change;
pub mod collection;
pub mod entity;

pub use bundle::{BundleAccessor, BundleRegistry, BundleRegistryError, StaticBundle};
pub use collection::{AttachOutcome, AttachedMetas, CommitParts};
pub use entity::{HostRecord, HostRef, MetaRecord, MetaRef};

pub mod ids {
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum IdError {
        Empty,
        TooLong,
        InvalidFirstChar,
        InvalidChar { ch: char, index: usize },
    }

    impl std::fmt::Display for IdError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "identifier must not be empty"),
                Self::TooLong => write!(f, "identifier exceeds 128 chars"),
                Self::InvalidFirstChar => {
                    write!(f, "identifier must start with an ascii alphanumeric")
                }
                Self::InvalidChar { ch, index } => {
                    write!(f, "identifier contains invalid char {ch:?} at index {index}")
                }
            }
        }
    }

    impl std::error::Error for IdError {}

    fn validate_identifier(value: &str) -> Result<(), IdError> {
        if value.is_empty() {
            return Err(IdError::Empty);
        }
        if value.len() > 128 {
            return Err(IdError::TooLong);
        }
        let mut chars = value.chars();
        let Some(first) = chars.next() else {
            return Err(IdError::Empty);
        };
        if !first.is_ascii_alphanumeric() {
            return Err(IdError::InvalidFirstChar);
        }
        for (index, ch) in value.chars().enumerate() {
            if index == 0 {
                continue;
            }
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '/' | '-') {
                continue;
            }
            return Err(IdError::InvalidChar { ch, index });
        }
        Ok(())
    }

    #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct HostId(String);

    impl HostId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_identifier(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for HostId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct MetaId(String);

    impl MetaId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_identifier(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for MetaId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct BundleId(String);

    impl BundleId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
            let value = value.into();
            validate_identifier(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for BundleId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

}
