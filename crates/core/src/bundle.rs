#![forbid(unsafe_code)]

use std::collections::BTreeMap;

/// Capability interface for a meta bundle: which fields it declares and
/// which relation bundle pairs it with host records.
pub trait BundleAccessor: Sync + std::fmt::Debug {
    fn bundle(&self) -> &'static str;
    fn fields(&self) -> &'static [&'static str];
    fn relation_bundle(&self) -> &'static str;
}

#[derive(Clone, Copy, Debug)]
pub struct StaticBundle {
    pub bundle: &'static str,
    pub fields: &'static [&'static str],
    pub relation_bundle: &'static str,
}

impl BundleAccessor for StaticBundle {
    fn bundle(&self) -> &'static str {
        self.bundle
    }

    fn fields(&self) -> &'static [&'static str] {
        self.fields
    }

    fn relation_bundle(&self) -> &'static str {
        self.relation_bundle
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BundleRegistryError {
    DuplicateBundle { bundle: String },
    NoFields { bundle: String },
    UnknownBundle { bundle: String },
}

impl std::fmt::Display for BundleRegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateBundle { bundle } => {
                write!(f, "bundle '{bundle}' registered more than once")
            }
            Self::NoFields { bundle } => {
                write!(f, "bundle '{bundle}' declares no fields")
            }
            Self::UnknownBundle { bundle } => {
                write!(f, "no relation mapping registered for bundle '{bundle}'")
            }
        }
    }
}

impl std::error::Error for BundleRegistryError {}

/// Closed set of bundle accessors, validated once at construction. Lookup of
/// an unregistered bundle is the fatal configuration error of the engine.
pub struct BundleRegistry {
    entries: BTreeMap<&'static str, &'static dyn BundleAccessor>,
}

impl std::fmt::Debug for BundleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleRegistry")
            .field("bundles", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BundleRegistry {
    pub fn try_new(
        accessors: &[&'static dyn BundleAccessor],
    ) -> Result<Self, BundleRegistryError> {
        let mut entries: BTreeMap<&'static str, &'static dyn BundleAccessor> = BTreeMap::new();
        for accessor in accessors {
            if accessor.fields().is_empty() {
                return Err(BundleRegistryError::NoFields {
                    bundle: accessor.bundle().to_string(),
                });
            }
            if entries.insert(accessor.bundle(), *accessor).is_some() {
                return Err(BundleRegistryError::DuplicateBundle {
                    bundle: accessor.bundle().to_string(),
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn accessor(
        &self,
        bundle: &str,
    ) -> Result<&'static dyn BundleAccessor, BundleRegistryError> {
        self.entries
            .get(bundle)
            .copied()
            .ok_or_else(|| BundleRegistryError::UnknownBundle {
                bundle: bundle.to_string(),
            })
    }

    pub fn bundles(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SPEED: StaticBundle = StaticBundle {
        bundle: "speed",
        fields: &["gear"],
        relation_bundle: "node_meta",
    };

    static EMPTY: StaticBundle = StaticBundle {
        bundle: "empty",
        fields: &[],
        relation_bundle: "node_meta",
    };

    #[test]
    fn registry_rejects_duplicates_and_empty_field_lists() {
        let err = BundleRegistry::try_new(&[&SPEED, &SPEED]).unwrap_err();
        assert_eq!(
            err,
            BundleRegistryError::DuplicateBundle {
                bundle: "speed".to_string()
            }
        );

        let err = BundleRegistry::try_new(&[&EMPTY]).unwrap_err();
        assert_eq!(
            err,
            BundleRegistryError::NoFields {
                bundle: "empty".to_string()
            }
        );
    }

    #[test]
    fn registry_lookup() {
        let registry = BundleRegistry::try_new(&[&SPEED]).expect("registry should build");
        let accessor = registry.accessor("speed").expect("speed must resolve");
        assert_eq!(accessor.relation_bundle(), "node_meta");

        let err = registry.accessor("unknown").unwrap_err();
        assert_eq!(
            err,
            BundleRegistryError::UnknownBundle {
                bundle: "unknown".to_string()
            }
        );
    }
}
