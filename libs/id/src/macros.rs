//! Macros for defining typed object keys.

/// Macro to define a typed `(namespace, name)` key.
///
/// This generates a struct with:
/// - A `KIND` constant used in log fields and error messages
/// - `new()` validating both parts
/// - `parse()` accepting the canonical `{namespace}/{name}` form
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` implementations (as the canonical string)
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_object_key!(ResourceId, "resource");
///
/// let id = ResourceId::new("payments", "nightly-scaler")?;
/// let parsed: ResourceId = "payments/nightly-scaler".parse()?;
/// ```
#[macro_export]
macro_rules! define_object_key {
    ($name:ident, $kind:literal) => {
        /// A typed `(namespace, name)` key.
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name {
            namespace: String,
            name: String,
        }

        impl $name {
            /// Human-readable kind of object this key points at.
            pub const KIND: &'static str = $kind;

            /// Creates a key after validating both parts.
            pub fn new(
                namespace: impl Into<String>,
                name: impl Into<String>,
            ) -> Result<Self, $crate::IdError> {
                let namespace = namespace.into();
                let name = name.into();
                $crate::validate_namespace(&namespace)?;
                $crate::validate_name(&name)?;
                Ok(Self { namespace, name })
            }

            /// Parses a key from a string.
            ///
            /// The string must be in the format `{namespace}/{name}`.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty { field: Self::KIND });
                }

                let Some((namespace, name)) = s.split_once('/') else {
                    return Err($crate::IdError::MissingSeparator(s.to_string()));
                };

                Self::new(namespace, name)
            }

            /// Returns the namespace part.
            #[must_use]
            pub fn namespace(&self) -> &str {
                &self.namespace
            }

            /// Returns the name part.
            #[must_use]
            pub fn name(&self) -> &str {
                &self.name
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}/{}", self.namespace, self.name)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
