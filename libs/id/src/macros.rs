//! Macros for defining typed ID types.

/// Defines a generated ID type: a newtype over ULID rendered as
/// `{prefix}_{ulid}`.
///
/// Generated IDs carry `new()`/`parse()`, the standard ordering and
/// hashing traits, `Display`/`FromStr`, and string-form serde. Parsing is
/// strict: the prefix must match the declared one exactly, so an ID of one
/// resource type never deserializes as another.
///
/// ```ignore
/// define_id!(JobId, "job");
///
/// let job_id = JobId::new();
/// let parsed: JobId = "job_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        /// A typed ID for this resource type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Ulid);

        impl $name {
            /// The prefix for this ID type.
            pub const PREFIX: &'static str = $prefix;

            /// Creates a new ID with a fresh ULID.
            #[must_use]
            pub fn new() -> Self {
                Self($crate::Ulid::new())
            }

            /// Creates an ID from a raw ULID.
            #[must_use]
            pub const fn from_ulid(ulid: $crate::Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn ulid(&self) -> $crate::Ulid {
                self.0
            }

            /// Parses the `{prefix}_{ulid}` form.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                if s.is_empty() {
                    return Err($crate::IdError::Empty);
                }
                match s.split_once('_') {
                    None => Err($crate::IdError::MissingSeparator),
                    Some((prefix, _)) if prefix != Self::PREFIX => {
                        Err($crate::IdError::InvalidPrefix {
                            expected: Self::PREFIX,
                            actual: prefix.to_string(),
                        })
                    }
                    Some((_, raw)) => raw
                        .parse::<$crate::Ulid>()
                        .map(Self)
                        .map_err(|e| $crate::IdError::InvalidUlid(e.to_string())),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(Self::PREFIX)?;
                write!(f, "_{}", self.0)
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
                let s = <std::borrow::Cow<'de, str> as serde::Deserialize>::deserialize(
                    deserializer,
                )?;
                Self::parse(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}
