//! Strongly-typed identifiers for cutpoint entities.
//!
//! Following `TigerStyle`: explicit types prevent bugs from mixing up IDs.
//! All numeric IDs are 64-bit.

use std::fmt;

use crate::error::{Error, Result};

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `SegmentId` with `ReaderId`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the next ID in sequence.
            ///
            /// # Panics
            /// Panics if the ID would overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "ID overflow");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

// Log layout.
define_id!(SegmentId, "segment", "Unique identifier for a segment (partition) within a log.");

// Reader group membership.
define_id!(ReaderGroupId, "rg", "Unique identifier for a reader group.");
define_id!(ReaderId, "reader", "Unique identifier for a reader within a group.");

// Checkpointing.
define_id!(RoundId, "round", "Unique identifier for one checkpoint round.");

/// Maximum length of a scope or stream component of a log name.
const NAME_COMPONENT_LEN_MAX: usize = 255;

/// Fully qualified name of a log: `scope/stream`.
///
/// Names are resolved by an external metadata service; cutpoint only uses
/// them as keys.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogName {
    scope: String,
    stream: String,
}

impl LogName {
    /// Creates a log name from its scope and stream components.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if a component is empty, too long, or
    /// contains characters other than ASCII alphanumerics, `-`, `_` and `.`.
    pub fn new(scope: impl Into<String>, stream: impl Into<String>) -> Result<Self> {
        let scope = scope.into();
        let stream = stream.into();
        validate_component("scope", &scope)?;
        validate_component("stream", &stream)?;
        Ok(Self { scope, stream })
    }

    /// Parses a `scope/stream` string.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the string is not of the form
    /// `scope/stream` or either component is invalid.
    pub fn parse(s: &str) -> Result<Self> {
        let Some((scope, stream)) = s.split_once('/') else {
            return Err(Error::InvalidArgument {
                name: "log",
                reason: "expected 'scope/stream'",
            });
        };
        Self::new(scope, stream)
    }

    /// Returns the scope component.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Returns the stream component.
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

fn validate_component(name: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidArgument {
            name,
            reason: "must not be empty",
        });
    }
    if value.len() > NAME_COMPONENT_LEN_MAX {
        return Err(Error::LimitExceeded {
            limit: name,
            max: NAME_COMPONENT_LEN_MAX as u64,
            actual: value.len() as u64,
        });
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::InvalidArgument {
            name,
            reason: "only ASCII alphanumerics, '-', '_' and '.' are allowed",
        });
    }
    Ok(())
}

impl fmt::Debug for LogName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "log({}/{})", self.scope, self.stream)
    }
}

impl fmt::Display for LogName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.stream)
    }
}

impl std::str::FromStr for LogName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_type_safety() {
        let segment = SegmentId::new(1);
        let reader = ReaderId::new(1);

        // Different types even with same value.
        assert_eq!(segment.get(), reader.get());
    }

    #[test]
    fn test_id_display() {
        let round = RoundId::new(42);
        assert_eq!(format!("{round}"), "round-42");
        assert_eq!(format!("{round:?}"), "round(42)");
    }

    #[test]
    fn test_id_next() {
        let id = RoundId::new(0);
        assert_eq!(id.next().get(), 1);
        assert_eq!(id.next().next().get(), 2);
    }

    #[test]
    #[should_panic(expected = "ID overflow")]
    fn test_id_overflow_panics() {
        let id = SegmentId::new(u64::MAX);
        let _ = id.next();
    }

    #[test]
    fn test_log_name_parse() {
        let name = LogName::parse("retail/orders").unwrap();
        assert_eq!(name.scope(), "retail");
        assert_eq!(name.stream(), "orders");
        assert_eq!(name.to_string(), "retail/orders");

        let parsed: LogName = "a.b/c-d_e".parse().unwrap();
        assert_eq!(parsed.stream(), "c-d_e");
    }

    #[test]
    fn test_log_name_rejects_bad_input() {
        assert!(LogName::parse("no-slash").is_err());
        assert!(LogName::parse("/stream").is_err());
        assert!(LogName::parse("scope/").is_err());
        assert!(LogName::parse("scope/has space").is_err());
        assert!(matches!(
            LogName::new("s", "x".repeat(300)),
            Err(Error::LimitExceeded { .. })
        ));
    }
}
