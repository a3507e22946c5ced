// SPDX-License-Identifier: MIT

//! Newtype identifiers shared across the pipeline.

/// Truncates an identifier to a short display prefix.
pub trait ShortId {
    fn short(&self, n: usize) -> &str;
}

impl ShortId for str {
    fn short(&self, n: usize) -> &str {
        if self.len() <= n {
            self
        } else {
            &self[..n]
        }
    }
}

/// Define a newtype ID wrapper around `String`.
///
/// Generates `new()`, `as_str()`, `Display`, `From<String>`, `From<&str>`,
/// and `Borrow<str>` so the id behaves like a string at call sites while
/// staying distinguishable in function signatures.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Producer-assigned, globally unique (within 24h) event identifier.
    pub struct EventId;
}

define_id! {
    /// Hash identifying a workspace directory, shared across platforms.
    pub struct WorkspaceHash;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_truncates() {
        assert_eq!("hello world".short(5), "hello");
        assert_eq!("hi".short(5), "hi");
    }

    #[test]
    fn event_id_displays_inner_string() {
        let id = EventId::new("e-42");
        assert_eq!(id.to_string(), "e-42");
        assert_eq!(id.as_str(), "e-42");
    }
}
