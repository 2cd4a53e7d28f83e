use thiserror::Error;

/// Failures that callers may want to tell apart.
///
/// Underlying I/O failures are not represented here; they travel as
/// `std::io::Error` inside the `anyhow` chain.
#[derive(Debug, Error)]
pub enum ModError {
    /// A reserved key holds the wrong kind of JSON value.
    #[error("expected {expected} at `{key}`, found {found}")]
    Shape {
        key: String,
        expected: &'static str,
        found: String,
    },

    #[error("object has no GUID")]
    MissingGuid,

    /// A `_path`, `_order` entry, module or fragment could not be resolved.
    #[error("`{name}` could not be found")]
    NotFound { name: String },

    #[error("{0}")]
    Grammar(String),

    #[error("include cycle: {}", chain.join(" -> "))]
    IncludeCycle { chain: Vec<String> },

    #[error("no free directory name for `{suggestion}` under `{parent}` after {attempts} attempts")]
    NameExhausted {
        parent: String,
        suggestion: String,
        attempts: usize,
    },

    #[error("object {guid} lists {expected} children in its order but has {found}")]
    OrderMismatch {
        guid: String,
        expected: usize,
        found: usize,
    },
}

impl ModError {
    pub fn shape(key: impl Into<String>, expected: &'static str, found: &serde_json::Value) -> Self {
        Self::Shape {
            key: key.into(),
            expected,
            found: crate::util::kind_of(found).to_owned(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Returns true when the error (or something it wraps) is a missing file.
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(cause.downcast_ref::<Self>(), Some(Self::NotFound { .. }))
        })
    }
}
