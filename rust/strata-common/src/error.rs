use thiserror::Error;

use crate::ids::SegmentId;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

pub type StdErrorBoxed = Box<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Returns the innermost error kind, looking through `InSegment` context wrappers.
    pub fn root_kind(&self) -> &ErrorKind {
        let mut kind = self.kind();
        while let ErrorKind::InSegment { source, .. } = kind {
            kind = source.kind();
        }
        kind
    }

    /// Storage corruption: the affected segment must be rebuilt or excluded,
    /// never read with substituted defaults.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self.root_kind(),
            ErrorKind::CorruptData { .. }
                | ErrorKind::IndexCollapsed { .. }
                | ErrorKind::ChecksumMismatch { .. }
        )
    }

    /// The caller may back off and retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_kind(),
            ErrorKind::ResourceExhausted { .. } | ErrorKind::Timeout { .. }
        )
    }

    /// Attaches the segment (and optionally the field) the error was raised for.
    pub fn in_segment(self, segment_id: SegmentId, field: Option<&str>) -> Error {
        Error(
            ErrorKind::InSegment {
                segment_id,
                field: field.map(str::to_string),
                source: self,
            }
            .into(),
        )
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_operation(name: impl Into<String>) -> Error {
        Error(ErrorKind::InvalidOperation { name: name.into() }.into())
    }

    pub fn corrupt_data(element: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::CorruptData {
                element: element.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn index_collapsed(element: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::IndexCollapsed {
                element: element.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn schema_violation(field: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::SchemaViolation {
                field: field.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn resource_exhausted(context: impl Into<String>, requested: u64) -> Error {
        Error(
            ErrorKind::ResourceExhausted {
                context: context.into(),
                requested,
            }
            .into(),
        )
    }

    pub fn plugin_not_found(name: impl Into<String>) -> Error {
        Error(ErrorKind::PluginNotFound { name: name.into() }.into())
    }

    pub fn timeout(context: impl Into<String>) -> Error {
        Error(
            ErrorKind::Timeout {
                context: context.into(),
            }
            .into(),
        )
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        Error(
            ErrorKind::Io {
                context: context.into(),
                source,
            }
            .into(),
        )
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Error {
        Error(
            ErrorKind::Json {
                context: context.into(),
                source,
            }
            .into(),
        )
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid operation {name}")]
    InvalidOperation { name: String },

    #[error("corrupt data in '{element}': {message}")]
    CorruptData { element: String, message: String },

    #[error("index collapsed, '{element}' is inconsistent with segment metadata: {message}")]
    IndexCollapsed { element: String, message: String },

    #[error("checksum mismatch for '{element}'")]
    ChecksumMismatch { element: String },

    #[error("schema violation for field '{field}': {message}")]
    SchemaViolation { field: String, message: String },

    #[error("resource exhausted in {context}: {requested} bytes requested")]
    ResourceExhausted { context: String, requested: u64 },

    #[error("plugin '{name}' not found")]
    PluginNotFound { name: String },

    #[error("deadline exceeded: {context}")]
    Timeout { context: String },

    #[error("IO error for '{context}': {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    #[error("JSON error for '{context}': {source}")]
    Json {
        context: String,
        source: serde_json::Error,
    },

    #[error(
        "segment {segment_id}{}: {source}",
        field.as_deref().map(|f| format!(", field '{f}'")).unwrap_or_default())]
    InSegment {
        segment_id: SegmentId,
        field: Option<String>,
        source: Error,
    },

    #[error("destination buffer is too small")]
    DestBufferTooSmall,
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io("", e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::json("", e)
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(_: std::convert::Infallible) -> Self {
        Error::invalid_operation("conversion")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_is_seen_through_segment_context() {
        let err = Error::corrupt_data("data", "truncated count").in_segment(7, Some("price"));
        assert!(err.is_corruption());
        assert!(!err.is_retryable());
        let message = err.to_string();
        assert!(message.contains("segment 7"));
        assert!(message.contains("price"));
        assert!(message.contains("truncated count"));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::resource_exhausted("offset extend", 1024).is_retryable());
        assert!(Error::timeout("build batch").is_retryable());
        assert!(!Error::plugin_not_found("custom").is_retryable());
        assert!(!Error::schema_violation("f", "not updatable").is_corruption());
    }

    #[test]
    fn test_index_collapsed_is_corruption() {
        let err = Error::index_collapsed("offset", "length 13 for doc count 3");
        assert!(err.is_corruption());
        assert!(matches!(err.kind(), ErrorKind::IndexCollapsed { .. }));
    }
}
