//! Activation error types.

use std::path::PathBuf;

/// Errors raised while acquiring, interpreting, or binding a Knowledge Object.
///
/// Every variant stops at the KO boundary: the resolver records the message
/// on the KO and moves on to the next one.
#[derive(Debug, thiserror::Error)]
pub enum ActivatorError {
    /// Download or local read of a KO source failed.
    #[error("cannot acquire {location}: {message}")]
    Acquisition {
        /// The location being acquired.
        location: String,
        /// Failure reason.
        message: String,
    },

    /// The KO declares a schema version this activator does not handle.
    #[error("unsupported KGrid version '{version}' for {ko_id}")]
    UnsupportedVersion {
        /// The KO whose metadata was rejected.
        ko_id: String,
        /// The declared version.
        version: String,
    },

    /// A metadata or deployment file is missing or unreadable.
    #[error("missing or unreadable specification file {path}: {message}")]
    MissingSpecificationFile {
        /// The file that could not be read.
        path: PathBuf,
        /// Failure reason.
        message: String,
    },

    /// A linked-data context could not be loaded.
    #[error("cannot resolve context {context}: {message}")]
    ContextResolution {
        /// The context reference.
        context: String,
        /// Failure reason.
        message: String,
    },

    /// An artifact or one of its functions could not be bound.
    #[error("cannot bind {function} from {artifact}: {message}")]
    Binding {
        /// The artifact path.
        artifact: String,
        /// The exported function name.
        function: String,
        /// Failure reason.
        message: String,
    },

    /// A route targets a different engine. Never stored on a record.
    #[error("engine mismatch: expected {expected}, found {found}")]
    EngineMismatch {
        /// This activator's engine id.
        expected: String,
        /// The engine the route declared.
        found: String,
    },

    /// A deployment document has the wrong shape.
    #[error("invalid deployment for {ko_id}: {message}")]
    InvalidDeployment {
        /// The KO whose deployment was rejected.
        ko_id: String,
        /// Description of the problem.
        message: String,
    },

    /// An endpoint id is already bound by another KO.
    #[error("endpoint {endpoint} is already bound by {owner}")]
    EndpointConflict {
        /// The contested endpoint id.
        endpoint: String,
        /// The KO that bound it first.
        owner: String,
    },

    /// The manifest document could not be parsed.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// No manifest record carries this id.
    #[error("knowledge object not found: {0}")]
    KoNotFound(String),

    /// Archive extraction failure.
    #[error("extraction error: {message}")]
    Extraction {
        /// Description of the extraction failure.
        message: String,
    },

    /// Path traversal detected in archive entry.
    #[error("path traversal detected: {path}")]
    PathTraversal {
        /// The offending path.
        path: String,
    },

    /// Unsafe entry type in archive (symlink, hardlink, device node).
    #[error("unsafe archive entry type '{entry_type}' at {path}")]
    UnsafeEntryType {
        /// The entry type that was rejected.
        entry_type: String,
        /// The path of the entry.
        path: String,
    },

    /// Download or archive exceeds the configured limit.
    #[error("package too large: {size} bytes (limit: {limit} bytes)")]
    PackageTooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        limit: u64,
    },

    /// A blocking filesystem task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for activation operations.
pub type ActivatorResult<T> = Result<T, ActivatorError>;

/// Errors surfaced to callers of the registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// No KO with this id.
    #[error("Cannot find the requested KO {0}")]
    KoNotFound(String),

    /// No bound endpoint with this id.
    #[error("Cannot find the requested endpoint {0}")]
    EndpointNotFound(String),

    /// The bound function rejected the input or failed while running.
    #[error("{0}")]
    InvalidInputParameter(String),
}

impl RequestError {
    /// Client-facing title for this error.
    #[must_use]
    pub fn title(&self) -> &'static str {
        match self {
            Self::KoNotFound(_) => "KO Not Found",
            Self::EndpointNotFound(_) => "Endpoint Not Found",
            Self::InvalidInputParameter(_) => "Invalid Input Parameter",
        }
    }
}
