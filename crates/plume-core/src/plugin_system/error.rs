//! # Plume Plugin System Errors
//!
//! Defines error types specific to the plugin registry and lifecycle engine.
//!
//! [`PluginSystemError`] is the primary enum: descriptor parse failures,
//! unknown plugin references, dependency cycles, loader resolution failures,
//! service (de)activation failures, refused deactivations and cache
//! corruption. Every fan-out point of the engine (dependency lists, service
//! lists, directory scans) collects its failures into an [`ErrorList`] instead
//! of stopping at the first one.
use std::fmt;
use std::path::PathBuf;

/// A single problem found while validating a plugin descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorProblem {
    /// The descriptor could not be read or deserialized at all
    Malformed(String),
    MissingId,
    InvalidId(String),
    MissingName,
    InvalidVersion(String),
    /// No loader declared and no default loader configured
    MissingLoader,
    InvalidLoader(String),
    InvalidDependency(String),
    UnknownServiceKind { service_id: String, kind: String },
    InvalidService { service_id: String, reason: String },
    DuplicateService(String),
}

impl fmt::Display for DescriptorProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorProblem::Malformed(msg) => write!(f, "malformed descriptor: {}", msg),
            DescriptorProblem::MissingId => write!(f, "plugin has no id"),
            DescriptorProblem::InvalidId(id) => write!(
                f,
                "invalid plugin id '{}' (only letters, digits, '_' and '-' are allowed)",
                id
            ),
            DescriptorProblem::MissingName => write!(f, "plugin has no name"),
            DescriptorProblem::InvalidVersion(msg) => write!(f, "invalid version: {}", msg),
            DescriptorProblem::MissingLoader => write!(f, "no loader declared and no default loader configured"),
            DescriptorProblem::InvalidLoader(kind) => write!(f, "invalid loader type '{}'", kind),
            DescriptorProblem::InvalidDependency(msg) => write!(f, "invalid dependency: {}", msg),
            DescriptorProblem::UnknownServiceKind { service_id, kind } => {
                write!(f, "service '{}' has unknown type '{}'", service_id, kind)
            }
            DescriptorProblem::InvalidService { service_id, reason } => {
                write!(f, "service '{}' is invalid: {}", service_id, reason)
            }
            DescriptorProblem::DuplicateService(id) => write!(f, "service id '{}' is declared twice", id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginSystemError {
    #[error("Malformed plugin descriptor '{}': {}", .path.display(), join_problems(.problems))]
    Parse {
        path: PathBuf,
        problems: Vec<DescriptorProblem>,
    },

    #[error("Unknown plugin '{plugin_id}'{}", referenced_suffix(.referenced_by))]
    UnknownPlugin {
        plugin_id: String,
        referenced_by: Option<String>,
    },

    #[error("Circular dependency detected: {}", .chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    #[error("Plugin '{plugin_id}' requires '{dependency}' version {required} but found {}", .found.as_deref().unwrap_or("no version"))]
    DependencyVersionMismatch {
        plugin_id: String,
        dependency: String,
        required: String,
        found: Option<String>,
    },

    #[error("Couldn't resolve loader '{loader_id}' for plugin '{plugin_id}': {reason}")]
    LoaderResolutionFailed {
        plugin_id: String,
        loader_id: String,
        reason: String,
    },

    #[error("Plugin loading failed for '{plugin_id}': {reason}")]
    LoadingError { plugin_id: String, reason: String },

    #[error("Loading service '{service_id}' of plugin '{plugin_id}' failed: {reason}")]
    ServiceLoadFailed {
        plugin_id: String,
        service_id: String,
        reason: String,
    },

    #[error("Activating service '{service_id}' of plugin '{plugin_id}' failed: {reason}")]
    ServiceActivationFailed {
        plugin_id: String,
        service_id: String,
        reason: String,
    },

    #[error("Deactivating service '{service_id}' of plugin '{plugin_id}' failed: {reason}")]
    ServiceDeactivationFailed {
        plugin_id: String,
        service_id: String,
        reason: String,
    },

    #[error("Plugin '{plugin_id}' has no service '{service_id}'")]
    UnknownService { plugin_id: String, service_id: String },

    #[error("Plugin '{plugin_id}' is still in use by {use_count} active plugin(s)")]
    StillInUse { plugin_id: String, use_count: u32 },

    #[error("Plugin '{plugin_id}' is not active")]
    NotActive { plugin_id: String },

    #[error("Plugin '{plugin_id}' is busy ({state})")]
    Busy { plugin_id: String, state: String },

    #[error("Cached plugin id '{expected}' for '{}' no longer matches its descriptor ('{found}')", .directory.display())]
    CacheCorruption {
        directory: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Plugin '{plugin_id}' in '{}' duplicates the plugin already loaded from '{}'", .directory.display(), .existing.display())]
    DuplicatePlugin {
        plugin_id: String,
        directory: PathBuf,
        existing: PathBuf,
    },

    #[error("No plugin can {operation} '{}'", .path.display())]
    NoFormatHandler { path: PathBuf, operation: String },

    #[error("Plugin '{plugin_id}' failed to {operation} '{}' with service '{service_id}': {reason}", .path.display())]
    FileOperationFailed {
        plugin_id: String,
        service_id: String,
        operation: String,
        path: PathBuf,
        reason: String,
    },

    #[error("I/O error during operation '{operation}' on path '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// Failures of a nested operation, wrapped with the plugin they belong to.
    #[error("{context}:\n{errors}")]
    Nested { context: String, errors: ErrorList },
}

fn referenced_suffix(referenced_by: &Option<String>) -> String {
    match referenced_by {
        Some(owner) => format!(" (referenced by '{}')", owner),
        None => String::new(),
    }
}

fn join_problems(problems: &[DescriptorProblem]) -> String {
    problems.iter().map(|p| p.to_string()).collect::<Vec<_>>().join("; ")
}

impl PluginSystemError {
    pub fn io(source: std::io::Error, operation: impl Into<String>, path: PathBuf) -> Self {
        PluginSystemError::Io {
            source,
            operation: operation.into(),
            path,
        }
    }

    pub fn parse(path: PathBuf, problem: DescriptorProblem) -> Self {
        PluginSystemError::Parse {
            path,
            problems: vec![problem],
        }
    }

    pub fn nested(context: impl Into<String>, errors: ErrorList) -> Self {
        PluginSystemError::Nested {
            context: context.into(),
            errors,
        }
    }

    /// Iterates over this error and every error nested inside it, depth first.
    pub fn walk(&self) -> Vec<&PluginSystemError> {
        let mut out = vec![self];
        if let PluginSystemError::Nested { errors, .. } = self {
            for inner in errors.iter() {
                out.extend(inner.walk());
            }
        }
        out
    }
}

/// An ordered collection of independent failures from a fan-out operation.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<PluginSystemError>);

impl ErrorList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: PluginSystemError) {
        self.0.push(error);
    }

    pub fn append(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PluginSystemError> {
        self.0.iter()
    }

    /// Every error in the list including nested ones, depth first.
    pub fn leaves(&self) -> Vec<&PluginSystemError> {
        self.0
            .iter()
            .flat_map(|e| e.walk())
            .filter(|e| !matches!(e, PluginSystemError::Nested { .. }))
            .collect()
    }

    /// `Ok(())` when empty, the list itself otherwise.
    pub fn into_result(self) -> Result<(), ErrorList> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }

    pub fn into_vec(self) -> Vec<PluginSystemError> {
        self.0
    }
}

impl From<PluginSystemError> for ErrorList {
    fn from(error: PluginSystemError) -> Self {
        Self(vec![error])
    }
}

impl From<Vec<PluginSystemError>> for ErrorList {
    fn from(errors: Vec<PluginSystemError>) -> Self {
        Self(errors)
    }
}

impl IntoIterator for ErrorList {
    type Item = PluginSystemError;
    type IntoIter = std::vec::IntoIter<PluginSystemError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Extend<PluginSystemError> for ErrorList {
    fn extend<T: IntoIterator<Item = PluginSystemError>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}
