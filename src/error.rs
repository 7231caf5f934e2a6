//! Error types for the Stevedore deployment core.
//!
//! This module provides a comprehensive error hierarchy for all operations
//! in the reconciliation and build lifecycle: image reference parsing,
//! change reconciliation, image building, and registry access.

use thiserror::Error;

/// The main error type for the Stevedore deployment core.
#[derive(Debug, Error)]
pub enum StevedoreError {
    /// Image reference parsing and assembly errors.
    #[error("Image reference error: {0}")]
    Reference(#[from] ReferenceError),

    /// Reconciliation protocol errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Image build errors.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Registry access errors.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Image reference parsing and assembly errors.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// A part of a reference string did not match the grammar.
    ///
    /// Carries the offending value and the name of the grammar part that
    /// failed, so callers can report exactly what was malformed.
    #[error("Invalid {part} in image reference: '{value}'")]
    InvalidFormat {
        /// The offending value.
        value: String,
        /// The grammar part that failed (e.g. "domain", "tag", "digest").
        part: &'static str,
    },

    /// A reference was assembled with both a daemon host and a registry
    /// domain, which are mutually exclusive access paths.
    #[error(
        "Image reference cannot have both a docker host ('{docker_host}') and a registry domain ('{domain}')"
    )]
    ConflictingAccess {
        /// The configured daemon host.
        docker_host: String,
        /// The configured registry domain.
        domain: String,
    },

    /// A reference was missing the fields required for an operation.
    #[error("Image reference '{reference}' is not {required} (missing {missing})")]
    Incomplete {
        /// A best-effort rendering of the reference.
        reference: String,
        /// What the reference needed to be (e.g. "remote-addressable").
        required: &'static str,
        /// The missing field(s).
        missing: &'static str,
    },
}

/// Reconciliation protocol errors.
///
/// These are programmer errors in driving the three-phase protocol, not
/// recoverable runtime conditions.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A phase was invoked before `start`.
    #[error("Reconciler phase '{phase}' called before start")]
    NotStarted {
        /// The phase that was called out of order.
        phase: &'static str,
    },

    /// A required start option was missing or empty.
    #[error("Reconciler start option missing: {option}")]
    MissingOption {
        /// The missing option.
        option: &'static str,
    },

    /// An aggregate no-op action was invoked without any no-op changes.
    #[error("Aggregate no-op action invoked with no changes")]
    EmptyAggregate,

    /// An observation referred to a node that was never recorded.
    #[error("No node recorded for observation key '{key}'")]
    UnknownNode {
        /// The composite node key.
        key: String,
    },

    /// A node without the change capability was asked to act.
    #[error("Node '{key}' does not implement the change capability")]
    NotCapable {
        /// The composite node key.
        key: String,
    },
}

/// Image build errors.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build executor could not be started.
    #[error("Failed to start build command '{command}': {message}")]
    ExecutorSpawn {
        /// The command that failed to spawn.
        command: String,
        /// Description of the spawn failure.
        message: String,
    },

    /// The build executor exited with a failure.
    ///
    /// Captured output is carried so the failure can be reported with
    /// full context.
    #[error("Build command '{command}' failed with status {status}: {stderr}")]
    ExecutorFailed {
        /// The command that failed.
        command: String,
        /// The exit status code, or -1 if terminated by a signal.
        status: i32,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The executor succeeded but produced no usable image id.
    #[error("Build of '{target}' produced no image id")]
    MissingImageId {
        /// The build target reference.
        target: String,
    },

    /// A push was requested but no build exists yet.
    #[error("No build available for image '{name}'")]
    NoBuildAvailable {
        /// The declared image name.
        name: String,
    },

    /// Fingerprint computation failed.
    #[error("Failed to fingerprint build inputs: {message}")]
    Fingerprint {
        /// Description of the serialization failure.
        message: String,
    },
}

/// Registry access errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry returned an unexpected status.
    #[error("Registry request for '{reference}' failed with status {status}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// The reference that was queried.
        reference: String,
    },

    /// Network error talking to the registry.
    #[error("Network error communicating with registry: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// The registry response was missing the content digest.
    #[error("Registry response for '{reference}' carried no content digest")]
    MissingDigest {
        /// The reference that was queried.
        reference: String,
    },

    /// The reference cannot be resolved against a registry.
    #[error("Reference '{reference}' is not addressable on a registry")]
    NotAddressable {
        /// A best-effort rendering of the reference.
        reference: String,
    },
}

/// Result type alias for Stevedore operations.
pub type Result<T> = std::result::Result<T, StevedoreError>;

impl StevedoreError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl ReferenceError {
    /// Creates an invalid-format error for a grammar part.
    #[must_use]
    pub fn invalid(value: impl Into<String>, part: &'static str) -> Self {
        Self::InvalidFormat {
            value: value.into(),
            part,
        }
    }
}

impl BuildError {
    /// Creates a spawn error for a command.
    #[must_use]
    pub fn spawn(command: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::ExecutorSpawn {
            command: command.into(),
            message: message.to_string(),
        }
    }

    /// Creates a failure error from a finished process output.
    #[must_use]
    pub fn from_output(command: impl Into<String>, output: &std::process::Output) -> Self {
        Self::ExecutorFailed {
            command: command.into(),
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

impl RegistryError {
    /// Creates a network error with the given message.
    #[must_use]
    pub fn network(message: impl std::fmt::Display) -> Self {
        Self::Network {
            message: message.to_string(),
        }
    }
}
