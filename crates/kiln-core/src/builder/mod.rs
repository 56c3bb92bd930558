//! Image builder capability
//!
//! The engine drives builds through [`ImageBuilder`] and never looks at how an
//! image is produced. [`DockerCliBuilder`] is the bundled implementation.

mod docker;


use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::types::{BuildId, BuildRequest};

pub use docker::{DockerCliBuilder, DockerConfig};

/// Builder errors
#[derive(Debug, Error)]
pub enum BuilderError {
    /// The build context was cancelled
    #[error("cancelled")]
    Cancelled,
    /// A command could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// A command exited unsuccessfully
    #[error("{program} exited with {status}: {detail}")]
    CommandFailed {
        /// Program name
        program: String,
        /// Exit status description
        status: String,
        /// Tail of the command's error output
        detail: String,
    },
    /// The request cannot be executed
    #[error("invalid build request: {0}")]
    InvalidRequest(String),
    /// Local I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque handle to a built image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle(String);

impl ImageHandle {
    /// Wrap an image identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Image identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-build context handed to every builder call
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Build being executed
    pub build_id: BuildId,
    /// Aborts in-flight work when cancelled
    pub cancel: CancellationToken,
}

impl BuildContext {
    /// Create a context
    #[must_use]
    pub fn new(build_id: BuildId, cancel: CancellationToken) -> Self {
        Self { build_id, cancel }
    }
}

/// Builds, pushes and cleans up images.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build the image described by `request`
    async fn build(
        &self,
        ctx: &BuildContext,
        request: &BuildRequest,
    ) -> Result<ImageHandle, BuilderError>;

    /// Push the built image to the request's registry
    async fn push_to_registry(
        &self,
        ctx: &BuildContext,
        request: &BuildRequest,
    ) -> Result<(), BuilderError>;

    /// Export the built image to the request's object storage destination
    async fn push_to_object_storage(
        &self,
        ctx: &BuildContext,
        request: &BuildRequest,
    ) -> Result<(), BuilderError>;

    /// Remove local artifacts of a built image
    async fn clean(&self, ctx: &BuildContext, image: &ImageHandle) -> Result<(), BuilderError>;
}
