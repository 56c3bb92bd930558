//! Build data model
//!
//! Identifiers, requests, persisted records and the lifecycle state graph
//! shared by the store, the event bus and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Globally unique build identifier, assigned at admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(Uuid);

impl BuildId {
    /// Generate a fresh random identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    #[must_use]
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// The 16 raw bytes, used as the event log partition key
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BuildId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What to build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDefinition {
    /// Source repository (`owner/repo` on GitHub, or a full clone URL)
    pub source_repo: String,
    /// Branch, tag or commit to check out
    #[serde(default)]
    pub git_ref: String,
    /// Image tags; `latest` when empty
    #[serde(default)]
    pub tags: Vec<String>,
    /// Also tag the image with the checked-out commit SHA
    #[serde(default)]
    pub tag_with_commit_sha: bool,
    /// `--build-arg` values
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    /// Dockerfile path relative to the repository root
    #[serde(default)]
    pub dockerfile_path: Option<String>,
}

impl BuildDefinition {
    /// Tags to apply, falling back to `latest`
    #[must_use]
    pub fn effective_tags(&self) -> Vec<String> {
        if self.tags.is_empty() {
            vec!["latest".to_string()]
        } else {
            self.tags.clone()
        }
    }
}

/// Registry push destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryPush {
    /// Image repository, e.g. `quay.io/acme/api`
    #[serde(default)]
    pub repo: String,
}

/// Object storage push destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoragePush {
    /// Bucket region
    #[serde(default)]
    pub region: String,
    /// Bucket name
    #[serde(default)]
    pub bucket: String,
    /// Key prefix for the exported image archive
    #[serde(default)]
    pub key_prefix: String,
}

impl ObjectStoragePush {
    fn is_complete(&self) -> bool {
        !self.region.is_empty() && !self.bucket.is_empty() && !self.key_prefix.is_empty()
    }
}

/// Where the built image goes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushDefinition {
    /// Registry destination
    #[serde(default)]
    pub registry: RegistryPush,
    /// Object storage destination
    #[serde(default)]
    pub object_storage: ObjectStoragePush,
}

/// Resolved push destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushTarget<'a> {
    /// Push to an image registry
    Registry(&'a RegistryPush),
    /// Export to object storage
    ObjectStorage(&'a ObjectStoragePush),
}

impl PushDefinition {
    /// Effective destination. Registry wins when both are configured.
    #[must_use]
    pub fn target(&self) -> Option<PushTarget<'_>> {
        if !self.registry.repo.is_empty() {
            Some(PushTarget::Registry(&self.registry))
        } else if self.object_storage.is_complete() {
            Some(PushTarget::ObjectStorage(&self.object_storage))
        } else {
            None
        }
    }
}

/// Caller-supplied build request. Immutable once admitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Build definition
    pub build: BuildDefinition,
    /// Push destination
    #[serde(default)]
    pub push: PushDefinition,
}

/// Build lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildState {
    /// Admitted, waiting for a worker
    Created,
    /// Image build in progress
    Building,
    /// Push in progress
    Pushing,
    /// Built and pushed
    Success,
    /// Image build failed
    BuildFailure,
    /// Push (or post-push cleanup) failed
    PushFailure,
}

impl BuildState {
    /// Whether no further transition may follow
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::BuildFailure | Self::PushFailure)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    #[must_use]
    pub fn can_transition_to(self, next: BuildState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Building)
                | (Self::Building, Self::Pushing)
                | (Self::Building, Self::BuildFailure)
                | (Self::Pushing, Self::Success)
                | (Self::Pushing, Self::PushFailure)
        )
    }

    /// The only state from which `self` may be entered
    #[must_use]
    pub fn predecessor(self) -> Option<BuildState> {
        match self {
            Self::Created => None,
            Self::Building => Some(Self::Created),
            Self::Pushing | Self::BuildFailure => Some(Self::Building),
            Self::Success | Self::PushFailure => Some(Self::Pushing),
        }
    }

    /// Stable storage/wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Building => "BUILDING",
            Self::Pushing => "PUSHING",
            Self::Success => "SUCCESS",
            Self::BuildFailure => "BUILD_FAILURE",
            Self::PushFailure => "PUSH_FAILURE",
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "BUILDING" => Ok(Self::Building),
            "PUSHING" => Ok(Self::Pushing),
            "SUCCESS" => Ok(Self::Success),
            "BUILD_FAILURE" => Ok(Self::BuildFailure),
            "PUSH_FAILURE" => Ok(Self::PushFailure),
            other => Err(format!("unknown build state: {}", other)),
        }
    }
}

/// Terminal bookkeeping flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildFlags {
    /// The build ended in failure
    pub failed: bool,
    /// The build reached an end (either outcome)
    pub finished: bool,
}

impl BuildFlags {
    /// Flags for a finished build
    #[must_use]
    pub fn finished(failed: bool) -> Self {
        Self {
            failed,
            finished: true,
        }
    }
}

/// Persisted build record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Build identifier
    pub id: BuildId,
    /// Request snapshot taken at admission
    pub request: BuildRequest,
    /// Current lifecycle state
    pub state: BuildState,
    /// Failure flag
    pub failed: bool,
    /// Finished flag
    pub finished: bool,
    /// Admission time
    pub created_at: DateTime<Utc>,
    /// Completion time (successful builds only)
    pub completed_at: Option<DateTime<Utc>>,
}

impl BuildRecord {
    /// New record in `CREATED`
    #[must_use]
    pub fn new(id: BuildId, request: BuildRequest) -> Self {
        Self {
            id,
            request,
            state: BuildState::Created,
            failed: false,
            finished: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Build duration, when completed
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.created_at)
    }
}

/// Category of a build event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// State machine progress
    Lifecycle,
    /// Output of the image build
    BuildOutput,
    /// Output of the push
    PushOutput,
}

/// Build lifecycle event published on the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildEvent {
    /// Build the event belongs to
    pub build_id: BuildId,
    /// Event category
    pub kind: EventKind,
    /// Human-readable message
    pub message: String,
    /// The build reached a terminal state
    #[serde(default)]
    pub build_finished: bool,
    /// Error description; its presence marks an error event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Publication time
    pub timestamp: DateTime<Utc>,
}

impl BuildEvent {
    /// Informational event
    pub fn new(build_id: BuildId, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            build_id,
            kind,
            message: message.into(),
            build_finished: false,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Lifecycle event for a state change
    #[must_use]
    pub fn state_changed(build_id: BuildId, state: BuildState) -> Self {
        Self::new(build_id, EventKind::Lifecycle, format!("state: {}", state))
    }

    /// Terminal event; `error` is set for failed outcomes
    #[must_use]
    pub fn finished(build_id: BuildId, state: BuildState, error: Option<String>) -> Self {
        let mut event = Self::state_changed(build_id, state);
        event.build_finished = true;
        event.error = error;
        event
    }

    /// Whether the event carries an error indicator
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether a subscriber should stop after this event
    #[must_use]
    pub fn ends_stream(&self) -> bool {
        self.build_finished || self.is_error()
    }
}
