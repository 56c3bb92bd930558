//! Kiln Core - Build Orchestration Engine
//!
//! This crate provides the core of the Kiln image build service, including:
//! - Types: build identifiers, requests, records and lifecycle states
//! - Store: persistence of build records (SQLite or in-memory)
//! - Event Bus: ordered, partitioned publish/subscribe of build events
//! - Builder: the image build/push capability and its docker CLI backend
//! - Queue: bounded, non-blocking admission and worker slots
//! - Engine: admission, status queries and the per-build state machine
//! - Shutdown: graceful shutdown coordination

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builder;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod queue;
pub mod shutdown;
pub mod store;
pub mod types;

pub use builder::{
    BuildContext, BuilderError, DockerCliBuilder, DockerConfig, ImageBuilder, ImageHandle,
};
pub use engine::{BuildEngine, QueueStats, EMPTY_PUSH_MESSAGE};
pub use error::{Error, ErrorKind, Result};
pub use event_bus::{
    BusError, EventBusManager, EventLog, EventPublisher, EventSubscriber, LogEventBus, MemoryLog,
    RedisStreamLog,
};
pub use queue::{AdmissionQueue, QueueConfig, TaskReceiver, WorkerSlots, WorkerTask};
pub use shutdown::{
    shutdown_signal_with_controller, wait_for_shutdown_signal, ShutdownController, ShutdownPhase,
};
pub use store::{BuildStore, MemoryBuildStore, SqliteBuildStore, StoreError};
pub use types::{
    BuildDefinition, BuildEvent, BuildFlags, BuildId, BuildRecord, BuildRequest, BuildState,
    EventKind, ObjectStoragePush, PushDefinition, PushTarget, RegistryPush,
};
