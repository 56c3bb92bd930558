//! Execution driver
//!
//! Runs one admitted build through `BUILDING -> PUSHING -> SUCCESS`, or to
//! `BUILD_FAILURE` / `PUSH_FAILURE`. Each step waits for the previous one.

use tracing::{debug, error, info, info_span, warn, Instrument};

use super::BuildEngine;
use crate::builder::{BuildContext, BuilderError};
use crate::queue::WorkerTask;
use crate::types::{
    BuildEvent, BuildFlags, BuildId, BuildRequest, BuildState, EventKind, PushTarget,
};

impl BuildEngine {
    /// Drive one task to completion.
    pub(crate) async fn run(&self, task: WorkerTask) {
        let WorkerTask {
            id,
            request,
            cancel,
        } = task;

        if cancel.is_cancelled() {
            debug!(build_id = %id, "Build cancelled before pickup, dropping");
            return;
        }

        self.drive(id, &request)
            .instrument(info_span!("build", build_id = %id))
            .await;
    }

    async fn drive(&self, id: BuildId, request: &BuildRequest) {
        let run = BuildRun { engine: self, id };

        if let Err(e) = self.store.set_build_state(id, BuildState::Building).await {
            error!(error = %e, "Failed to persist BUILDING");
            run.abort(format!("failed to start build: {e}")).await;
            return;
        }
        self.publish(BuildEvent::state_changed(id, BuildState::Building));
        info!("Build started");

        let ctx = BuildContext::new(id, self.shutdown.terminate_token());

        let image = match self.builder.build(&ctx, request).await {
            Ok(image) => image,
            Err(e) => {
                run.fail(BuildState::BuildFailure, format!("build failed: {e}"))
                    .await;
                return;
            }
        };
        debug!(image = %image, "Image built");

        if let Err(e) = self.store.set_build_state(id, BuildState::Pushing).await {
            error!(error = %e, "Failed to persist PUSHING");
            run.abort(format!("failed to start push: {e}")).await;
            return;
        }
        self.publish(BuildEvent::state_changed(id, BuildState::Pushing));

        let pushed = match request.push.target() {
            Some(PushTarget::Registry(registry)) => {
                info!(repo = %registry.repo, "Pushing to registry");
                self.builder.push_to_registry(&ctx, request).await
            }
            Some(PushTarget::ObjectStorage(storage)) => {
                info!(bucket = %storage.bucket, "Pushing to object storage");
                self.builder.push_to_object_storage(&ctx, request).await
            }
            None => Err(BuilderError::InvalidRequest(
                "no push destination".to_string(),
            )),
        };
        if let Err(e) = pushed {
            run.fail(BuildState::PushFailure, format!("push failed: {e}"))
                .await;
            return;
        }

        // cleanup errors are recorded as push failures
        if let Err(e) = self.builder.clean(&ctx, &image).await {
            run.fail(BuildState::PushFailure, format!("cleanup failed: {e}"))
                .await;
            return;
        }

        run.succeed().await;
    }

    /// Publish, logging failures
    fn publish(&self, event: BuildEvent) {
        if let Err(e) = self.events.publish(&event) {
            warn!(build_id = %event.build_id, error = %e, "Failed to publish build event");
        }
    }
}

/// A build that has not reached its end yet.
///
/// Every finishing method consumes the run, so only one outcome is applied.
struct BuildRun<'a> {
    engine: &'a BuildEngine,
    id: BuildId,
}

impl BuildRun<'_> {
    async fn fail(self, state: BuildState, reason: String) {
        let store = &self.engine.store;
        warn!(state = %state, error = %reason, "Build failed");

        if let Err(e) = store.set_build_state(self.id, state).await {
            error!(state = %state, error = %e, "Failed to persist terminal state");
        }
        self.finalize(BuildFlags::finished(true)).await;
        self.engine
            .publish(BuildEvent::finished(self.id, state, Some(reason)));
    }

    /// Stop without a terminal state after a persistence failure
    async fn abort(self, reason: String) {
        if !self.finalize(BuildFlags::finished(true)).await {
            error!("Build record left unfinished");
        }
        let mut event = BuildEvent::new(self.id, EventKind::Lifecycle, "build aborted");
        event.build_finished = true;
        event.error = Some(reason);
        self.engine.publish(event);
    }

    async fn succeed(self) {
        let store = &self.engine.store;

        if let Err(e) = store.set_build_state(self.id, BuildState::Success).await {
            error!(error = %e, "Failed to persist SUCCESS");
            self.abort(format!("failed to record success: {e}")).await;
            return;
        }
        if let Err(e) = store.set_completed_timestamp(self.id).await {
            warn!(error = %e, "Failed to record completion time");
        }
        self.finalize(BuildFlags::finished(false)).await;

        info!("Build succeeded");
        self.engine
            .publish(BuildEvent::finished(self.id, BuildState::Success, None));
    }

    /// Write the terminal flags. Returns whether the write succeeded.
    async fn finalize(&self, flags: BuildFlags) -> bool {
        match self.engine.store.set_build_flags(self.id, flags).await {
            Ok(()) => true,
            Err(e) => {
                error!(failed = flags.failed, error = %e, "Failed to persist build flags");
                false
            }
        }
    }
}
