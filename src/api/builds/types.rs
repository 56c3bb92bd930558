use chrono::{DateTime, Utc};
use kiln_core::{
    BuildDefinition, BuildRecord, BuildRequest, ObjectStoragePush, PushDefinition, PushTarget,
    RegistryPush,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// Start build request body
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct StartBuildRequest {
    /// `owner/repo` on GitHub, or a clone URL
    pub source_repo: String,
    /// Branch, tag or commit to check out
    #[serde(default)]
    pub git_ref: String,
    /// Image tags (`latest` when empty)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Also tag the image with the commit SHA
    #[serde(default)]
    pub tag_with_commit_sha: bool,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile_path: Option<String>,
    #[serde(default)]
    pub push: PushRequest,
}

/// Push destination; a registry repo wins over object storage
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PushRequest {
    #[serde(default)]
    pub registry_repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_storage: Option<ObjectStorageRequest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ObjectStorageRequest {
    pub region: String,
    pub bucket: String,
    pub key_prefix: String,
}

impl From<StartBuildRequest> for BuildRequest {
    fn from(req: StartBuildRequest) -> Self {
        let object_storage = req
            .push
            .object_storage
            .map(|s| ObjectStoragePush {
                region: s.region,
                bucket: s.bucket,
                key_prefix: s.key_prefix,
            })
            .unwrap_or_default();

        BuildRequest {
            build: BuildDefinition {
                source_repo: req.source_repo,
                git_ref: req.git_ref,
                tags: req.tags,
                tag_with_commit_sha: req.tag_with_commit_sha,
                build_args: req.build_args,
                dockerfile_path: req.dockerfile_path,
            },
            push: PushDefinition {
                registry: RegistryPush {
                    repo: req.push.registry_repo,
                },
                object_storage,
            },
        }
    }
}

/// Start build response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartBuildResponse {
    pub build_id: Uuid,
}

/// Build record as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BuildRecordView {
    pub build_id: Uuid,
    /// `CREATED`, `BUILDING`, `PUSHING`, `SUCCESS`, `BUILD_FAILURE` or `PUSH_FAILURE`
    pub state: String,
    pub failed: bool,
    pub finished: bool,
    pub source_repo: String,
    pub git_ref: String,
    pub tags: Vec<String>,
    /// `registry` or `object_storage`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_target: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl From<BuildRecord> for BuildRecordView {
    fn from(record: BuildRecord) -> Self {
        let push_target = record.request.push.target().map(|t| match t {
            PushTarget::Registry(_) => "registry".to_string(),
            PushTarget::ObjectStorage(_) => "object_storage".to_string(),
        });
        let duration_ms = record.duration().map(|d| d.num_milliseconds());
        let tags = record.request.build.effective_tags();

        Self {
            build_id: record.id.as_uuid(),
            state: record.state.to_string(),
            failed: record.failed,
            finished: record.finished,
            source_repo: record.request.build.source_repo,
            git_ref: record.request.build.git_ref,
            tags,
            push_target,
            created_at: record.created_at,
            completed_at: record.completed_at,
            duration_ms,
        }
    }
}
