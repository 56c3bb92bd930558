//! HTTP client commands for a running server

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::api::builds::{
    BuildRecordView, ObjectStorageRequest, PushRequest, StartBuildRequest, StartBuildResponse,
};
use crate::api::ApiResponse;

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:8090";

const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// `owner/repo` on GitHub, or a clone URL
    pub repo: String,
    /// Branch, tag or commit
    #[arg(long = "ref", default_value = "")]
    pub git_ref: String,
    /// Image tag (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,
    /// Also tag with the commit SHA
    #[arg(long)]
    pub tag_commit: bool,
    /// Build argument as KEY=VALUE (repeatable)
    #[arg(long = "build-arg")]
    pub build_args: Vec<String>,
    /// Dockerfile path inside the repository
    #[arg(long)]
    pub dockerfile: Option<String>,
    /// Registry repository to push to
    #[arg(long)]
    pub registry: Option<String>,
    /// Object storage bucket to upload the image archive to
    #[arg(long)]
    pub bucket: Option<String>,
    #[arg(long, default_value = "")]
    pub region: String,
    #[arg(long, default_value = "")]
    pub key_prefix: String,
    /// Poll until the build finishes
    #[arg(long)]
    pub wait: bool,
    /// Server base URL
    #[arg(long, default_value = DEFAULT_SERVER)]
    pub server: String,
}

impl SubmitArgs {
    /// Build the request body
    pub fn to_request(&self) -> Result<StartBuildRequest> {
        let mut build_args = BTreeMap::new();
        for arg in &self.build_args {
            let Some((key, value)) = arg.split_once('=') else {
                bail!("build argument '{}' is not KEY=VALUE", arg);
            };
            build_args.insert(key.to_string(), value.to_string());
        }

        let object_storage = self.bucket.as_ref().map(|bucket| ObjectStorageRequest {
            region: self.region.clone(),
            bucket: bucket.clone(),
            key_prefix: self.key_prefix.clone(),
        });

        Ok(StartBuildRequest {
            source_repo: self.repo.clone(),
            git_ref: self.git_ref.clone(),
            tags: self.tags.clone(),
            tag_with_commit_sha: self.tag_commit,
            build_args,
            dockerfile_path: self.dockerfile.clone(),
            push: PushRequest {
                registry_repo: self.registry.clone().unwrap_or_default(),
                object_storage,
            },
        })
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let body: ApiResponse<T> = resp
        .json()
        .await
        .with_context(|| format!("Unexpected response ({})", status))?;
    match body.data {
        Some(data) if body.success => Ok(data),
        _ => bail!(
            "{}: {}",
            body.error_type.unwrap_or_else(|| status.to_string()),
            body.error.unwrap_or_default()
        ),
    }
}

async fn fetch_status(client: &reqwest::Client, server: &str, id: &str) -> Result<BuildRecordView> {
    let url = format!("{}/api/v1/builds/{}", server.trim_end_matches('/'), id);
    let resp = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    decode(resp).await
}

fn print_record(record: &BuildRecordView) {
    println!("Build:    {}", record.build_id);
    println!("State:    {}", record.state);
    println!("Finished: {}", record.finished);
    println!("Failed:   {}", record.failed);
    println!("Source:   {} @ {}", record.source_repo, record.git_ref);
    println!("Tags:     {}", record.tags.join(", "));
    if let Some(target) = &record.push_target {
        println!("Push:     {}", target);
    }
    if let Some(ms) = record.duration_ms {
        println!("Duration: {:.1}s", ms as f64 / 1000.0);
    }
}

pub async fn submit(args: SubmitArgs) -> Result<()> {
    let body = args.to_request()?;
    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/builds", args.server.trim_end_matches('/'));

    let resp = client
        .post(&url)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    let started: StartBuildResponse = decode(resp).await?;
    println!("Build admitted: {}", started.build_id);

    if !args.wait {
        return Ok(());
    }

    let id = started.build_id.to_string();
    loop {
        let record = fetch_status(&client, &args.server, &id).await?;
        if record.finished {
            print_record(&record);
            if record.failed {
                bail!("build {} ended in {}", id, record.state);
            }
            return Ok(());
        }
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
    }
}

pub async fn status(server: &str, id: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let record = fetch_status(&client, server, id).await?;
    print_record(&record);
    Ok(())
}
