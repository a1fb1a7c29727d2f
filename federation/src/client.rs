//! Per-cluster HTTP adapter.
//!
//! One logical operation per upstream endpoint. Every call resolves the
//! path against the cluster's base URL, injects the caller's identity as
//! the authorization parameters the cluster API expects, times the call,
//! and normalizes failures into [`UpstreamError`]. The client never
//! retries; retry policy belongs to the caller.

use crate::config::ClusterDescriptor;
use crate::errors::UpstreamError;
use crate::logs::LogChunk;
use crate::status_tree::TeamStatusPayload;
use identity::Identity;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Target status of a job status-change operation.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Approved,
    Killing,
    Pausing,
    Queued,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Approved,
        JobStatus::Killing,
        JobStatus::Pausing,
        JobStatus::Queued,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Approved => "approved",
            JobStatus::Killing => "killing",
            JobStatus::Pausing => "pausing",
            JobStatus::Queued => "queued",
        }
    }

    fn single_endpoint(self) -> &'static str {
        match self {
            JobStatus::Approved => "ApproveJob",
            JobStatus::Killing => "KillJob",
            JobStatus::Pausing => "PauseJob",
            // "queued" resumes a paused job
            JobStatus::Queued => "ResumeJob",
        }
    }

    fn batch_endpoint(self) -> &'static str {
        match self {
            JobStatus::Approved => "ApproveJobs",
            JobStatus::Killing => "KillJobs",
            JobStatus::Pausing => "PauseJobs",
            JobStatus::Queued => "ResumeJobs",
        }
    }
}

/// Raw team (virtual cluster) record as one cluster reports it.
#[derive(Clone, Debug, Deserialize)]
pub struct RawTeam {
    #[serde(rename = "vcName")]
    pub team_id: String,
    #[serde(default)]
    pub admin: Value,
    /// JSON-encoded string; parsed defensively by the aggregator.
    #[serde(default)]
    pub metadata: Option<String>,
    /// JSON-encoded string; parsed defensively by the aggregator.
    #[serde(default)]
    pub quota: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JobLists {
    #[serde(default, rename = "finishedJobs")]
    finished: Vec<Value>,
    #[serde(default, rename = "queuedJobs")]
    queued: Vec<Value>,
    #[serde(default, rename = "runningJobs")]
    running: Vec<Value>,
    #[serde(default, rename = "visualizationJobs")]
    visualization: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TeamList {
    #[serde(default)]
    result: Vec<RawTeam>,
}

#[derive(Clone)]
pub struct ClusterClient {
    http: reqwest::Client,
}

impl ClusterClient {
    pub fn new(timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(ClusterClient { http })
    }

    /// List a team's jobs: the four per-state arrays concatenated.
    pub async fn list_jobs(
        &self,
        cluster: &ClusterDescriptor,
        identity: &Identity,
        team_id: &str,
        all: bool,
        limit: u32,
    ) -> Result<Vec<Value>, UpstreamError> {
        let owner = if all { "all" } else { &identity.email };
        let query = [
            ("userName", identity.email.clone()),
            ("vcName", team_id.to_string()),
            ("jobOwner", owner.to_string()),
            ("num", limit.to_string()),
        ];
        let lists: JobLists = self.get_json(cluster, "ListJobsV2", &query)
            .await?;
        let mut jobs = lists.finished;
        jobs.extend(lists.queued);
        jobs.extend(lists.running);
        jobs.extend(lists.visualization);
        tracing::info!(cluster = cluster.id, count = jobs.len(), "got jobs");
        Ok(jobs)
    }

    /// The cluster's explicit per-job priorities.
    pub async fn job_priorities(
        &self,
        cluster: &ClusterDescriptor,
        identity: &Identity,
    ) -> Result<HashMap<String, i64>, UpstreamError> {
        let query = [("userName", identity.email.clone())];
        self.get_json(cluster, "jobs/priorities", &query).await
    }

    pub async fn job_detail(
        &self,
        cluster: &ClusterDescriptor,
        identity: &Identity,
        job_id: &str,
    ) -> Result<Value, UpstreamError> {
        let query = [
            ("userName", identity.email.clone()),
            ("jobId", job_id.to_string()),
        ];
        self.get_json(cluster, "GetJobDetailV2", &query)
            .await
    }

    pub async fn submit_job(
        &self,
        cluster: &ClusterDescriptor,
        identity: &Identity,
        job: &Value,
    ) -> Result<String, UpstreamError> {
        let query = [("userName", identity.email.clone())];
        self.call(cluster, Method::POST, "PostJob", &query, Some(job))
            .await
    }

    pub async fn set_job_status(
        &self,
        cluster: &ClusterDescriptor,
        identity: &Identity,
        job_id: &str,
        status: JobStatus,
    ) -> Result<String, UpstreamError> {
        let query = [
            ("jobId", job_id.to_string()),
            ("userName", identity.email.clone()),
        ];
        self.call(cluster, Method::GET, status.single_endpoint(), &query, None)
            .await
    }

    /// Change many jobs to the same status with one upstream call.
    pub async fn set_jobs_status(
        &self,
        cluster: &ClusterDescriptor,
        identity: &Identity,
        job_ids: &[String],
        status: JobStatus,
    ) -> Result<String, UpstreamError> {
        let query = [
            ("jobIds", job_ids.join(",")),
            ("userName", identity.email.clone()),
        ];
        self.call(cluster, Method::GET, status.batch_endpoint(), &query, None)
            .await
    }

    pub async fn list_teams(
        &self,
        cluster: &ClusterDescriptor,
        identity: &Identity,
    ) -> Result<Vec<RawTeam>, UpstreamError> {
        let query = [("userName", identity.email.clone())];
        let list: TeamList = self.get_json(cluster, "ListVCs", &query).await?;
        Ok(list.result)
    }

    /// A single cluster's flat team-status payload, or `None` when the team
    /// does not exist there.
    pub async fn team_status(
        &self,
        cluster: &ClusterDescriptor,
        identity: &Identity,
        team_id: &str,
    ) -> Result<Option<TeamStatusPayload>, UpstreamError> {
        let query = [
            ("userName", identity.email.clone()),
            ("vcName", team_id.to_string()),
        ];
        let value: Value = self.get_json(cluster, "GetVC", &query).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| UpstreamError::Payload {
                cluster: cluster.id.clone(),
                reason: e.to_string(),
            })
    }

    /// One chunk of a job's log, continuing from `cursor` when present.
    /// The cursor is opaque and forwarded verbatim.
    pub async fn job_log(
        &self,
        cluster: &ClusterDescriptor,
        identity: &Identity,
        job_id: &str,
        cursor: Option<&str>,
    ) -> Result<LogChunk, UpstreamError> {
        let mut query = vec![
            ("jobId", job_id.to_string()),
            ("userName", identity.email.clone()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        self.get_json(cluster, "GetJobLog", &query).await
    }

    pub async fn list_templates(
        &self,
        cluster: &ClusterDescriptor,
        identity: &Identity,
        team_id: &str,
    ) -> Result<Vec<Value>, UpstreamError> {
        let query = [
            ("userName", identity.email.clone()),
            ("vcName", team_id.to_string()),
        ];
        self.get_json(cluster, "templates", &query).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        cluster: &ClusterDescriptor,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let body = self.call(cluster, Method::GET, path, query, None).await?;
        serde_json::from_str(&body).map_err(|e| UpstreamError::Payload {
            cluster: cluster.id.clone(),
            reason: e.to_string(),
        })
    }

    /// Issue one upstream call and return the response body.
    ///
    /// Transport failures (DNS, connect, timeout) become
    /// [`UpstreamError::Unreachable`]; non-2xx statuses become
    /// [`UpstreamError::Status`].
    async fn call(
        &self,
        cluster: &ClusterDescriptor,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<String, UpstreamError> {
        let url = cluster
            .base_url
            .join(path)
            .map_err(|e| UpstreamError::Unreachable {
                cluster: cluster.id.clone(),
                reason: e.to_string(),
            })?;

        let mut request = self.http.request(method.clone(), url.clone()).query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let begin = Instant::now();
        let response = request.send().await.map_err(|e| {
            tracing::error!(
                cluster = cluster.id,
                %method,
                %url,
                error = %e,
                elapsed_ms = begin.elapsed().as_millis() as u64,
                "cluster call failed"
            );
            UpstreamError::Unreachable {
                cluster: cluster.id.clone(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| UpstreamError::Unreachable {
            cluster: cluster.id.clone(),
            reason: e.to_string(),
        })?;
        tracing::info!(
            cluster = cluster.id,
            %method,
            %url,
            status = status.as_u16(),
            elapsed_ms = begin.elapsed().as_millis() as u64,
            "cluster call"
        );

        if !status.is_success() {
            return Err(UpstreamError::Status {
                cluster: cluster.id.clone(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
