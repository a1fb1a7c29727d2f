//! Batch job status changes against a single cluster.
//!
//! The caller hands over a map of job id to desired status. Jobs are
//! grouped by status, each group goes upstream as one call, and the
//! groups run concurrently. Failures stay scoped to their group: the
//! response always reports every group's outcome, and the dispatch as a
//! whole is marked failed if any group failed.

use crate::client::{ClusterClient, JobStatus};
use crate::config::ClusterDescriptor;
use crate::errors::UpstreamError;
use identity::Identity;
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio::task::JoinSet;

/// Per-group outcomes of one batch dispatch.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    groups: Vec<(JobStatus, Result<String, UpstreamError>)>,
}

impl BatchOutcome {
    pub fn any_failed(&self) -> bool {
        self.groups.iter().any(|(_, result)| result.is_err())
    }

    /// Response body: one entry per dispatched status, carrying either
    /// the cluster's reply or the error that stopped the group.
    pub fn to_body(&self) -> Value {
        let mut body = serde_json::Map::new();
        for (status, result) in &self.groups {
            let value = match result {
                Ok(reply) => Value::from(reply.clone()),
                Err(error) => json!({"error": error.to_string()}),
            };
            body.insert(status.as_str().to_string(), value);
        }
        Value::Object(body)
    }
}

/// Group `changes` by target status and dispatch every group
/// concurrently against `cluster`.
pub async fn dispatch(
    client: &ClusterClient,
    cluster: &ClusterDescriptor,
    identity: &Identity,
    changes: &HashMap<String, JobStatus>,
) -> BatchOutcome {
    let mut set = JoinSet::new();
    for status in JobStatus::ALL {
        let job_ids: Vec<String> = changes
            .iter()
            .filter(|(_, target)| **target == status)
            .map(|(job_id, _)| job_id.clone())
            .collect();
        if job_ids.is_empty() {
            continue;
        }

        let client = client.clone();
        let cluster = cluster.clone();
        let identity = identity.clone();
        set.spawn(async move {
            let result = client
                .set_jobs_status(&cluster, &identity, &job_ids, status)
                .await;
            if let Err(error) = &result {
                tracing::warn!(
                    cluster = cluster.id,
                    status = status.as_str(),
                    jobs = job_ids.len(),
                    %error,
                    "batch status group failed"
                );
            }
            (status, result)
        });
    }

    let mut outcome = BatchOutcome::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(group) => outcome.groups.push(group),
            Err(e) => tracing::error!("batch dispatch task panicked: {e}"),
        }
    }
    // Join order is completion order; keep the report deterministic.
    outcome.groups.sort_by_key(|(status, _)| status.as_str());
    outcome
}
