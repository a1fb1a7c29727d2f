//! Cross-cluster fan-out and merge.
//!
//! Every read that spans clusters runs the same query against each
//! configured cluster concurrently and merges whatever came back. A
//! cluster that fails contributes an empty result and a recorded error,
//! never an aborted aggregate: operators would rather see partial data
//! than a blank page.

use crate::client::{ClusterClient, RawTeam};
use crate::config::ClusterDescriptor;
use crate::errors::UpstreamError;
use identity::Identity;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::task::JoinSet;

/// Merged fan-out output: the surviving items plus the per-cluster
/// failures that were absorbed along the way.
#[derive(Debug)]
pub struct Aggregated<T> {
    pub items: Vec<T>,
    pub failures: Vec<(String, UpstreamError)>,
}

/// Run `query` against every cluster concurrently and join all results,
/// preserving cluster configuration order in the output.
pub async fn fan_out<T, F, Fut>(
    clusters: Vec<ClusterDescriptor>,
    query: F,
) -> Vec<(ClusterDescriptor, Result<T, UpstreamError>)>
where
    F: Fn(ClusterDescriptor) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    T: Send + 'static,
{
    let mut set = JoinSet::new();
    for (index, cluster) in clusters.iter().enumerate() {
        let fut = query(cluster.clone());
        set.spawn(async move { (index, fut.await) });
    }

    let mut slots: Vec<Option<Result<T, UpstreamError>>> =
        clusters.iter().map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => tracing::error!("fan-out task panicked: {e}"),
        }
    }

    clusters
        .into_iter()
        .zip(slots)
        .map(|(cluster, slot)| {
            let result = slot.unwrap_or_else(|| {
                Err(UpstreamError::Unreachable {
                    cluster: cluster.id.clone(),
                    reason: "query task panicked".to_string(),
                })
            });
            (cluster, result)
        })
        .collect()
}

fn collect<T>(
    results: Vec<(ClusterDescriptor, Result<Vec<T>, UpstreamError>)>,
) -> Aggregated<T> {
    let mut items = Vec::new();
    let mut failures = Vec::new();
    for (cluster, result) in results {
        match result {
            Ok(mut batch) => items.append(&mut batch),
            Err(error) => {
                tracing::warn!(cluster = cluster.id, %error, "cluster dropped from aggregate");
                failures.push((cluster.id, error));
            }
        }
    }
    Aggregated { items, failures }
}

/// Merged job listing across clusters.
///
/// Each job is tagged with its owning cluster and overlaid with that
/// cluster's explicit priority, falling back to `default_priority`. The
/// merged set is sorted by submission time descending; jobs with missing
/// or unparseable timestamps sort as if submitted at epoch zero.
pub async fn list_jobs(
    client: ClusterClient,
    clusters: Vec<ClusterDescriptor>,
    identity: &Identity,
    team_id: &str,
    all: bool,
    limit: u32,
    default_priority: i64,
) -> Aggregated<Value> {
    let identity = identity.clone();
    let team_id = team_id.to_string();
    let results = fan_out(clusters, move |cluster| {
        let client = client.clone();
        let identity = identity.clone();
        let team_id = team_id.clone();
        async move {
            let (jobs, priorities) = tokio::join!(
                client.list_jobs(&cluster, &identity, &team_id, all, limit),
                client.job_priorities(&cluster, &identity),
            );
            let mut jobs = jobs?;
            // A missing priority map only costs the overlay, not the listing.
            let priorities = priorities.unwrap_or_else(|error| {
                tracing::warn!(cluster = cluster.id, %error, "job priorities unavailable");
                Default::default()
            });
            // Drop junk entries rather than the whole listing.
            jobs.retain(|job| {
                if !job.is_object() {
                    tracing::warn!(cluster = cluster.id, "dropping non-object job entry");
                    return false;
                }
                true
            });
            for job in &mut jobs {
                let priority = job["jobId"]
                    .as_str()
                    .and_then(|id| priorities.get(id).copied())
                    .unwrap_or(default_priority);
                job["cluster"] = Value::from(cluster.id.clone());
                job["priority"] = Value::from(priority);
            }
            Ok(jobs)
        }
    })
    .await;

    let mut aggregated = collect(results);
    aggregated
        .items
        .sort_by_key(|job| std::cmp::Reverse(submission_time_millis(job)));
    aggregated
}

/// Submission time in milliseconds since the epoch; zero when missing or
/// unparseable.
fn submission_time_millis(job: &Value) -> i64 {
    let Some(text) = job.get("jobTime").and_then(Value::as_str) else {
        return 0;
    };
    chrono::DateTime::parse_from_rfc3339(text)
        .or_else(|_| chrono::DateTime::parse_from_rfc2822(text))
        .map(|time| time.timestamp_millis())
        .unwrap_or(0)
}

/// GPU models available to a team on one cluster, merged by model name
/// from the team's metadata and quota documents.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GpuModel {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_node: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,
}

/// One cluster's view of a team, with the shared team id stripped.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeamClusterEntry {
    /// The owning cluster's id.
    pub id: String,
    pub admin: Value,
    pub gpus: BTreeMap<String, GpuModel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_quota: Option<Value>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TeamAggregate {
    pub id: String,
    pub clusters: Vec<TeamClusterEntry>,
}

/// Parse a JSON-encoded sub-document, falling back to an empty object.
/// Cluster metadata is operator-maintained and occasionally malformed;
/// one bad document must not take the whole team down.
fn parse_lenient(text: Option<&str>) -> serde_json::Map<String, Value> {
    text.and_then(|t| serde_json::from_str::<Value>(t).ok())
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

fn team_entry(cluster_id: &str, team: RawTeam) -> TeamClusterEntry {
    let metadata = parse_lenient(team.metadata.as_deref());
    let quota = parse_lenient(team.quota.as_deref());

    let mut gpus: BTreeMap<String, GpuModel> = BTreeMap::new();
    for (model, entry) in &metadata {
        if model == "user_quota" {
            continue;
        }
        gpus.entry(model.clone()).or_default().per_node =
            entry.get("num_gpu_per_node").and_then(Value::as_i64);
    }
    // Quota wins when both documents mention the same model.
    for (model, value) in &quota {
        gpus.entry(model.clone()).or_default().quota = value.as_i64();
    }

    TeamClusterEntry {
        id: cluster_id.to_string(),
        admin: team.admin,
        gpus,
        user_quota: metadata.get("user_quota").cloned(),
    }
}

/// Teams grouped across clusters by their shared team id.
pub async fn list_teams(
    client: ClusterClient,
    clusters: Vec<ClusterDescriptor>,
    identity: &Identity,
) -> Aggregated<TeamAggregate> {
    let identity = identity.clone();
    let results = fan_out(clusters, move |cluster| {
        let client = client.clone();
        let identity = identity.clone();
        async move {
            let teams = client.list_teams(&cluster, &identity).await?;
            Ok(teams
                .into_iter()
                .map(|team| (team.team_id.clone(), team_entry(&cluster.id, team)))
                .collect::<Vec<_>>())
        }
    })
    .await;

    let Aggregated { items, failures } = collect(results);
    let mut groups: IndexMap<String, Vec<TeamClusterEntry>> = IndexMap::new();
    for (team_id, entry) in items {
        groups.entry(team_id).or_default().push(entry);
    }
    let items = groups
        .into_iter()
        .map(|(id, clusters)| TeamAggregate { id, clusters })
        .collect();
    Aggregated { items, failures }
}

/// Templates flattened across clusters, de-duplicated by name. The first
/// occurrence in cluster configuration order wins.
pub async fn list_templates(
    client: ClusterClient,
    clusters: Vec<ClusterDescriptor>,
    identity: &Identity,
    team_id: &str,
) -> Aggregated<Value> {
    let identity = identity.clone();
    let team_id = team_id.to_string();
    let results = fan_out(clusters, move |cluster| {
        let client = client.clone();
        let identity = identity.clone();
        let team_id = team_id.clone();
        async move { client.list_templates(&cluster, &identity, &team_id).await }
    })
    .await;

    let mut aggregated = collect(results);
    let mut seen = std::collections::HashSet::new();
    aggregated.items.retain(|template| {
        let name = template
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        seen.insert(name)
    });
    aggregated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{descriptor, identity};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_jobs(server: &MockServer, jobs: Value) {
        Mock::given(method("GET"))
            .and(path("/ListJobsV2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "runningJobs": jobs,
            })))
            .mount(server)
            .await;
    }

    async fn mock_priorities(server: &MockServer, priorities: Value) {
        Mock::given(method("GET"))
            .and(path("/jobs/priorities"))
            .respond_with(ResponseTemplate::new(200).set_body_json(priorities))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn one_failing_cluster_does_not_abort_the_aggregate() {
        let a = MockServer::start().await;
        mock_jobs(&a, json!([{"jobId": "a1"}, {"jobId": "a2"}])).await;
        mock_priorities(&a, json!({})).await;

        let b = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ListJobsV2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&b)
            .await;
        mock_priorities(&b, json!({})).await;

        let c = MockServer::start().await;
        mock_jobs(&c, json!([{"jobId": "c1"}, {"jobId": "c2"}])).await;
        mock_priorities(&c, json!({})).await;

        let clusters = vec![
            descriptor("alpha", &a.uri()),
            descriptor("beta", &b.uri()),
            descriptor("gamma", &c.uri()),
        ];
        let aggregated = list_jobs(
            ClusterClient::new(5).unwrap(),
            clusters,
            &identity(),
            "research",
            true,
            10,
            100,
        )
        .await;

        assert_eq!(aggregated.items.len(), 4);
        let tags: Vec<&str> = aggregated
            .items
            .iter()
            .map(|j| j["cluster"].as_str().unwrap())
            .collect();
        assert!(tags.contains(&"alpha") && tags.contains(&"gamma"));
        assert!(!tags.contains(&"beta"));

        assert_eq!(aggregated.failures.len(), 1);
        assert_eq!(aggregated.failures[0].0, "beta");
        assert!(matches!(
            aggregated.failures[0].1,
            UpstreamError::Status { status: 500, .. }
        ));
    }

    #[tokio::test]
    async fn non_object_job_entries_do_not_cost_the_listing() {
        let server = MockServer::start().await;
        mock_jobs(&server, json!(["just-a-string", {"jobId": "ok"}, null])).await;
        mock_priorities(&server, json!({})).await;

        let aggregated = list_jobs(
            ClusterClient::new(5).unwrap(),
            vec![descriptor("alpha", &server.uri())],
            &identity(),
            "research",
            true,
            10,
            100,
        )
        .await;

        assert!(aggregated.failures.is_empty());
        assert_eq!(aggregated.items.len(), 1);
        assert_eq!(aggregated.items[0]["jobId"], json!("ok"));
        assert_eq!(aggregated.items[0]["cluster"], json!("alpha"));
    }

    #[tokio::test]
    async fn priority_overlay_defaults_when_cluster_has_no_entry() {
        let server = MockServer::start().await;
        mock_jobs(&server, json!([{"jobId": "known"}, {"jobId": "unknown"}])).await;
        mock_priorities(&server, json!({"known": 5})).await;

        let aggregated = list_jobs(
            ClusterClient::new(5).unwrap(),
            vec![descriptor("alpha", &server.uri())],
            &identity(),
            "research",
            true,
            10,
            100,
        )
        .await;

        let by_id: std::collections::HashMap<&str, i64> = aggregated
            .items
            .iter()
            .map(|j| (j["jobId"].as_str().unwrap(), j["priority"].as_i64().unwrap()))
            .collect();
        assert_eq!(by_id["known"], 5);
        assert_eq!(by_id["unknown"], 100);
    }

    #[tokio::test]
    async fn priority_endpoint_failure_only_costs_the_overlay() {
        let server = MockServer::start().await;
        mock_jobs(&server, json!([{"jobId": "j1"}])).await;
        Mock::given(method("GET"))
            .and(path("/jobs/priorities"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let aggregated = list_jobs(
            ClusterClient::new(5).unwrap(),
            vec![descriptor("alpha", &server.uri())],
            &identity(),
            "research",
            true,
            10,
            100,
        )
        .await;

        assert!(aggregated.failures.is_empty());
        assert_eq!(aggregated.items[0]["priority"], json!(100));
    }

    #[tokio::test]
    async fn jobs_sort_by_submission_time_descending_with_epoch_fallback() {
        let server = MockServer::start().await;
        mock_jobs(
            &server,
            json!([
                {"jobId": "mid", "jobTime": "1970-01-01T00:00:00.500Z"},
                {"jobId": "untimed", "jobTime": null},
                {"jobId": "late", "jobTime": "1970-01-01T00:00:01Z"},
            ]),
        )
        .await;
        mock_priorities(&server, json!({})).await;

        let aggregated = list_jobs(
            ClusterClient::new(5).unwrap(),
            vec![descriptor("alpha", &server.uri())],
            &identity(),
            "research",
            true,
            10,
            100,
        )
        .await;

        let ids: Vec<&str> = aggregated
            .items
            .iter()
            .map(|j| j["jobId"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["late", "mid", "untimed"]);
    }

    #[test]
    fn submission_time_handles_common_formats() {
        assert_eq!(
            submission_time_millis(&json!({"jobTime": "1970-01-01T00:00:01Z"})),
            1000
        );
        assert_eq!(
            submission_time_millis(&json!({"jobTime": "Thu, 01 Jan 1970 00:00:01 GMT"})),
            1000
        );
        assert_eq!(submission_time_millis(&json!({"jobTime": "not a date"})), 0);
        assert_eq!(submission_time_millis(&json!({})), 0);
    }

    async fn mock_teams(server: &MockServer, teams: Value) {
        Mock::given(method("GET"))
            .and(path("/ListVCs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": teams})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn teams_group_by_shared_id_across_clusters() {
        let a = MockServer::start().await;
        mock_teams(
            &a,
            json!([{
                "vcName": "research",
                "admin": true,
                "metadata": r#"{"V100": {"num_gpu_per_node": 4}, "user_quota": 8}"#,
                "quota": r#"{"V100": 16}"#,
            }]),
        )
        .await;

        let b = MockServer::start().await;
        mock_teams(
            &b,
            json!([
                {"vcName": "research", "admin": false, "metadata": "garbage", "quota": r#"{"P100": 2}"#},
                {"vcName": "platform", "admin": false},
            ]),
        )
        .await;

        let aggregated = list_teams(
            ClusterClient::new(5).unwrap(),
            vec![descriptor("alpha", &a.uri()), descriptor("beta", &b.uri())],
            &identity(),
        )
        .await;

        assert!(aggregated.failures.is_empty());
        assert_eq!(aggregated.items.len(), 2);

        let research = &aggregated.items[0];
        assert_eq!(research.id, "research");
        assert_eq!(research.clusters.len(), 2);
        assert_eq!(research.clusters[0].id, "alpha");
        assert_eq!(
            research.clusters[0].gpus["V100"],
            GpuModel {
                per_node: Some(4),
                quota: Some(16),
            }
        );
        assert_eq!(research.clusters[0].user_quota, Some(json!(8)));
        // Malformed metadata parses to nothing; quota still contributes.
        assert_eq!(
            research.clusters[1].gpus["P100"],
            GpuModel {
                per_node: None,
                quota: Some(2),
            }
        );

        let platform = &aggregated.items[1];
        assert_eq!(platform.id, "platform");
        assert_eq!(platform.clusters.len(), 1);
        assert_eq!(platform.clusters[0].id, "beta");
    }

    #[tokio::test]
    async fn quota_wins_over_metadata_for_the_same_model() {
        let server = MockServer::start().await;
        mock_teams(
            &server,
            json!([{
                "vcName": "research",
                "metadata": r#"{"V100": {"num_gpu_per_node": 4}}"#,
                "quota": r#"{"V100": 24}"#,
            }]),
        )
        .await;

        let aggregated = list_teams(
            ClusterClient::new(5).unwrap(),
            vec![descriptor("alpha", &server.uri())],
            &identity(),
        )
        .await;
        let gpus = &aggregated.items[0].clusters[0].gpus;
        assert_eq!(gpus["V100"].quota, Some(24));
        assert_eq!(gpus["V100"].per_node, Some(4));
    }

    #[tokio::test]
    async fn templates_deduplicate_in_cluster_order() {
        let a = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/templates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "pytorch", "source": "alpha"},
            ])))
            .mount(&a)
            .await;

        let b = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/templates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name": "pytorch", "source": "beta"},
                {"name": "tensorflow", "source": "beta"},
            ])))
            .mount(&b)
            .await;

        let aggregated = list_templates(
            ClusterClient::new(5).unwrap(),
            vec![descriptor("alpha", &a.uri()), descriptor("beta", &b.uri())],
            &identity(),
            "research",
        )
        .await;

        assert_eq!(aggregated.items.len(), 2);
        assert_eq!(aggregated.items[0]["name"], json!("pytorch"));
        assert_eq!(aggregated.items[0]["source"], json!("alpha"));
        assert_eq!(aggregated.items[1]["name"], json!("tensorflow"));
    }
}
