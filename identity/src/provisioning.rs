//! Post-login user provisioning broadcast.
//!
//! After an interactive login establishes an identity, every configured
//! cluster receives a create/sync user call carrying the derived token and
//! any directory-sourced posix data. The broadcast is best effort: failures
//! are logged, never surfaced to the caller, and never retried.

use crate::directory::DirectoryRecord;
use crate::resolver::Identity;
use url::Url;

/// Issue the add-user call against every cluster and wait for completion.
pub async fn broadcast_once(
    client: &reqwest::Client,
    clusters: &[(String, Url)],
    identity: &Identity,
    record: &DirectoryRecord,
) {
    let mut set = tokio::task::JoinSet::new();
    for (cluster_id, base_url) in clusters {
        let client = client.clone();
        let cluster_id = cluster_id.clone();
        let base_url = base_url.clone();
        let identity = identity.clone();
        let record = record.clone();
        set.spawn(async move {
            sync_user(&client, &cluster_id, &base_url, &identity, &record).await;
        });
    }
    while set.join_next().await.is_some() {}
}

/// Fire the broadcast in the background and return immediately.
pub fn spawn_broadcast(
    client: reqwest::Client,
    clusters: Vec<(String, Url)>,
    identity: Identity,
    record: DirectoryRecord,
) {
    tokio::spawn(async move {
        broadcast_once(&client, &clusters, &identity, &record).await;
    });
}

async fn sync_user(
    client: &reqwest::Client,
    cluster_id: &str,
    base_url: &Url,
    identity: &Identity,
    record: &DirectoryRecord,
) {
    let url = match base_url.join("AddUser") {
        Ok(url) => url,
        Err(error) => {
            tracing::warn!(cluster = cluster_id, %error, "bad cluster base URL");
            return;
        }
    };

    let mut params = vec![
        ("userName".to_string(), identity.email.clone()),
        ("password".to_string(), identity.token_hex()),
    ];
    if let Some(uid) = record.uid.or(identity.uid) {
        params.push(("uid".to_string(), uid.to_string()));
    }
    if let Some(gid) = record.gid.or(identity.gid) {
        params.push(("gid".to_string(), gid.to_string()));
    }
    if !record.groups.is_empty() {
        params.push(("groups".to_string(), record.groups.join(",")));
    }

    match client.get(url).query(&params).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::info!(cluster = cluster_id, email = identity.email, "user synced");
        }
        Ok(response) => {
            tracing::warn!(
                cluster = cluster_id,
                email = identity.email,
                status = response.status().as_u16(),
                "user sync rejected"
            );
        }
        Err(error) => {
            tracing::warn!(cluster = cluster_id, email = identity.email, %error, "user sync failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn broadcasts_to_every_cluster() {
        let alpha = MockServer::start().await;
        let beta = MockServer::start().await;
        for server in [&alpha, &beta] {
            Mock::given(method("GET"))
                .and(path("/AddUser"))
                .and(query_param("userName", "a@example.com"))
                .and(query_param("uid", "1001"))
                .respond_with(ResponseTemplate::new(200))
                .expect(1)
                .mount(server)
                .await;
        }

        let clusters = vec![
            ("alpha".to_string(), Url::parse(&alpha.uri()).unwrap()),
            ("beta".to_string(), Url::parse(&beta.uri()).unwrap()),
        ];
        let identity = Identity::from_email("master", "a@example.com");
        let record = DirectoryRecord {
            uid: Some(1001),
            gid: Some(500),
            groups: vec!["research".to_string()],
        };

        broadcast_once(&reqwest::Client::new(), &clusters, &identity, &record).await;
    }

    #[tokio::test]
    async fn one_failing_cluster_does_not_stop_the_rest() {
        let alpha = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/AddUser"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&alpha)
            .await;
        let beta = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/AddUser"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&beta)
            .await;

        let clusters = vec![
            ("alpha".to_string(), Url::parse(&alpha.uri()).unwrap()),
            ("beta".to_string(), Url::parse(&beta.uri()).unwrap()),
        ];
        let identity = Identity::from_email("master", "a@example.com");

        // Completes without error despite alpha's 500.
        broadcast_once(
            &reqwest::Client::new(),
            &clusters,
            &identity,
            &DirectoryRecord::default(),
        )
        .await;
    }
}
