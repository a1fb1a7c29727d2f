//! Directory-service lookup for uid/gid/group membership.
//!
//! Callers treat failures as best-effort: an unreachable directory means the
//! identity simply carries no uid/gid metadata.

use serde::Deserialize;
use url::Url;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DirectoryRecord {
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// Look up a user's posix account data by email.
pub async fn lookup(
    client: &reqwest::Client,
    base_url: &Url,
    email: &str,
) -> Result<DirectoryRecord, reqwest::Error> {
    let response = client
        .get(base_url.clone())
        .query(&[("userName", email)])
        .send()
        .await?
        .error_for_status()?;
    response.json().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn looks_up_posix_data() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("userName", "a@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "uid": 1001,
                "gid": 500,
                "groups": ["research"],
            })))
            .mount(&mock_server)
            .await;

        let url = Url::parse(&mock_server.uri()).unwrap();
        let record = lookup(&reqwest::Client::new(), &url, "a@example.com")
            .await
            .unwrap();
        assert_eq!(record.uid, Some(1001));
        assert_eq!(record.gid, Some(500));
        assert_eq!(record.groups, vec!["research".to_string()]);
    }

    #[tokio::test]
    async fn propagates_http_errors() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let url = Url::parse(&mock_server.uri()).unwrap();
        let result = lookup(&reqwest::Client::new(), &url, "a@example.com").await;
        assert!(result.is_err());
    }
}
