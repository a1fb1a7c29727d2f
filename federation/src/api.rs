//! HTTP surface of the gateway.
//!
//! Every route resolves the caller's identity before touching a cluster.
//! Routes under `/teams` fan out to all configured clusters; routes under
//! `/clusters/{cluster_id}` address exactly one, with `.default` resolving
//! to the first configured cluster.

use crate::aggregate::{self, TeamAggregate};
use crate::batch;
use crate::client::{ClusterClient, JobStatus};
use crate::config::{ClusterDescriptor, Config};
use crate::errors::GatewayError;
use crate::logs;
use crate::status_tree::{self, StatusTree};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::header::{COOKIE, LINK, SET_COOKIE};
use http::request::Parts;
use http::{HeaderValue, StatusCode};
use identity::directory::{self, DirectoryRecord};
use identity::resolver::resolve;
use identity::{Credentials, Identity, credential, provisioning};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: ClusterClient,
    /// Client for the identity provider, directory service, and
    /// provisioning broadcast; bounded like cluster calls.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, reqwest::Error> {
        let client = ClusterClient::new(config.upstream_timeout_secs)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upstream_timeout_secs))
            .build()?;
        Ok(AppState {
            config: Arc::new(config),
            client,
            http,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/user", get(current_user))
        .route("/teams", get(list_teams))
        .route("/teams/{team_id}/jobs", get(list_team_jobs))
        .route("/teams/{team_id}/templates", get(list_templates))
        .route("/clusters/{cluster_id}/jobs", post(submit_job))
        .route("/clusters/{cluster_id}/jobs/status", post(batch_job_status))
        .route("/clusters/{cluster_id}/jobs/{job_id}", get(job_detail))
        .route(
            "/clusters/{cluster_id}/jobs/{job_id}/status",
            post(set_job_status),
        )
        .route("/clusters/{cluster_id}/jobs/{job_id}/log", get(job_log))
        .route("/clusters/{cluster_id}/teams/{team_id}", get(team_status))
        .route("/authenticate", get(authenticate))
        .route("/authenticate/logout", get(logout))
        .with_state(state)
}

/// Authenticated caller; rejects the request with 403 when absent.
pub struct Caller(pub Identity);

/// Caller that may be anonymous. An explicit email + token pair that fails
/// verification still rejects; only a bad cookie degrades to anonymous.
pub struct MaybeCaller(pub Option<Identity>);

fn extract_credentials(parts: &Parts) -> Credentials {
    if let Some(query) = parts.uri.query() {
        let mut email = None;
        let mut token = None;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "email" => email = Some(value.into_owned()),
                "token" => token = Some(value.into_owned()),
                _ => {}
            }
        }
        if let (Some(email), Some(token)) = (email, token) {
            return Credentials::Pair { email, token };
        }
    }
    if let Some(cookie) = parts.headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
        for piece in cookie.split(';') {
            if let Some(value) = piece.trim().strip_prefix("token=")
                && !value.is_empty()
            {
                return Credentials::Cookie(value.to_string());
            }
        }
    }
    Credentials::Anonymous
}

impl FromRequestParts<AppState> for MaybeCaller {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let credentials = extract_credentials(parts);
        let identity = resolve(
            &state.config.master_secret,
            &state.config.signing_key,
            credentials,
        )?;
        Ok(MaybeCaller(identity))
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let MaybeCaller(identity) = MaybeCaller::from_request_parts(parts, state).await?;
        identity.map(Caller).ok_or(GatewayError::Unauthenticated)
    }
}

fn resolve_cluster(state: &AppState, id: &str) -> Result<ClusterDescriptor, GatewayError> {
    state
        .config
        .cluster(id)
        .ok_or(GatewayError::NotFound("cluster"))
}

/// Forward an upstream reply, keeping JSON bodies as JSON.
fn upstream_reply(text: String) -> Response {
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => Json(value).into_response(),
        Err(_) => text.into_response(),
    }
}

async fn current_user(Caller(identity): Caller) -> Json<Value> {
    Json(json!({
        "email": identity.email,
        "token": identity.token_hex(),
        "uid": identity.uid,
        "gid": identity.gid,
        "givenName": identity.given_name,
        "familyName": identity.family_name,
    }))
}

async fn list_teams(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> Result<Json<Vec<TeamAggregate>>, GatewayError> {
    let aggregated =
        aggregate::list_teams(state.client.clone(), state.config.descriptors(), &identity).await;
    Ok(Json(aggregated.items))
}

fn default_limit() -> u32 {
    10
}

#[derive(Deserialize)]
struct JobListQuery {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    user: Option<String>,
}

async fn list_team_jobs(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(team_id): Path<String>,
    Query(query): Query<JobListQuery>,
) -> Result<Json<Vec<Value>>, GatewayError> {
    let all = query.user.as_deref() == Some("all");
    let aggregated = aggregate::list_jobs(
        state.client.clone(),
        state.config.descriptors(),
        &identity,
        &team_id,
        all,
        query.limit,
        state.config.default_job_priority,
    )
    .await;
    Ok(Json(aggregated.items))
}

async fn list_templates(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(team_id): Path<String>,
) -> Result<Json<Vec<Value>>, GatewayError> {
    let aggregated = aggregate::list_templates(
        state.client.clone(),
        state.config.descriptors(),
        &identity,
        &team_id,
    )
    .await;
    Ok(Json(aggregated.items))
}

async fn submit_job(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(cluster_id): Path<String>,
    Json(job): Json<Value>,
) -> Result<Response, GatewayError> {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let reply = state.client.submit_job(&cluster, &identity, &job).await?;
    Ok(upstream_reply(reply))
}

async fn job_detail(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path((cluster_id, job_id)): Path<(String, String)>,
) -> Result<Json<Value>, GatewayError> {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let detail = state.client.job_detail(&cluster, &identity, &job_id).await?;
    Ok(Json(detail))
}

async fn set_job_status(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path((cluster_id, job_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<Response, GatewayError> {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let status: JobStatus = serde_json::from_value(body["status"].clone())
        .map_err(|_| GatewayError::Validation("unsupported job status".to_string()))?;
    let reply = state
        .client
        .set_job_status(&cluster, &identity, &job_id, status)
        .await?;
    Ok(upstream_reply(reply))
}

async fn batch_job_status(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path(cluster_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, GatewayError> {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let Some(map) = body.get("status").and_then(Value::as_object) else {
        return Err(GatewayError::Validation(
            "status must be a map of job id to target status".to_string(),
        ));
    };
    let mut changes = HashMap::new();
    for (job_id, value) in map.clone() {
        let status: JobStatus = serde_json::from_value(value).map_err(|_| {
            GatewayError::Validation(format!("unsupported job status for {job_id}"))
        })?;
        changes.insert(job_id, status);
    }

    let outcome = batch::dispatch(&state.client, &cluster, &identity, &changes).await;
    let status = if outcome.any_failed() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.to_body())).into_response())
}

#[derive(Deserialize)]
struct LogQuery {
    #[serde(default)]
    cursor: Option<String>,
}

async fn job_log(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path((cluster_id, job_id)): Path<(String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<Response, GatewayError> {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let chunk = state
        .client
        .job_log(&cluster, &identity, &job_id, query.cursor.as_deref())
        .await?;
    if chunk.is_empty() {
        return Err(GatewayError::NotFound("log"));
    }

    let mut response = Json(chunk.log.clone()).into_response();
    if let Some(cursor) = chunk.cursor_param()
        && let Ok(value) = HeaderValue::from_str(&logs::next_link(&cluster.id, &job_id, &cursor))
    {
        response.headers_mut().insert(LINK, value);
    }
    Ok(response)
}

async fn team_status(
    State(state): State<AppState>,
    Caller(identity): Caller,
    Path((cluster_id, team_id)): Path<(String, String)>,
) -> Result<Json<StatusTree>, GatewayError> {
    let cluster = resolve_cluster(&state, &cluster_id)?;
    let payload = state
        .client
        .team_status(&cluster, &identity, &team_id)
        .await?
        .ok_or(GatewayError::NotFound("team"))?;
    let mut tree = status_tree::denormalize(&payload);
    tree.config = cluster.display;
    Ok(Json(tree))
}

#[derive(Deserialize)]
struct AuthQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

async fn authenticate(
    State(state): State<AppState>,
    Query(query): Query<AuthQuery>,
) -> Result<Response, GatewayError> {
    let Some(oauth) = &state.config.oauth else {
        return Err(GatewayError::NotFound("interactive login"));
    };

    if let Some(error) = &query.error {
        tracing::warn!(error, "login rejected by provider");
        return Ok(Redirect::to("/").into_response());
    }
    let Some(code) = &query.code else {
        return Ok(Redirect::to(oauth.authorization_url().as_str()).into_response());
    };

    let claims = oauth.exchange_code(&state.http, code).await?;
    let mut identity = Identity::from_email(&state.config.master_secret, &claims.email);
    identity.given_name = claims.given_name;
    identity.family_name = claims.family_name;

    let mut record = DirectoryRecord::default();
    if let Some(directory_url) = &state.config.directory_url {
        match directory::lookup(&state.http, directory_url, &identity.email).await {
            Ok(found) => record = found,
            Err(error) => {
                tracing::warn!(email = identity.email, %error, "directory lookup failed")
            }
        }
    }
    identity.uid = record.uid;
    identity.gid = record.gid;

    let clusters: Vec<(String, Url)> = state
        .config
        .descriptors()
        .into_iter()
        .map(|cluster| (cluster.id, cluster.base_url))
        .collect();
    provisioning::spawn_broadcast(state.http.clone(), clusters, identity.clone(), record);

    let cookie = credential::seal(&state.config.signing_key, &identity.to_claims());
    let header = format!("token={cookie}; Path=/; HttpOnly");
    Ok(([(SET_COOKIE, header)], Redirect::to("/")).into_response())
}

async fn logout() -> impl IntoResponse {
    let header = "token=; Path=/; HttpOnly; Max-Age=0";
    ([(SET_COOKIE, header)], Redirect::to("/"))
}
