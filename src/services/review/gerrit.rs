//! Gerrit REST client

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::ChangeReviewClient;
use crate::config::ReviewConfig;
use crate::error::{RegvaultError, Result};
use crate::models::{ChangeInfo, ChangeKind, ChangeStatus, TransitionOutcome};

/// Prefix Gerrit puts in front of every JSON body
const XSSI_PREFIX: &str = ")]}'";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const CHANGE_OPTIONS: &[(&str, &str)] = &[
    ("o", "LABELS"),
    ("o", "CURRENT_REVISION"),
    ("o", "DETAILED_ACCOUNTS"),
];

#[derive(Deserialize)]
struct ApiChange {
    id: String,
    project: String,
    branch: String,
    topic: Option<String>,
    change_id: String,
    subject: String,
    status: String,
    created: Option<String>,
    updated: Option<String>,
    submitted: Option<String>,
    mergeable: Option<bool>,
    #[serde(rename = "_number")]
    number: u64,
    owner: Option<ApiAccount>,
    #[serde(default)]
    labels: BTreeMap<String, ApiLabel>,
    current_revision: Option<String>,
    #[serde(default)]
    revisions: BTreeMap<String, ApiRevision>,
}

#[derive(Deserialize)]
struct ApiAccount {
    username: Option<String>,
    name: Option<String>,
    email: Option<String>,
}

#[derive(Deserialize)]
struct ApiLabel {
    approved: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ApiRevision {
    #[serde(rename = "ref")]
    fetch_ref: Option<String>,
}

#[derive(Deserialize)]
struct ApiFileInfo {
    status: Option<String>,
}

#[derive(Serialize)]
struct ApiChangeInput<'a> {
    project: &'a str,
    branch: &'a str,
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
}

#[derive(Serialize)]
struct ApiReviewInput<'a> {
    labels: BTreeMap<&'a str, i16>,
}

impl From<ApiChange> for ChangeInfo {
    fn from(api: ApiChange) -> Self {
        let current_ref = api
            .current_revision
            .as_ref()
            .and_then(|rev| api.revisions.get(rev))
            .and_then(|rev| rev.fetch_ref.clone());

        let owner = api
            .owner
            .and_then(|o| o.username.or(o.name).or(o.email));

        let labels = api
            .labels
            .into_iter()
            .map(|(name, label)| (name, label.approved.is_some()))
            .collect();

        ChangeInfo {
            number: api.number,
            change_id: api.change_id,
            id: api.id,
            project: api.project,
            branch: api.branch,
            subject: api.subject,
            topic: api.topic,
            owner,
            mergeable: api.mergeable,
            status: ChangeStatus::from_gerrit(&api.status),
            created: api.created.as_deref().and_then(parse_timestamp),
            updated: api.updated.as_deref().and_then(parse_timestamp),
            submitted: api.submitted.as_deref().and_then(parse_timestamp),
            labels,
            current_ref,
        }
    }
}

/// Gerrit change-review client
pub struct GerritClient {
    base_url: String,
    project: String,
    head_branch: String,
    username: Option<String>,
    password: Option<String>,
    client: reqwest::Client,
}

impl GerritClient {
    pub fn new(config: &ReviewConfig, head_branch: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RegvaultError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            head_branch: head_branch.to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
        })
    }

    /// Authenticated requests go through Gerrit's `/a/` prefix
    fn url(&self, path: &str) -> String {
        if self.username.is_some() {
            format!("{}/a/{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn change_path(change_key: &str, suffix: &str) -> String {
        format!("changes/{}{}", urlencoding::encode(change_key), suffix)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_ref()),
            None => request,
        }
    }

    /// Authorize and send a request, whatever status comes back
    async fn dispatch(&self, request: RequestBuilder) -> Result<Response> {
        let request = self.authorize(request).build().map_err(|e| {
            RegvaultError::ReviewCommunication(format!("Failed to build Gerrit request: {}", e))
        })?;
        tracing::debug!("Gerrit {} {}", request.method(), request.url().path());

        self.client.execute(request).await.map_err(|e| {
            RegvaultError::ReviewCommunication(format!("Failed to reach Gerrit: {}", e))
        })
    }

    /// Send a request and map failures. `change_key` names the change a 404
    /// refers to; without one a 404 is a communication failure.
    async fn send(&self, request: RequestBuilder, change_key: Option<&str>) -> Result<Response> {
        let response = self.dispatch(request).await?;
        check_status(response, change_key).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        change_key: Option<&str>,
    ) -> Result<T> {
        let request = self.client.get(self.url(path)).query(query);
        let response = self.send(request, change_key).await?;
        read_json(response).await
    }

    /// POST a lifecycle action; a 409 is the service refusing it
    async fn transition(&self, change_key: &str, action: &str) -> Result<TransitionOutcome> {
        let path = Self::change_path(change_key, &format!("/{}", action));
        let request = self
            .client
            .post(self.url(&path))
            .json(&serde_json::Map::new());
        let response = self.dispatch(request).await?;

        if response.status() == StatusCode::CONFLICT {
            let reason = response.text().await.unwrap_or_default();
            tracing::info!("Gerrit refused {} on {}: {}", action, change_key, reason.trim());
            return Ok(TransitionOutcome::Rejected(reason.trim().to_string()));
        }

        check_status(response, Some(change_key)).await?;
        Ok(TransitionOutcome::Applied)
    }
}

#[async_trait]
impl ChangeReviewClient for GerritClient {
    fn head_branch(&self) -> &str {
        &self.head_branch
    }

    async fn change_by_number(&self, number: u64) -> Result<ChangeInfo> {
        let key = format!("{}~{}", self.project, number);
        let change: ApiChange = self
            .get_json(&Self::change_path(&key, ""), CHANGE_OPTIONS, Some(&number.to_string()))
            .await?;
        Ok(change.into())
    }

    async fn change_metadata(&self, change_key: &str) -> Result<ChangeInfo> {
        let change: ApiChange = self
            .get_json(&Self::change_path(change_key, ""), CHANGE_OPTIONS, Some(change_key))
            .await?;
        Ok(change.into())
    }

    async fn changed_files(&self, change_key: &str) -> Result<BTreeMap<String, ChangeKind>> {
        let files: BTreeMap<String, ApiFileInfo> = self
            .get_json(
                &Self::change_path(change_key, "/revisions/current/files"),
                &[],
                Some(change_key),
            )
            .await?;

        // Magic entries such as /COMMIT_MSG are not repository files
        Ok(files
            .into_iter()
            .filter(|(path, _)| !path.starts_with('/'))
            .map(|(path, info)| (path, ChangeKind::from_code(info.status.as_deref())))
            .collect())
    }

    async fn rebase(&self, change_key: &str) -> Result<TransitionOutcome> {
        self.transition(change_key, "rebase").await
    }

    async fn submit(&self, change_key: &str) -> Result<TransitionOutcome> {
        self.transition(change_key, "submit").await
    }

    async fn decline(&self, change_key: &str) -> Result<TransitionOutcome> {
        self.transition(change_key, "abandon").await
    }

    async fn post_review(&self, change_key: &str, label: &str, value: i16) -> Result<()> {
        let path = Self::change_path(change_key, "/revisions/current/review");
        let body = ApiReviewInput {
            labels: BTreeMap::from([(label, value)]),
        };
        self.send(self.client.post(self.url(&path)).json(&body), Some(change_key))
            .await?;
        Ok(())
    }

    async fn open_changes(&self) -> Result<Vec<ChangeInfo>> {
        let q = format!("project:{} status:open", self.project);
        let mut query = vec![("q", q.as_str())];
        query.extend_from_slice(CHANGE_OPTIONS);

        let changes: Vec<ApiChange> = self.get_json("changes/", &query, None).await?;
        Ok(changes.into_iter().map(ChangeInfo::from).collect())
    }

    async fn create_change(
        &self,
        subject: &str,
        description: Option<&str>,
    ) -> Result<ChangeInfo> {
        let body = ApiChangeInput {
            project: &self.project,
            branch: &self.head_branch,
            subject,
            topic: description,
        };
        let response = self
            .send(self.client.post(self.url("changes/")).json(&body), None)
            .await?;
        let change: ApiChange = read_json(response).await?;
        tracing::info!("Created change {} '{}'", change.number, subject);
        Ok(change.into())
    }

    async fn last_merged(&self) -> Result<Option<ChangeInfo>> {
        let q = format!(
            "project:{} branch:{} status:merged",
            self.project, self.head_branch
        );
        let mut query = vec![("q", q.as_str()), ("n", "1")];
        query.extend_from_slice(CHANGE_OPTIONS);

        let changes: Vec<ApiChange> = self.get_json("changes/", &query, None).await?;
        Ok(changes.into_iter().next().map(ChangeInfo::from))
    }
}

async fn check_status(response: Response, change_key: Option<&str>) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if let (StatusCode::NOT_FOUND, Some(key)) = (status, change_key) {
        return Err(RegvaultError::ChangeNotFound(key.to_string()));
    }

    let body = response.text().await.unwrap_or_default();
    Err(RegvaultError::ReviewCommunication(format!(
        "Gerrit API error ({}): {}",
        status,
        body.trim()
    )))
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.text().await.map_err(|e| {
        RegvaultError::ReviewCommunication(format!("Failed to read Gerrit response: {}", e))
    })?;
    parse_body(&body)
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    let json = body.trim_start().strip_prefix(XSSI_PREFIX).unwrap_or(body);
    serde_json::from_str(json).map_err(|e| {
        RegvaultError::ReviewCommunication(format!("Failed to parse Gerrit response: {}", e))
    })
}

/// Gerrit timestamps are UTC without a zone marker
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use mockito::Matcher;

    const CHANGE_BODY: &str = r#")]}'
{
  "id": "registry~42",
  "project": "registry",
  "branch": "master",
  "change_id": "I8473b95934b5732ac55d26311a706c9c2bde9940",
  "subject": "Add citizen form",
  "status": "NEW",
  "created": "2024-03-01 09:59:32.126000000",
  "updated": "2024-03-02 10:00:00.000000000",
  "mergeable": true,
  "_number": 42,
  "owner": {"_account_id": 1000096, "name": "John Doe", "username": "jdoe"},
  "labels": {"Code-Review": {"approved": {"_account_id": 1}}, "Verified": {}},
  "current_revision": "184ebe53805e102605d11f6b143486d15c23a09c",
  "revisions": {
    "184ebe53805e102605d11f6b143486d15c23a09c": {"_number": 2, "ref": "refs/changes/42/42/2"}
  }
}"#;

    fn client_for(server: &mockito::Server, username: Option<&str>) -> GerritClient {
        let config = ReviewConfig {
            base_url: server.url(),
            project: "registry".to_string(),
            username: username.map(str::to_string),
            password: username.map(|_| "secret".to_string()),
            timeout_secs: 5,
        };
        GerritClient::new(&config, "master").unwrap()
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2024-03-01 09:59:32.126000000").unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 3, 1));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (9, 59, 32));
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_parse_body_without_prefix() {
        let values: Vec<u32> = parse_body("[1, 2]").unwrap();
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_change_by_number_maps_fields() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/changes/registry~42")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(CHANGE_BODY)
            .create_async()
            .await;

        let change = client_for(&server, None).change_by_number(42).await.unwrap();
        mock.assert_async().await;

        assert_eq!(change.number, 42);
        assert_eq!(change.id, "registry~42");
        assert_eq!(change.status, ChangeStatus::Open);
        assert_eq!(change.owner.as_deref(), Some("jdoe"));
        assert_eq!(change.current_ref.as_deref(), Some("refs/changes/42/42/2"));
        assert_eq!(change.labels.get("Code-Review"), Some(&true));
        assert_eq!(change.labels.get("Verified"), Some(&false));
        assert!(change.created.is_some());
        assert!(change.submitted.is_none());
    }

    #[tokio::test]
    async fn test_authenticated_requests_use_prefix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/a/changes/registry~42")
            .match_query(Matcher::Any)
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .with_status(200)
            .with_body(CHANGE_BODY)
            .create_async()
            .await;

        client_for(&server, Some("admin"))
            .change_by_number(42)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_change_is_change_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/changes/registry~7")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body("Not found: registry~7")
            .create_async()
            .await;

        let result = client_for(&server, None).change_by_number(7).await;
        assert!(matches!(result, Err(RegvaultError::ChangeNotFound(n)) if n == "7"));
    }

    #[tokio::test]
    async fn test_server_error_is_communication_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/changes/registry~7")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let result = client_for(&server, None).change_by_number(7).await;
        assert!(matches!(result, Err(RegvaultError::ReviewCommunication(_))));
    }

    #[tokio::test]
    async fn test_changed_files_skips_magic_entries() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/changes/registry~42/revisions/current/files")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#")]}'
{
  "/COMMIT_MSG": {"status": "A"},
  "forms/a.json": {"lines_inserted": 3},
  "forms/b.json": {"status": "A"},
  "bpmn/c.bpmn": {"status": "D"},
  "bpmn/d.bpmn": {"status": "R", "old_path": "bpmn/old.bpmn"}
}"#,
            )
            .create_async()
            .await;

        let files = client_for(&server, None)
            .changed_files("registry~42")
            .await
            .unwrap();

        assert_eq!(files.len(), 4);
        assert_eq!(files["forms/a.json"], ChangeKind::Modified);
        assert_eq!(files["forms/b.json"], ChangeKind::Added);
        assert_eq!(files["bpmn/c.bpmn"], ChangeKind::Deleted);
        assert_eq!(files["bpmn/d.bpmn"], ChangeKind::Renamed);
    }

    #[tokio::test]
    async fn test_conflicting_submit_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/changes/registry~42/submit")
            .with_status(409)
            .with_body("change is merged\n")
            .create_async()
            .await;

        let outcome = client_for(&server, None).submit("registry~42").await.unwrap();
        assert_eq!(outcome, TransitionOutcome::Rejected("change is merged".to_string()));
    }

    #[tokio::test]
    async fn test_transition_on_missing_change_is_change_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/a/changes/registry~7/rebase")
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("POST", "/a/changes/registry~8/rebase")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let client = client_for(&server, Some("admin"));
        assert!(matches!(
            client.rebase("registry~7").await,
            Err(RegvaultError::ChangeNotFound(k)) if k == "registry~7"
        ));
        assert!(matches!(
            client.rebase("registry~8").await,
            Err(RegvaultError::ReviewCommunication(m)) if m.contains("maintenance")
        ));
    }

    #[tokio::test]
    async fn test_abandon_applied() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/changes/registry~42/abandon")
            .with_status(200)
            .with_body(CHANGE_BODY)
            .create_async()
            .await;

        let outcome = client_for(&server, None).decline("registry~42").await.unwrap();
        mock.assert_async().await;
        assert!(outcome.is_applied());
    }

    #[tokio::test]
    async fn test_post_review_sends_label() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/changes/registry~42/revisions/current/review")
            .match_body(Matcher::PartialJsonString(
                r#"{"labels": {"Code-Review": 2}}"#.to_string(),
            ))
            .with_status(200)
            .with_body(")]}'\n{}")
            .create_async()
            .await;

        client_for(&server, None)
            .post_review("registry~42", "Code-Review", 2)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_last_merged_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/changes/")
            .match_query(Matcher::UrlEncoded(
                "q".to_string(),
                "project:registry branch:master status:merged".to_string(),
            ))
            .with_status(200)
            .with_body(")]}'\n[]")
            .create_async()
            .await;

        let merged = client_for(&server, None).last_merged().await.unwrap();
        assert!(merged.is_none());
    }

    #[tokio::test]
    async fn test_create_change_posts_to_head_branch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/changes/")
            .match_body(Matcher::PartialJsonString(
                r#"{"project": "registry", "branch": "master", "subject": "Add citizen form"}"#
                    .to_string(),
            ))
            .with_status(201)
            .with_body(CHANGE_BODY)
            .create_async()
            .await;

        let change = client_for(&server, None)
            .create_change("Add citizen form", None)
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(change.number, 42);
    }
}
