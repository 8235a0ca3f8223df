//! `reqwest` client for an Azure DevOps style REST API.
//!
//! Every call authenticates with the tenant's personal access token as the
//! basic-auth password and targets `{base}/{organization}/{project}/_apis/...`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::client::{Build, PullRequest, TrackerClient, TrackerError, WorkItem};
use crate::settings::TrackerCredentials;

const API_VERSION: &str = "7.0";
/// Upper bound on work items fetched per poll.
const MAX_WORK_ITEMS: usize = 200;
const MAX_BUILDS: &str = "50";
const MAX_ERROR_BODY: usize = 512;

const WORK_ITEM_FIELDS: &str = "System.Title,System.State,System.AssignedTo,\
                                Microsoft.VSTS.Scheduling.DueDate,System.ChangedDate";

#[derive(Debug, Clone)]
pub struct HttpTrackerClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTrackerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TrackerError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("devpulse-scheduler")
            .build()
            .map_err(|e| TrackerError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn project_url(&self, credentials: &TrackerCredentials, path: &str) -> String {
        format!(
            "{}/{}/{}/_apis/{}",
            self.base_url,
            credentials.organization.trim(),
            credentials.project.trim(),
            path
        )
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
        credentials: &TrackerCredentials,
    ) -> Result<T, TrackerError> {
        let response = request
            .basic_auth("", Some(credentials.personal_access_token.trim()))
            .query(&[("api-version", API_VERSION)])
            .send()
            .await
            .map_err(|e| TrackerError::Transport(format!("{operation}: {e}")))?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "tracker response");

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(TrackerError::Unauthorized);
        }
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate(&mut body, MAX_ERROR_BODY);
            return Err(TrackerError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| TrackerError::Decode(format!("{operation}: {e}")))
    }
}

#[async_trait]
impl TrackerClient for HttpTrackerClient {
    async fn list_work_items(
        &self,
        credentials: &TrackerCredentials,
    ) -> Result<Vec<WorkItem>, TrackerError> {
        let query = json!({
            "query": "SELECT [System.Id] FROM WorkItems \
                      WHERE [System.TeamProject] = @project \
                      AND [System.State] <> 'Removed' \
                      ORDER BY [System.ChangedDate] DESC"
        });
        let refs: WiqlResponse = self
            .send(
                "wiql",
                self.http
                    .post(self.project_url(credentials, "wit/wiql"))
                    .json(&query),
                credentials,
            )
            .await?;

        let ids: Vec<String> = refs
            .work_items
            .iter()
            .take(MAX_WORK_ITEMS)
            .map(|r| r.id.to_string())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let batch: ValueList<RawWorkItem> = self
            .send(
                "work_items",
                self.http
                    .get(self.project_url(credentials, "wit/workitems"))
                    .query(&[("ids", ids.join(",")), ("fields", WORK_ITEM_FIELDS.to_string())]),
                credentials,
            )
            .await?;

        Ok(batch.value.into_iter().map(WorkItem::from).collect())
    }

    async fn list_builds(
        &self,
        credentials: &TrackerCredentials,
    ) -> Result<Vec<Build>, TrackerError> {
        let list: ValueList<RawBuild> = self
            .send(
                "builds",
                self.http
                    .get(self.project_url(credentials, "build/builds"))
                    .query(&[("$top", MAX_BUILDS)]),
                credentials,
            )
            .await?;
        Ok(list.value.into_iter().map(Build::from).collect())
    }

    async fn list_pull_requests(
        &self,
        credentials: &TrackerCredentials,
    ) -> Result<Vec<PullRequest>, TrackerError> {
        let list: ValueList<RawPullRequest> = self
            .send(
                "pull_requests",
                self.http
                    .get(self.project_url(credentials, "git/pullrequests"))
                    .query(&[("searchCriteria.status", "active")]),
                credentials,
            )
            .await?;
        Ok(list.value.into_iter().map(PullRequest::from).collect())
    }
}

fn truncate(s: &mut String, max: usize) {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
}

// Wire shapes.

#[derive(Debug, Deserialize)]
struct ValueList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResponse {
    #[serde(default)]
    work_items: Vec<WorkItemRef>,
}

#[derive(Debug, Deserialize)]
struct WorkItemRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RawWorkItem {
    id: u64,
    #[serde(default)]
    fields: RawWorkItemFields,
}

#[derive(Debug, Default, Deserialize)]
struct RawWorkItemFields {
    #[serde(rename = "System.Title", default)]
    title: String,
    #[serde(rename = "System.State", default)]
    state: String,
    #[serde(rename = "System.AssignedTo")]
    assigned_to: Option<IdentityRef>,
    #[serde(rename = "Microsoft.VSTS.Scheduling.DueDate")]
    due_date: Option<DateTime<Utc>>,
    #[serde(rename = "System.ChangedDate")]
    changed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityRef {
    display_name: Option<String>,
    unique_name: Option<String>,
}

impl IdentityRef {
    fn name(self) -> Option<String> {
        self.display_name.or(self.unique_name)
    }
}

impl From<RawWorkItem> for WorkItem {
    fn from(raw: RawWorkItem) -> Self {
        WorkItem {
            id: raw.id,
            title: raw.fields.title,
            state: raw.fields.state,
            assigned_to: raw.fields.assigned_to.and_then(IdentityRef::name),
            due_date: raw.fields.due_date,
            changed_at: raw.fields.changed_date,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBuild {
    id: u64,
    #[serde(default)]
    build_number: String,
    #[serde(default)]
    status: String,
    result: Option<String>,
    definition: Option<NamedRef>,
    finish_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

impl From<RawBuild> for Build {
    fn from(raw: RawBuild) -> Self {
        Build {
            id: raw.id,
            build_number: raw.build_number,
            definition: raw.definition.map(|d| d.name).unwrap_or_default(),
            status: raw.status,
            result: raw.result,
            finished_at: raw.finish_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPullRequest {
    pull_request_id: u64,
    #[serde(default)]
    title: String,
    repository: Option<NamedRef>,
    created_by: Option<IdentityRef>,
    creation_date: DateTime<Utc>,
}

impl From<RawPullRequest> for PullRequest {
    fn from(raw: RawPullRequest) -> Self {
        PullRequest {
            id: raw.pull_request_id,
            title: raw.title,
            repository: raw.repository.map(|r| r.name).unwrap_or_default(),
            created_by: raw.created_by.and_then(IdentityRef::name),
            created_at: raw.creation_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_item_payload_maps_fields() {
        let raw: ValueList<RawWorkItem> = serde_json::from_value(json!({
            "count": 1,
            "value": [{
                "id": 17,
                "fields": {
                    "System.Title": "Broken nav",
                    "System.State": "Active",
                    "System.AssignedTo": { "displayName": "Dana", "uniqueName": "dana@acme.io" },
                    "Microsoft.VSTS.Scheduling.DueDate": "2024-04-30T00:00:00Z"
                }
            }]
        }))
        .unwrap();

        let items: Vec<WorkItem> = raw.value.into_iter().map(WorkItem::from).collect();
        assert_eq!(items[0].id, 17);
        assert_eq!(items[0].assigned_to.as_deref(), Some("Dana"));
        assert!(items[0].due_date.is_some());
        assert!(items[0].changed_at.is_none());
    }

    #[test]
    fn build_and_pull_request_payloads_map() {
        let builds: ValueList<RawBuild> = serde_json::from_value(json!({
            "value": [{
                "id": 5,
                "buildNumber": "20240501.3",
                "status": "completed",
                "result": "failed",
                "definition": { "name": "ci" },
                "finishTime": "2024-05-01T10:00:00Z"
            }]
        }))
        .unwrap();
        let build = Build::from(builds.value.into_iter().next().unwrap());
        assert_eq!(build.definition, "ci");
        assert_eq!(build.result.as_deref(), Some("failed"));

        let prs: ValueList<RawPullRequest> = serde_json::from_value(json!({
            "value": [{
                "pullRequestId": 99,
                "title": "Add health check",
                "repository": { "name": "web" },
                "createdBy": { "uniqueName": "sam@acme.io" },
                "creationDate": "2024-05-01T09:00:00Z"
            }]
        }))
        .unwrap();
        let pr = PullRequest::from(prs.value.into_iter().next().unwrap());
        assert_eq!(pr.id, 99);
        assert_eq!(pr.created_by.as_deref(), Some("sam@acme.io"));
    }

    #[test]
    fn urls_are_project_scoped() {
        let client = HttpTrackerClient::new("https://dev.azure.com/", Duration::from_secs(5)).unwrap();
        let creds = TrackerCredentials::new("acme", "web", "pat");
        assert_eq!(
            client.project_url(&creds, "build/builds"),
            "https://dev.azure.com/acme/web/_apis/build/builds"
        );
    }

    #[test]
    fn long_error_bodies_are_truncated_on_char_boundary() {
        let mut body = "é".repeat(400);
        truncate(&mut body, 511);
        assert!(body.len() <= 511);
        assert!(body.is_char_boundary(body.len()));
    }
}
