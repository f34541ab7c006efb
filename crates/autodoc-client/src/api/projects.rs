//! Project CRUD and the persisted pipeline log.

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    consumer::PipelineEvent,
    error::TransportResult,
    http::{ApiClient, RequestOptions},
};

/// A documentation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Every other field the backend sends.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Body for [`ProjectsApi::create`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NewProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo_url: None,
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn repo_url(mut self, url: impl Into<String>) -> Self {
        self.repo_url = Some(url.into());
        self
    }
}

/// Partial update for [`ProjectsApi::update`]. Unset fields are left alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EventList {
    Keyed { events: Vec<PipelineEvent> },
    Plain(Vec<PipelineEvent>),
}

/// Project endpoints.
#[derive(Debug, Clone, Copy)]
pub struct ProjectsApi<'a> {
    client: &'a ApiClient,
}

impl<'a> ProjectsApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    pub async fn list(&self) -> TransportResult<Vec<Project>> {
        self.client.get("/projects").await
    }

    pub async fn get(&self, id: &str) -> TransportResult<Project> {
        self.client.get(&project_path(id)).await
    }

    pub async fn create(&self, project: &NewProject) -> TransportResult<Project> {
        self.client.post("/projects", project).await
    }

    pub async fn update(&self, id: &str, patch: &ProjectPatch) -> TransportResult<Project> {
        self.client.patch(&project_path(id), patch).await
    }

    /// Delete a project. Any response body is ignored.
    pub async fn delete(&self, id: &str) -> TransportResult<()> {
        self.client
            .request(Method::DELETE, &project_path(id), RequestOptions::new())
            .await?;
        Ok(())
    }

    /// The persisted pipeline log, oldest first (the backend keeps the last 200).
    pub async fn events(&self, id: &str) -> TransportResult<Vec<PipelineEvent>> {
        let list: EventList = self
            .client
            .get(&format!("{}/events", project_path(id)))
            .await?;
        Ok(match list {
            EventList::Keyed { events } | EventList::Plain(events) => events,
        })
    }
}

fn project_path(id: &str) -> String {
    format!("/projects/{id}")
}
