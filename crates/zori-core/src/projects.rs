//! Project CRUD over `/api/v1/projects`.

use std::sync::Arc;

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::models::{
    CreateProjectRequest, MessageResponse, Project, ProjectList, UpdateProjectRequest,
};

pub const PROJECTS_PATH: &str = "/api/v1/projects";

pub struct ProjectsApi {
    client: Arc<ApiClient>,
}

impl ProjectsApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    /// # Errors
    /// Returns the [`ApiError`] from the server.
    pub async fn list(&self) -> Result<ProjectList, ApiError> {
        let list: Option<ProjectList> = self.client.get(PROJECTS_PATH).await?;
        Ok(list.unwrap_or_default())
    }

    /// # Errors
    /// Returns the [`ApiError`] from the server.
    pub async fn get(&self, id: &str) -> Result<Project, ApiError> {
        self.client.get(&project_path(id)).await
    }

    /// # Errors
    /// Returns the [`ApiError`] from the server.
    pub async fn create(&self, request: &CreateProjectRequest) -> Result<Project, ApiError> {
        self.client.post(PROJECTS_PATH, request).await
    }

    /// # Errors
    /// Returns the [`ApiError`] from the server.
    pub async fn update(
        &self,
        id: &str,
        request: &UpdateProjectRequest,
    ) -> Result<Project, ApiError> {
        self.client.put(&project_path(id), request).await
    }

    /// # Errors
    /// Returns the [`ApiError`] from the server.
    pub async fn delete(&self, id: &str) -> Result<MessageResponse, ApiError> {
        let response: Option<MessageResponse> = self.client.delete(&project_path(id)).await?;
        Ok(response.unwrap_or_default())
    }
}

/// `/api/v1/projects/{id}` with `id` percent-encoded as one path segment.
pub fn project_path(id: &str) -> String {
    let mut path = format!("{PROJECTS_PATH}/");
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            path.push(char::from(byte));
        } else {
            path.push_str(&format!("%{byte:02X}"));
        }
    }
    path
}
