//! The signed-in organization, `/api/v1/organization/`.

use std::sync::Arc;

use tracing::warn;

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::models::Organization;

pub const ORGANIZATION_PATH: &str = "/api/v1/organization/";

pub struct OrganizationApi {
    client: Arc<ApiClient>,
}

impl OrganizationApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    /// Fetches the organization the session belongs to and replaces the
    /// cached record with it. A cache write failure is logged only.
    ///
    /// # Errors
    /// Returns the [`ApiError`] from the server.
    pub async fn current(&self) -> Result<Organization, ApiError> {
        let organization: Organization = self.client.get(ORGANIZATION_PATH).await?;
        if let Err(err) = self.client.session().set_organization(&organization) {
            warn!(error = %err, "fetched organization could not be cached");
        }
        Ok(organization)
    }
}
