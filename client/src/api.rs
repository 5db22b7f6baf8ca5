use async_trait::async_trait;

use crate::error::ClientError;

/// Collaborator HTTP surface consumed by the badge reconciler.
///
/// Production uses the reqwest implementation; tests substitute a
/// recordable fake.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// `PATCH {api_base}/api/notifications/mark-category-read/{category}`.
    /// Fire-and-forget from the caller's perspective; failures are logged
    /// and ignored.
    async fn mark_category_read(&self, category: &str) -> Result<(), ClientError>;
}

pub struct HttpNotificationApi {
    http: reqwest::Client,
    api_base: String,
}

impl HttpNotificationApi {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl NotificationApi for HttpNotificationApi {
    async fn mark_category_read(&self, category: &str) -> Result<(), ClientError> {
        self.http
            .patch(format!(
                "{}/api/notifications/mark-category-read/{}",
                self.api_base, category
            ))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
