use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Client};

use super::DurationSink;
use crate::models::DurationRecord;

const USER_ID_HEADER: &str = "X-User-Id";

/// POSTs records as JSON to the duration-log endpoint.
pub struct HttpSink {
    client: Client,
    endpoint: String,
    auth_token: Option<String>,
    user_id: Option<String>,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let mut builder = Client::builder()
            .default_headers(headers)
            .user_agent(concat!("learnclock/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build().context("failed to create HTTP client")?,
            endpoint: endpoint.into(),
            auth_token: None,
            user_id: None,
        })
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }

    /// The user is identified out of band; records never carry it.
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DurationSink for HttpSink {
    async fn send(&self, record: &DurationRecord) -> Result<()> {
        let mut request = self.client.post(&self.endpoint).json(record);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if let Some(user_id) = &self.user_id {
            request = request.header(USER_ID_HEADER, user_id);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("duration log request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("duration log rejected with {status}: {body}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityType, Interval};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let sink = HttpSink::new("http://127.0.0.1:9/duration-logs", Some(Duration::from_secs(2)))
            .unwrap()
            .with_user_id(Some("u-1".into()));
        assert_eq!(sink.endpoint(), "http://127.0.0.1:9/duration-logs");

        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let interval = Interval::between(start, start + chrono::Duration::seconds(30)).unwrap();
        let record = DurationRecord::new(ActivityType::Learning, interval, None);

        assert!(sink.send(&record).await.is_err());
    }
}
