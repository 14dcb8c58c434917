#![forbid(unsafe_code)]

// Test lifecycle bookkeeping against the test-control service

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::BookkeepingError;

/// Reported when no cloud task identity is available
pub const LOCAL_TASK_ARN: &str = "127.0.0.1";

/// Characters of the tester e-mail used as its password
const PASSWORD_PREFIX_LEN: usize = 8;

/// Remote test flags the session lifecycle reacts to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestStatus {
    pub started: bool,
    pub ended: bool,
    pub deleted: bool,
}

/// What a running session needs from the test-control service.
#[async_trait]
pub trait TestControl: Send + Sync {
    async fn poll_status(&self) -> Result<TestStatus, BookkeepingError>;

    /// Uploads the session log at graceful stop.
    async fn end_test(&self, log: Vec<Value>) -> Result<(), BookkeepingError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesterUser {
    pub id: i64,
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfigRecord {
    pub id: i64,
    pub course_id: i64,
    pub lesson_id: i64,
    pub server_host: String,
    pub target_ptc_id: Option<i64>,
    pub start_at: Option<String>,
    pub end_at: Option<String>,
    pub started: bool,
    pub ended: bool,
    pub deleted: bool,
    pub remaining_time: Option<i64>,
}

impl From<&TestConfigRecord> for TestStatus {
    fn from(record: &TestConfigRecord) -> Self {
        Self {
            started: record.started,
            ended: record.ended,
            deleted: record.deleted,
        }
    }
}

/// Tester registration returned by the start call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartResponse {
    pub id: i64,
    pub task_arn: String,
    pub user_id: i64,
    pub ptc_id: i64,
    pub active: bool,
    pub user: TesterUser,
    pub test_config: TestConfigRecord,
}

#[derive(Debug, Deserialize)]
struct TaskMetadata {
    #[serde(rename = "TaskARN")]
    task_arn: String,
}

/// reqwest-backed client for the test-control service and the login API
#[derive(Debug, Clone)]
pub struct HttpTestControl {
    client: reqwest::Client,
    config_url: String,
    task_arn: String,
    status_url: Option<String>,
}

impl HttpTestControl {
    pub fn new(client: reqwest::Client, config_url: impl Into<String>, task_arn: impl Into<String>) -> Self {
        Self {
            client,
            config_url: config_url.into(),
            task_arn: task_arn.into(),
            status_url: None,
        }
    }

    /// Binds status polling to the IDE server hosting the test.
    pub fn with_status_endpoint(mut self, server_url: &str, test_id: i64) -> Self {
        self.status_url = Some(format!("{server_url}/admin/test/{test_id}"));
        self
    }

    pub fn task_arn(&self) -> &str {
        &self.task_arn
    }

    /// Registers this tester and returns the test configuration.
    pub async fn start(&self) -> Result<StartResponse, BookkeepingError> {
        let url = format!("{}/admin/test/tester/start", self.config_url);
        let body = json!({ "task_arn": self.task_arn });
        let response = self.client.post(&url).json(&body).send().await?;
        let response = check_status(&url, response)?;
        Ok(response.json().await?)
    }

    /// Logs the tester in. The response body is the bearer token.
    pub async fn login(&self, api_url: &str, email: &str) -> Result<String, BookkeepingError> {
        let url = format!("{api_url}/auth/login");
        let password: String = email.chars().take(PASSWORD_PREFIX_LEN).collect();
        let body = json!({ "email": email, "password": password });
        let response = self.client.post(&url).json(&body).send().await?;
        let token = check_status(&url, response)?.text().await?;
        let token = token.trim().trim_matches('"').to_string();
        if token.is_empty() {
            return Err(BookkeepingError::InvalidResponse {
                endpoint: url,
                message: "empty token".to_string(),
            });
        }
        Ok(token)
    }

    pub async fn post_summary(&self, summary: &Value) -> Result<(), BookkeepingError> {
        let url = format!("{}/admin/test/tester/summary", self.config_url);
        let body = json!({ "task_arn": self.task_arn, "summary": summary });
        let response = self.client.post(&url).json(&body).send().await?;
        check_status(&url, response)?;
        Ok(())
    }
}

#[async_trait]
impl TestControl for HttpTestControl {
    async fn poll_status(&self) -> Result<TestStatus, BookkeepingError> {
        let Some(url) = self.status_url.as_deref() else {
            return Err(BookkeepingError::InvalidResponse {
                endpoint: "status".to_string(),
                message: "no status endpoint configured".to_string(),
            });
        };
        let response = self.client.get(url).send().await?;
        let record: TestConfigRecord = check_status(url, response)?.json().await?;
        Ok(TestStatus::from(&record))
    }

    async fn end_test(&self, log: Vec<Value>) -> Result<(), BookkeepingError> {
        let url = format!("{}/admin/test/tester/end", self.config_url);
        let body = json!({ "task_arn": self.task_arn, "log": log });
        let response = self.client.post(&url).json(&body).send().await?;
        check_status(&url, response)?;
        Ok(())
    }
}

fn check_status(url: &str, response: reqwest::Response) -> Result<reqwest::Response, BookkeepingError> {
    if response.status() == reqwest::StatusCode::OK {
        Ok(response)
    } else {
        Err(BookkeepingError::status(url, response.status().as_u16()))
    }
}

/// Task identity from the ECS metadata endpoint, or the local placeholder.
pub async fn resolve_task_arn(client: &reqwest::Client, metadata_url: Option<&str>) -> String {
    let Some(url) = metadata_url else {
        return LOCAL_TASK_ARN.to_string();
    };
    let fetched = async {
        let response = client.get(url).send().await?;
        let metadata: TaskMetadata = check_status(url, response)?.json().await?;
        Ok::<_, BookkeepingError>(metadata.task_arn)
    };
    match fetched.await {
        Ok(arn) => arn,
        Err(e) => {
            tracing::warn!("task metadata lookup failed, using {}: {}", LOCAL_TASK_ARN, e);
            LOCAL_TASK_ARN.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_response_decodes_partial_body() {
        let start: StartResponse = serde_json::from_value(json!({
            "id": 3,
            "ptc_id": 12,
            "user": {"id": 5, "email": "tester42@example.com"},
            "test_config": {
                "id": 9, "course_id": 1, "lesson_id": 2, "server_host": "10.0.0.1:8000",
                "started": true, "ended": false, "deleted": false, "remaining_time": 100
            }
        }))
        .unwrap();
        assert_eq!(start.ptc_id, 12);
        assert_eq!(start.test_config.target_ptc_id, None);
        assert_eq!(
            TestStatus::from(&start.test_config),
            TestStatus { started: true, ended: false, deleted: false }
        );
    }

    #[test]
    fn test_task_metadata_field() {
        let meta: TaskMetadata =
            serde_json::from_value(json!({"TaskARN": "arn:aws:ecs:task/1", "Cluster": "c"})).unwrap();
        assert_eq!(meta.task_arn, "arn:aws:ecs:task/1");
    }

    #[tokio::test]
    async fn test_local_task_arn_without_metadata() {
        let client = reqwest::Client::new();
        assert_eq!(resolve_task_arn(&client, None).await, LOCAL_TASK_ARN);
    }

    #[tokio::test]
    async fn test_poll_without_endpoint_fails() {
        let control = HttpTestControl::new(reqwest::Client::new(), "http://localhost:1", "arn");
        assert!(control.poll_status().await.is_err());
    }
}
