use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::Form;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ProctorError, Result};

pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Response from the session-start endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_active: Option<bool>,
}

/// Verdict for one submitted frame. Counts are absolute, never deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorResponse {
    #[serde(default)]
    pub face_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faces_count: Option<u32>,
    #[serde(default)]
    pub violation_added: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violation_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_count: Option<u32>,
    #[serde(default)]
    pub contest_terminated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_continue: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Advisory snapshot from the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub monitoring_active: bool,
    #[serde(default)]
    pub violation_count: u32,
    #[serde(default)]
    pub warning_count: u32,
    #[serde(default)]
    pub contest_terminated: bool,
    #[serde(default = "default_true")]
    pub can_continue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_face_check: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminateResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub contest_terminated: bool,
}

fn default_true() -> bool {
    true
}

/// Remote service that judges frames and keeps the authoritative counts.
#[async_trait]
pub trait ViolationEvaluator: Send + Sync {
    /// Resets server-side counters and enables monitoring for the contest.
    async fn start_session(&self, contest_id: &str, csrf_token: &str) -> Result<StartResponse>;

    /// Submits one frame as a data URL.
    async fn evaluate_frame(
        &self,
        contest_id: &str,
        csrf_token: &str,
        image_data_url: &str,
    ) -> Result<MonitorResponse>;

    async fn status(&self, contest_id: &str) -> Result<StatusResponse>;

    async fn terminate(&self, contest_id: &str, csrf_token: &str) -> Result<TerminateResponse>;
}

/// `ViolationEvaluator` backed by the contest server's proctoring endpoints.
pub struct HttpEvaluator {
    base_url: String,
    client: reqwest::Client,
}

impl HttpEvaluator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProctorError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint(&self, contest_id: &str, action: &str) -> String {
        format!(
            "{}/contests/{}/proctoring/{}/",
            self.base_url,
            urlencoding::encode(contest_id),
            action
        )
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            ProctorError::MalformedResponse(format!("{} (body: {})", e, truncate(&body, 200)))
        })
    }
}

#[async_trait]
impl ViolationEvaluator for HttpEvaluator {
    async fn start_session(&self, contest_id: &str, csrf_token: &str) -> Result<StartResponse> {
        let url = self.endpoint(contest_id, "start");

        let response = self
            .client
            .post(&url)
            .header(CSRF_HEADER, csrf_token)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProctorError::ServerRejected(format!(
                "Server error: {} - {}",
                status.as_u16(),
                error_text
            )));
        }

        let start: StartResponse = Self::decode(response).await?;
        tracing::debug!(contest_id = %contest_id, success = start.success, "Start endpoint answered");
        Ok(start)
    }

    async fn evaluate_frame(
        &self,
        contest_id: &str,
        csrf_token: &str,
        image_data_url: &str,
    ) -> Result<MonitorResponse> {
        let url = self.endpoint(contest_id, "monitor");
        let form = Form::new().text("image", image_data_url.to_string());

        let response = self
            .client
            .post(&url)
            .header(CSRF_HEADER, csrf_token)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProctorError::NetworkError(format!(
                "Server error: {}",
                response.status().as_u16()
            )));
        }

        Self::decode(response).await
    }

    async fn status(&self, contest_id: &str) -> Result<StatusResponse> {
        let url = self.endpoint(contest_id, "status");
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(ProctorError::NetworkError(format!(
                "Server error: {}",
                response.status().as_u16()
            )));
        }

        Self::decode(response).await
    }

    async fn terminate(&self, contest_id: &str, csrf_token: &str) -> Result<TerminateResponse> {
        let url = self.endpoint(contest_id, "terminate");
        let response = self
            .client
            .post(&url)
            .header(CSRF_HEADER, csrf_token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProctorError::ServerRejected(format!(
                "Server error: {} - {}",
                status.as_u16(),
                error_text
            )));
        }

        Self::decode(response).await
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_contest_id() {
        let evaluator = HttpEvaluator::new("http://localhost:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            evaluator.endpoint("42", "monitor"),
            "http://localhost:8000/contests/42/proctoring/monitor/"
        );
        assert_eq!(
            evaluator.endpoint("a b", "start"),
            "http://localhost:8000/contests/a%20b/proctoring/start/"
        );
    }

    #[test]
    fn test_monitor_response_deserialize() {
        let json = r#"{
            "face_detected": false,
            "faces_count": 0,
            "violation_added": true,
            "violation_type": "FACE_NOT_DETECTED",
            "violation_count": 1,
            "warning_count": 1,
            "contest_terminated": false,
            "can_continue": true,
            "message": "Warning 1/2: Face Not Detected"
        }"#;

        let response: MonitorResponse = serde_json::from_str(json).unwrap();
        assert!(response.violation_added);
        assert_eq!(response.violation_count, Some(1));
        assert_eq!(response.warning_count, Some(1));
        assert_eq!(response.violation_type.as_deref(), Some("FACE_NOT_DETECTED"));
    }

    #[test]
    fn test_terminated_response_without_counts() {
        let json = r#"{"contest_terminated": true, "message": "Contest has been terminated due to violations"}"#;
        let response: MonitorResponse = serde_json::from_str(json).unwrap();
        assert!(response.contest_terminated);
        assert!(!response.face_detected);
        assert_eq!(response.violation_count, None);
    }

    #[test]
    fn test_status_defaults() {
        let status: StatusResponse = serde_json::from_str("{}").unwrap();
        assert!(!status.monitoring_active);
        assert!(status.can_continue);
        assert_eq!(status.violation_count, 0);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
