//! Client for the function-runtime API (`/2018-06-01/runtime`).

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

const API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "Lambda-Runtime-Aws-Request-Id";
const DEADLINE_HEADER: &str = "Lambda-Runtime-Deadline-Ms";

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Runtime API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invocation is missing the {REQUEST_ID_HEADER} header")]
    MissingRequestId,
}

/// One event handed out by the runtime.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: String,
    pub deadline_ms: Option<u64>,
    pub payload: Value,
}

impl Invocation {
    /// Time left before `deadline_ms`, less `margin`. `None` when the
    /// runtime sent no deadline.
    pub fn budget(&self, now_ms: i64, margin: Duration) -> Option<Duration> {
        let deadline = i64::try_from(self.deadline_ms?).unwrap_or(i64::MAX);
        let left = u64::try_from(deadline.saturating_sub(now_ms)).unwrap_or(0);
        Some(Duration::from_millis(left).saturating_sub(margin))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorReport<'a> {
    error_message: &'a str,
    error_type: &'a str,
}

#[derive(Clone)]
pub struct RuntimeApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl RuntimeApiClient {
    /// `api` is the `AWS_LAMBDA_RUNTIME_API` value (`host:port`) or a full URL.
    pub fn new(api: &str) -> Self {
        let api = api.trim_end_matches('/');
        let origin = if api.starts_with("http://") || api.starts_with("https://") {
            api.to_string()
        } else {
            format!("http://{}", api)
        };

        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/{}/runtime", origin, API_VERSION),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Blocks until the runtime hands out the next invocation.
    pub async fn next_invocation(&self) -> Result<Invocation, RuntimeError> {
        let response = self
            .http
            .get(format!("{}/invocation/next", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let headers = response.headers();
        let request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(RuntimeError::MissingRequestId)?;
        let deadline_ms = headers
            .get(DEADLINE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let payload = response.json::<Value>().await?;

        Ok(Invocation {
            request_id,
            deadline_ms,
            payload,
        })
    }

    pub async fn respond(&self, request_id: &str, body: &Value) -> Result<(), RuntimeError> {
        self.http
            .post(format!("{}/invocation/{}/response", self.base_url, request_id))
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn fail(
        &self,
        request_id: &str,
        error_type: &str,
        message: &str,
    ) -> Result<(), RuntimeError> {
        self.http
            .post(format!("{}/invocation/{}/error", self.base_url, request_id))
            .json(&ErrorReport {
                error_message: message,
                error_type,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_from_host_port() {
        let client = RuntimeApiClient::new("127.0.0.1:9001");
        assert_eq!(client.base_url(), "http://127.0.0.1:9001/2018-06-01/runtime");
    }

    fn invocation(deadline_ms: Option<u64>) -> Invocation {
        Invocation {
            request_id: "req-1".to_string(),
            deadline_ms,
            payload: Value::Null,
        }
    }

    #[test]
    fn test_budget_from_deadline() {
        let margin = Duration::from_millis(100);
        assert_eq!(
            invocation(Some(10_000)).budget(7_000, margin),
            Some(Duration::from_millis(2_900))
        );
        // Past deadlines leave nothing
        assert_eq!(
            invocation(Some(10_000)).budget(12_000, margin),
            Some(Duration::ZERO)
        );
        assert_eq!(invocation(None).budget(7_000, margin), None);
    }

    #[test]
    fn test_base_url_keeps_scheme() {
        let client = RuntimeApiClient::new("http://localhost:9001/");
        assert_eq!(client.base_url(), "http://localhost:9001/2018-06-01/runtime");
    }
}
