//! HTTP client for the orchestration server.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use taskbridge_core::{EngineKind, ExecutionStatus};
use thiserror::Error;
use tracing::debug;

/// Errors returned by [`BridgeClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("server returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Bad command-line input.
    #[error("invalid input: {0}")]
    Input(String),
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Thin JSON client over the server's `/v1/tasks` routes.
pub struct BridgeClient {
    inner: reqwest::Client,
    base_url: String,
}

impl BridgeClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn schedule(&self, body: Value) -> Result<Value, ClientError> {
        self.post("/v1/tasks", Some(body)).await
    }

    pub async fn status(
        &self,
        id: &str,
        engine: Option<EngineKind>,
    ) -> Result<ExecutionStatus, ClientError> {
        self.get(&format!("/v1/tasks/{}{}", id, engine_query(engine, '?')))
            .await
    }

    pub async fn cancel(&self, id: &str, engine: Option<EngineKind>) -> Result<Value, ClientError> {
        self.post(
            &format!("/v1/tasks/{}/cancel{}", id, engine_query(engine, '?')),
            None,
        )
        .await
    }

    pub async fn signal(&self, id: &str, name: &str, payload: Value) -> Result<(), ClientError> {
        let url = self.url(&format!("/v1/tasks/{}/signals/{}", id, name));
        debug!(url = %url, "POST request");
        let response = self.inner.post(&url).json(&payload).send().await?;
        check(response).await.map(|_| ())
    }

    pub async fn result(
        &self,
        id: &str,
        engine: Option<EngineKind>,
        timeout_ms: Option<u64>,
    ) -> Result<Value, ClientError> {
        let mut path = format!("/v1/tasks/{}/result", id);
        let mut sep = '?';
        if let Some(engine) = engine {
            path.push_str(&engine_query(Some(engine), sep));
            sep = '&';
        }
        if let Some(timeout_ms) = timeout_ms {
            path.push_str(&format!("{}timeout_ms={}", sep, timeout_ms));
        }
        self.get(&path).await
    }

    pub async fn health(&self) -> Result<bool, ClientError> {
        let url = self.url("/health");
        debug!(url = %url, "Checking health");
        let response = self.inner.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = self.url(path);
        debug!(url = %url, "GET request");
        let response = self.inner.get(&url).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Option<Value>) -> Result<T, ClientError> {
        let url = self.url(path);
        debug!(url = %url, "POST request");
        let mut request = self.inner.post(&url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        Ok(check(response).await?.json().await?)
    }
}

fn engine_query(engine: Option<EngineKind>, sep: char) -> String {
    engine
        .map(|engine| format!("{}engine={}", sep, engine))
        .unwrap_or_default()
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Parse a JSON argument, treating an absent value as `null`.
pub fn parse_json_arg(raw: Option<&str>) -> Result<Value, ClientError> {
    match raw {
        None => Ok(Value::Null),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| ClientError::Input(format!("'{}' is not valid JSON: {}", raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_trims_trailing_slash() {
        let client = BridgeClient::new("http://localhost:8080/");
        assert_eq!(client.url("/health"), "http://localhost:8080/health");
    }

    #[test]
    fn test_engine_query() {
        assert_eq!(engine_query(None, '?'), "");
        assert_eq!(engine_query(Some(EngineKind::Durable), '?'), "?engine=durable");
        assert_eq!(engine_query(Some(EngineKind::Queue), '&'), "&engine=queue");
    }

    #[test]
    fn test_parse_json_arg() {
        assert_eq!(parse_json_arg(None).unwrap(), Value::Null);
        assert_eq!(parse_json_arg(Some(r#"{"a":1}"#)).unwrap()["a"], 1);
        assert!(matches!(
            parse_json_arg(Some("{oops")),
            Err(ClientError::Input(_))
        ));
    }
}
