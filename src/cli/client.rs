use anyhow::{anyhow, bail};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

use super::config::Connection;

/// Thin JSON client for the admin API
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(connection: &Connection) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { http, base_url: connection.server.clone(), token: connection.token.clone() })
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Value> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> anyhow::Result<Value> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// Send a request and unwrap the `{success, data}` envelope
    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        tracing::debug!("{} {}", method, url);
        let response = request.send().await?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| anyhow!("{} {} returned a non-JSON body ({}): {}", method, url, status, e))?;

        unwrap_envelope(status, payload)
    }
}

fn unwrap_envelope(status: StatusCode, payload: Value) -> anyhow::Result<Value> {
    if status.is_success() && payload.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(payload.get("data").cloned().unwrap_or(Value::Null));
    }
    let message = payload.get("error").and_then(Value::as_str).unwrap_or("request failed");
    match payload.get("code").and_then(Value::as_str) {
        Some(code) => bail!("{} ({}, HTTP {})", message, code, status.as_u16()),
        None => bail!("{} (HTTP {})", message, status.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_data_is_unwrapped() {
        let data = unwrap_envelope(StatusCode::OK, json!({"success": true, "data": {"total": 3}})).unwrap();
        assert_eq!(data, json!({"total": 3}));
    }

    #[test]
    fn error_envelope_becomes_error() {
        let err = unwrap_envelope(
            StatusCode::FORBIDDEN,
            json!({"success": false, "error": "denied", "code": "FORBIDDEN"}),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "denied (FORBIDDEN, HTTP 403)");
    }
}
