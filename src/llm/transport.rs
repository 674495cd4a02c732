use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{VlmError, VlmResult};
use crate::llm::types::ProviderKind;

/// Default deadline for a backend request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const LOG_IMAGE_PREFIX_LEN: usize = 50;

/// One HTTP exchange: deadline, caller cancellation and status mapping.
///
/// A fresh child token is derived per request, so the caller's signal reaches
/// the request but nothing here can cancel the caller. Returns the success
/// status and the raw body.
async fn exchange(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
    timeout: Duration,
    signal: Option<&CancellationToken>,
) -> VlmResult<(reqwest::StatusCode, Vec<u8>)> {
    let controller = signal.map_or_else(CancellationToken::new, CancellationToken::child_token);

    let exchange = async {
        let response = request
            .send()
            .await
            .map_err(|source| VlmError::Transport { provider, source })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VlmError::Api {
                provider,
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|source| VlmError::Transport { provider, source })?;
        Ok((status, bytes.to_vec()))
    };

    tokio::select! {
        biased;
        _ = controller.cancelled() => {
            tracing::warn!(provider = %provider, "request cancelled by caller");
            Err(VlmError::Cancelled { provider })
        }
        _ = tokio::time::sleep(timeout) => {
            controller.cancel();
            tracing::warn!(provider = %provider, timeout_ms = timeout.as_millis() as u64, "request timed out");
            Err(VlmError::Timeout { provider, after: timeout })
        }
        result = exchange => result,
    }
}

/// Send a request whose successful answer must be a JSON document.
pub async fn send_json(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
    timeout: Duration,
    signal: Option<&CancellationToken>,
) -> VlmResult<Value> {
    let (status, bytes) = exchange(provider, request, timeout, signal).await?;
    if is_blank(&bytes) {
        return Err(VlmError::EmptyResponse {
            provider,
            detail: format!("empty body (HTTP {status})"),
        });
    }
    serde_json::from_slice::<Value>(&bytes).map_err(|e| VlmError::EmptyResponse {
        provider,
        detail: format!("malformed body (HTTP {status}): {e}"),
    })
}

/// Send a request where any 2xx is success. The body is decoded only when
/// present and parseable.
pub async fn send_status(
    provider: ProviderKind,
    request: reqwest::RequestBuilder,
    timeout: Duration,
    signal: Option<&CancellationToken>,
) -> VlmResult<Option<Value>> {
    let (status, bytes) = exchange(provider, request, timeout, signal).await?;
    if is_blank(&bytes) {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::debug!(provider = %provider, status = %status, error = %e, "ignoring non-JSON body");
            Ok(None)
        }
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// Add caller-supplied headers to a request.
pub fn with_headers(
    mut request: reqwest::RequestBuilder,
    headers: Option<&HashMap<String, String>>,
) -> reqwest::RequestBuilder {
    if let Some(headers) = headers {
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
    }
    request
}

/// Join a base URL and a path without doubling or dropping the slash.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Copy of a request body safe to log: inline images are cut to a short prefix.
pub fn sanitize_for_log(body: &Value) -> Value {
    match body {
        Value::String(s) if s.starts_with("data:image/") => {
            let prefix: String = s.chars().take(LOG_IMAGE_PREFIX_LEN).collect();
            Value::String(format!("{prefix}...[truncated]"))
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_for_log).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_for_log(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn images_are_truncated_for_logs() {
        let long = format!("data:image/png;base64,{}", "A".repeat(500));
        let body = json!({
            "messages": [{ "content": [{ "type": "image_url", "image_url": { "url": long } }] }],
            "model": "ui-tars"
        });
        let clean = sanitize_for_log(&body);
        let url = clean["messages"][0]["content"][0]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(url.ends_with("...[truncated]"));
        assert_eq!(url.len(), 50 + "...[truncated]".len());
        assert_eq!(clean["model"], "ui-tars");
    }

    #[test]
    fn endpoint_joins_cleanly() {
        assert_eq!(endpoint("http://h/v1/", "/responses"), "http://h/v1/responses");
        assert_eq!(endpoint("http://h", "api/chat"), "http://h/api/chat");
    }

    #[tokio::test]
    async fn caller_cancellation_wins_over_a_hung_request() {
        // Bound socket that never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let signal = CancellationToken::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let request = reqwest::Client::new().get(format!("http://{addr}/"));
        let err = send_json(
            ProviderKind::Ollama,
            request,
            Duration::from_secs(10),
            Some(&signal),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VlmError::Cancelled { .. }));
        drop(listener);
    }

    #[tokio::test]
    async fn internal_cancel_does_not_reach_the_caller() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let signal = CancellationToken::new();

        let request = reqwest::Client::new().get(format!("http://{addr}/"));
        let err = send_json(
            ProviderKind::Ollama,
            request,
            Duration::from_millis(100),
            Some(&signal),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, VlmError::Timeout { .. }));
        assert!(!signal.is_cancelled());
        drop(listener);
    }

    #[tokio::test]
    async fn refused_connection_names_the_backend() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let request = reqwest::Client::new().get(format!("http://{addr}/"));
        let err = send_json(ProviderKind::Anthropic, request, REQUEST_TIMEOUT, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VlmError::Transport { .. }), "{err}");
        assert!(err.is_transport());
        assert!(err.to_string().starts_with("Anthropic transport error"), "{err}");
    }
}
