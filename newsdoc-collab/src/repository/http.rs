//! JSON-over-HTTP repository client.
//!
//! ```text
//! POST {base_url}{update_path}
//! { "uuid", "document", "status"?, "cause"?, "addToHistory", "ifMatch"?, "context" }
//!
//! 2xx     { "uuid", "version" }            → status OK
//! non-2xx { "code", "msg" } | anything    → status = code (or derived from HTTP status)
//! ```

use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use newsdoc_core::Document;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{
    PutOptions, PutResponse, Repository, RepositoryError, SnapshotContext, StoredVersion,
    FAILED_PRECONDITION,
};

#[derive(Debug, Clone)]
pub struct HttpRepositoryConfig {
    /// Scheme, host and port, e.g. `http://127.0.0.1:1080`
    pub base_url: String,
    pub update_path: String,
    pub bearer_token: Option<String>,
    /// Per-request timeout (default: 10s)
    pub request_timeout: Duration,
}

impl Default for HttpRepositoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:1080".to_string(),
            update_path: "/documents/update".to_string(),
            bearer_token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl HttpRepositoryConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    fn update_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.update_path.trim_start_matches('/')
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    uuid: &'a str,
    document: &'a Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<&'a str>,
    add_to_history: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    if_match: Option<u64>,
    context: &'a SnapshotContext,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
    #[serde(default)]
    msg: String,
}

pub struct HttpRepository {
    client: reqwest::Client,
    config: HttpRepositoryConfig,
}

impl HttpRepository {
    pub fn new(config: HttpRepositoryConfig) -> Result<Self, RepositoryError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RepositoryError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn send(
        &self,
        document: &Document,
        context: &SnapshotContext,
        options: &PutOptions,
    ) -> Result<PutResponse, RepositoryError> {
        let body = UpdateRequest {
            uuid: &document.uuid,
            document,
            status: options.status.as_deref(),
            cause: options.cause.as_deref(),
            add_to_history: options.add_to_history,
            if_match: options.base_version,
            context,
        };

        let mut request = self.client.post(self.config.update_url()).json(&body);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if status.is_success() {
            let stored: StoredVersion = response
                .json()
                .await
                .map_err(|e| RepositoryError::InvalidResponse(e.to_string()))?;
            return Ok(PutResponse::ok(stored.uuid, stored.version));
        }

        let raw = response.bytes().await.map_err(transport_error)?;
        let code = match serde_json::from_slice::<ErrorBody>(&raw) {
            Ok(ErrorBody { code: Some(code), msg }) => {
                log::warn!("Repository refused {}: {code} {msg}", document.uuid);
                code
            }
            _ => {
                log::warn!("Repository refused {} with HTTP {status}", document.uuid);
                code_for_status(status)
            }
        };
        Ok(PutResponse::rejected(code))
    }
}

impl Repository for HttpRepository {
    fn put<'a>(
        &'a self,
        document: &'a Document,
        context: &'a SnapshotContext,
        options: &'a PutOptions,
    ) -> BoxFuture<'a, Result<PutResponse, RepositoryError>> {
        self.send(document, context, options).boxed()
    }
}

fn transport_error(e: reqwest::Error) -> RepositoryError {
    if e.is_timeout() {
        RepositoryError::Timeout
    } else {
        RepositoryError::Transport(e.to_string())
    }
}

/// Status code for a non-2xx reply without a usable body.
fn code_for_status(status: StatusCode) -> String {
    match status {
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => FAILED_PRECONDITION.to_string(),
        other => format!("http_{}", other.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SnapshotContext;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response; the handle yields the raw request.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                if request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some(split) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..split]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        raw.len() >= split + 4 + length
    }

    fn document() -> Document {
        Document::new("9a0b1c2d-3e4f-4a5b-8c6d-7e8f9a0b1c2d", "core/article")
    }

    #[tokio::test]
    async fn test_success_maps_to_ok() {
        let (url, server) =
            serve_once("200 OK", r#"{"uuid":"9a0b1c2d-3e4f-4a5b-8c6d-7e8f9a0b1c2d","version":7}"#).await;
        let mut config = HttpRepositoryConfig::new(url);
        config.bearer_token = Some("secret".into());
        let repo = HttpRepository::new(config).unwrap();

        let options = PutOptions {
            status: Some("usable".into()),
            add_to_history: true,
            base_version: Some(6),
            ..PutOptions::default()
        };
        let response = repo
            .put(&document(), &SnapshotContext::user("core://user/1"), &options)
            .await
            .unwrap();
        assert!(response.is_ok());
        assert_eq!(response.response.unwrap().version, 7);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /documents/update"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains(r#""ifMatch":6"#));
        assert!(request.contains(r#""addToHistory":true"#));
        assert!(request.contains(r#""agent":"user""#));
    }

    #[tokio::test]
    async fn test_error_body_code() {
        let (url, server) = serve_once(
            "400 Bad Request",
            r#"{"code":"failed_precondition","msg":"version mismatch"}"#,
        )
        .await;
        let repo = HttpRepository::new(HttpRepositoryConfig::new(url)).unwrap();
        let response = repo
            .put(&document(), &SnapshotContext::server(), &PutOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status.code, FAILED_PRECONDITION);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_fallback_code() {
        let (url, server) = serve_once("503 Service Unavailable", "upstream down").await;
        let repo = HttpRepository::new(HttpRepositoryConfig::new(url)).unwrap();
        let response = repo
            .put(&document(), &SnapshotContext::server(), &PutOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status.code, "http_503");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let repo = HttpRepository::new(HttpRepositoryConfig::new(format!("http://{addr}"))).unwrap();
        let err = repo
            .put(&document(), &SnapshotContext::server(), &PutOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Transport(_)));
    }

    #[test]
    fn test_update_url_join() {
        let mut config = HttpRepositoryConfig::new("http://repo:1080/");
        config.update_path = "/twirp/Documents/Update".into();
        assert_eq!(config.update_url(), "http://repo:1080/twirp/Documents/Update");
    }
}
