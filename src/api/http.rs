use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{
    ScanRequest, ScanResult, Subject, SubmissionApi, SubmissionError, DEFAULT_FAILURE_MESSAGE,
};
use crate::scan::{Reason, ScanMode, ScanRoute};

const UNKNOWN_SUBJECT: &str = "Unknown User";
const UNKNOWN_ROLE: &str = "-";

/// Posts scans to the attendance backend.
#[derive(Clone)]
pub struct HttpSubmissionApi {
    client: Client,
    base_url: String,
    route: ScanRoute,
    token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for HttpSubmissionApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSubmissionApi")
            .field("base_url", &self.base_url)
            .field("route", &self.route)
            .field(
                "has_token",
                &self
                    .token
                    .try_read()
                    .map(|t| t.is_some())
                    .unwrap_or(false),
            )
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AdminScanBody<'a> {
    qr_string: &'a str,
    mode: ScanMode,
    reason: Reason,
    approved_by: Option<&'a str>,
    plate_number: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionScanBody<'a> {
    qr_string: &'a str,
    mode: ScanMode,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct ScanResponse {
    #[serde(default)]
    user: Option<UserRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserRecord {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    surname: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default, rename = "photoURL")]
    photo_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl HttpSubmissionApi {
    pub fn new(base_url: impl Into<String>, route: ScanRoute, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        info!("scan submissions go to {base_url}/{}", route.endpoint());

        Ok(Self {
            client,
            base_url,
            route,
            token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn route(&self) -> ScanRoute {
        self.route
    }

    pub fn build_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Bearer token for subsequent requests. Held in memory only.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    fn body(&self, request: &ScanRequest) -> serde_json::Result<serde_json::Value> {
        match self.route {
            ScanRoute::Admin => serde_json::to_value(AdminScanBody {
                qr_string: &request.code,
                mode: request.mode,
                reason: request.metadata.reason,
                approved_by: request.metadata.approved_by.as_deref(),
                plate_number: request.metadata.plate_number.as_deref(),
            }),
            ScanRoute::Staff | ScanRoute::Visitor => serde_json::to_value(TransactionScanBody {
                qr_string: &request.code,
                mode: request.mode,
                kind: "Transaction",
            }),
        }
    }
}

#[async_trait]
impl SubmissionApi for HttpSubmissionApi {
    async fn submit(&self, request: ScanRequest) -> Result<ScanResult, SubmissionError> {
        let body = self
            .body(&request)
            .map_err(|err| SubmissionError::Validation(err.to_string()))?;

        let mut builder = self.client.post(self.build_url(self.route.endpoint())).json(&body);
        if let Some(token) = self.token.read().await.as_ref() {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|err| {
            warn!("scan request failed to send: {err}");
            SubmissionError::Network(format!("{DEFAULT_FAILURE_MESSAGE}: {err}"))
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| SubmissionError::Network(err.to_string()))?;

        if !status.is_success() {
            return Err(error_from_response(status, &text));
        }

        Ok(ScanResult {
            code: request.code,
            subject: subject_from(parse_success_body(&text).user),
            resolved_at: Utc::now(),
        })
    }
}

/// A 2xx means the scan is recorded. An unreadable body only costs the
/// subject details.
fn parse_success_body(text: &str) -> ScanResponse {
    if text.trim().is_empty() {
        return ScanResponse::default();
    }
    serde_json::from_str(text).unwrap_or_else(|err| {
        warn!("unexpected scan response body ({err}); treating as recorded");
        ScanResponse::default()
    })
}

fn subject_from(user: Option<UserRecord>) -> Subject {
    let user = user.unwrap_or_default();
    let name = [user.first_name, user.surname]
        .into_iter()
        .flatten()
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Subject {
        name: if name.is_empty() {
            UNKNOWN_SUBJECT.to_string()
        } else {
            name
        },
        role: user
            .role
            .filter(|role| !role.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_ROLE.to_string()),
        photo_url: user.photo_url.filter(|url| !url.is_empty()),
    }
}

/// Prefer the backend's own `message`; fall back to a generic line.
fn message_from_body(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.message)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string())
}

fn error_from_response(status: StatusCode, body: &str) -> SubmissionError {
    let message = message_from_body(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SubmissionError::Unauthorized(message),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            SubmissionError::Validation(message)
        }
        StatusCode::NOT_FOUND => SubmissionError::NotFound(message),
        _ => SubmissionError::Network(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ScanMetadata;

    fn api(route: ScanRoute) -> HttpSubmissionApi {
        HttpSubmissionApi::new("http://localhost:5000/api/", route, Duration::from_secs(5))
            .expect("client builds")
    }

    #[test]
    fn builds_urls_without_double_slashes() {
        let api = api(ScanRoute::Staff);
        assert_eq!(
            api.build_url(api.route().endpoint()),
            "http://localhost:5000/api/logs/staff/scan"
        );
    }

    #[test]
    fn admin_body_carries_reason_and_optional_fields() {
        let request = ScanRequest {
            code: "ABC123".into(),
            mode: ScanMode::CheckOut,
            metadata: ScanMetadata {
                reason: Reason::GoOut,
                approved_by: Some("J. Cruz".into()),
                plate_number: None,
            },
        };

        let body = api(ScanRoute::Admin).body(&request).unwrap();
        assert_eq!(body["qrString"], "ABC123");
        assert_eq!(body["mode"], "checkout");
        assert_eq!(body["reason"], "go out");
        assert_eq!(body["approvedBy"], "J. Cruz");
        assert!(body["plateNumber"].is_null());
    }

    #[test]
    fn transaction_body_tags_type() {
        let request = ScanRequest {
            code: "V-1".into(),
            mode: ScanMode::CheckIn,
            metadata: ScanMetadata::attendance(),
        };

        let body = api(ScanRoute::Visitor).body(&request).unwrap();
        assert_eq!(body["type"], "Transaction");
        assert_eq!(body["mode"], "checkin");
        assert!(body.get("reason").is_none());
    }

    #[test]
    fn maps_statuses_onto_submission_errors() {
        let err = error_from_response(StatusCode::NOT_FOUND, r#"{"message":"QR not registered"}"#);
        assert_eq!(err, SubmissionError::NotFound("QR not registered".into()));

        let err = error_from_response(StatusCode::FORBIDDEN, "");
        assert_eq!(err, SubmissionError::Unauthorized(DEFAULT_FAILURE_MESSAGE.into()));

        let err = error_from_response(StatusCode::UNPROCESSABLE_ENTITY, r#"{"message":"  "}"#);
        assert_eq!(err, SubmissionError::Validation(DEFAULT_FAILURE_MESSAGE.into()));

        let err = error_from_response(StatusCode::BAD_GATEWAY, "<html>");
        assert!(matches!(err, SubmissionError::Network(_)));
    }

    #[test]
    fn non_json_success_body_still_counts_as_recorded() {
        let parsed = parse_success_body("Scan recorded");
        assert_eq!(subject_from(parsed.user).name, UNKNOWN_SUBJECT);

        let parsed = parse_success_body(r#"{"message":"ok"}"#);
        assert_eq!(subject_from(parsed.user).name, UNKNOWN_SUBJECT);
    }

    #[tokio::test]
    async fn plain_text_ok_response_resolves_to_unknown_user() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            // The JSON body carries the code; stop once it has arrived.
            while !String::from_utf8_lossy(&request).contains("S-42") {
                let read = socket.read(&mut chunk).await.unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..read]);
            }
            let body = "Scan recorded";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let api = HttpSubmissionApi::new(
            format!("http://{addr}/api"),
            ScanRoute::Staff,
            Duration::from_secs(5),
        )
        .unwrap();
        let result = api
            .submit(ScanRequest {
                code: "S-42".into(),
                mode: ScanMode::CheckIn,
                metadata: ScanMetadata::attendance(),
            })
            .await
            .unwrap();

        assert_eq!(result.code, "S-42");
        assert_eq!(result.subject.name, UNKNOWN_SUBJECT);
        server.await.unwrap();
    }

    #[test]
    fn subject_falls_back_when_user_missing() {
        let subject = subject_from(None);
        assert_eq!(subject.name, UNKNOWN_SUBJECT);
        assert_eq!(subject.role, UNKNOWN_ROLE);

        let parsed: ScanResponse = serde_json::from_str(
            r#"{"user":{"firstName":"Ana","surname":"Reyes","role":"Student","photoURL":"https://x/a.png"}}"#,
        )
        .unwrap();
        let subject = subject_from(parsed.user);
        assert_eq!(subject.name, "Ana Reyes");
        assert_eq!(subject.role, "Student");
        assert_eq!(subject.photo_url.as_deref(), Some("https://x/a.png"));
    }
}
