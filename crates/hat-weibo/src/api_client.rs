//! HTTP client for the Weibo open platform endpoints the bridge touches.

use std::time::Duration;

use hat_core::{redact_secret, truncate_for_error};
use reqwest::multipart::{Form, Part};
use serde_json::Value;

use crate::{WeiboError, TOKEN_EXPIRED_ERROR_CODE};

pub const DEFAULT_WEIBO_API_BASE: &str = "https://api.weibo.com";

const ERROR_BODY_LIMIT: usize = 320;

#[derive(Debug, Clone)]
/// Public struct `WeiboApiConfig` used across sorting-hat components.
pub struct WeiboApiConfig {
    pub api_base: String,
    pub request_timeout_ms: u64,
}

impl Default for WeiboApiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_WEIBO_API_BASE.to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `CommentTarget` values.
pub enum CommentTarget {
    /// New top-level comment on a status.
    Create { status_id: String },
    /// Reply to an existing comment under a status.
    Reply {
        comment_id: String,
        status_id: String,
    },
}

impl CommentTarget {
    fn endpoint(&self) -> &'static str {
        match self {
            Self::Create { .. } => "2/comments/create.json",
            Self::Reply { .. } => "2/comments/reply.json",
        }
    }

    /// Holding text posted when no model reply is available.
    pub fn placeholder_text(&self) -> &'static str {
        match self {
            Self::Create { .. } => "已收到at微博，飞速运转中...",
            Self::Reply { .. } => "已收到评论，飞速运转中...",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One comment to post.
pub struct CommentRequest {
    pub target: CommentTarget,
    pub reply_ip: String,
    pub text: String,
    pub pic_id: Option<String>,
}

impl CommentRequest {
    pub fn new(target: CommentTarget, reply_ip: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target,
            reply_ip: reply_ip.into(),
            text: text.into(),
            pic_id: None,
        }
    }

    /// Attaches a picture previously uploaded to the platform, identified by
    /// its hosted URL.
    pub fn with_image_url(mut self, image_url: &str) -> Self {
        self.pic_id = pic_id_from_url(image_url);
        self
    }

    fn form_fields(&self, access_token: &str) -> Vec<(&'static str, String)> {
        let mut fields = vec![("access_token", access_token.to_string())];
        match &self.target {
            CommentTarget::Create { status_id } => {
                fields.push(("id", status_id.clone()));
            }
            CommentTarget::Reply {
                comment_id,
                status_id,
            } => {
                fields.push(("cid", comment_id.clone()));
                fields.push(("id", status_id.clone()));
            }
        }
        fields.push(("comment", self.text.clone()));
        fields.push(("rip", self.reply_ip.clone()));
        if let Some(pic_id) = &self.pic_id {
            fields.push(("pic_ids", pic_id.clone()));
        }
        fields
    }

    /// Renders the outgoing form for logs with the access token redacted.
    pub fn log_payload(&self, access_token: &str) -> String {
        self.form_fields(access_token)
            .into_iter()
            .map(|(name, value)| {
                if name == "access_token" {
                    format!("{name}={}", redact_secret(&value))
                } else {
                    format!("{name}={value}")
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `CommentPosted` used across sorting-hat components.
pub struct CommentPosted {
    pub comment_id: Option<String>,
}

#[derive(Debug, Clone)]
/// Single-shot calls against the platform API. Retrying is left to callers.
pub struct WeiboApiClient {
    http: reqwest::Client,
    api_base: String,
}

impl WeiboApiClient {
    pub fn new(config: WeiboApiConfig) -> Result<Self, WeiboError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("sorting-hat-weibo-bridge"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            http,
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base)
    }

    /// Exchanges a signed request for a fresh access token.
    pub async fn authorize(
        &self,
        client_id: &str,
        timestamp_ms: &str,
        nonce: &str,
        sign: &str,
    ) -> Result<String, WeiboError> {
        let response = self
            .http
            .get(self.url("oauth2/vp/authorize"))
            .query(&[
                ("client_id", client_id),
                ("timestamp", timestamp_ms),
                ("nonce", nonce),
                ("sign", sign),
            ])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &body));
        }
        serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|parsed| {
                parsed
                    .get("access_token")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|token| !token.is_empty())
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                WeiboError::Auth(format!(
                    "authorize response missing access_token: {}",
                    truncate_for_error(&body, ERROR_BODY_LIMIT)
                ))
            })
    }

    pub async fn post_comment(
        &self,
        access_token: &str,
        request: &CommentRequest,
    ) -> Result<CommentPosted, WeiboError> {
        let response = self
            .http
            .post(self.url(request.target.endpoint()))
            .form(&request.form_fields(access_token))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() || parse_error_code(&body).is_some() {
            return Err(classify_failure(status.as_u16(), &body));
        }
        let comment_id = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|parsed| match parsed.get("idstr").or_else(|| parsed.get("id")) {
                Some(Value::Number(number)) => Some(number.to_string()),
                Some(Value::String(text)) => Some(text.clone()),
                _ => None,
            });
        Ok(CommentPosted { comment_id })
    }

    /// Uploads picture bytes and returns the hosted medium-size URL.
    pub async fn upload_image(
        &self,
        access_token: &str,
        bytes: Vec<u8>,
    ) -> Result<String, WeiboError> {
        if bytes.is_empty() {
            return Err(WeiboError::InvalidResponse(
                "refusing to upload an empty picture".to_string(),
            ));
        }
        let form = Form::new()
            .part("pic", Part::bytes(bytes).file_name("pic.jpg"))
            .text("access_token", access_token.to_string());
        let response = self
            .http
            .post(self.url("2/statuses/upload_pic.json"))
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &body));
        }
        serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|parsed| {
                parsed
                    .get("bmiddle_pic")
                    .and_then(Value::as_str)
                    .filter(|url| !url.trim().is_empty())
                    .map(str::to_string)
            })
            .ok_or_else(|| {
                WeiboError::InvalidResponse(format!(
                    "upload response missing bmiddle_pic: {}",
                    truncate_for_error(&body, ERROR_BODY_LIMIT)
                ))
            })
    }

    /// Fetches a public image. No platform credentials are sent.
    pub async fn download_image(&self, url: &str) -> Result<Vec<u8>, WeiboError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WeiboError::TransientHttp {
                status: status.as_u16(),
                error_code: None,
                body: truncate_for_error(&body, ERROR_BODY_LIMIT),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn parse_error_code(body: &str) -> Option<u64> {
    let parsed = serde_json::from_str::<Value>(body).ok()?;
    match parsed.get("error_code")? {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn classify_failure(status: u16, body: &str) -> WeiboError {
    let error_code = parse_error_code(body);
    if error_code == Some(TOKEN_EXPIRED_ERROR_CODE) {
        return WeiboError::TokenExpired;
    }
    WeiboError::TransientHttp {
        status,
        error_code,
        body: truncate_for_error(body, ERROR_BODY_LIMIT),
    }
}

/// Derives the platform picture id from a hosted picture URL
/// (`https://wx1.sinaimg.cn/bmiddle/abc123.jpg` → `abc123`).
pub fn pic_id_from_url(url: &str) -> Option<String> {
    let last = url.trim().trim_end_matches('/').rsplit('/').next()?;
    let last = last.split(['?', '#']).next().unwrap_or(last);
    let id = last.split('.').next().unwrap_or(last).trim();
    (!id.is_empty()).then(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::{
        classify_failure, pic_id_from_url, CommentRequest, CommentTarget, WeiboApiClient,
        WeiboApiConfig,
    };
    use crate::WeiboError;

    fn client_for(server: &MockServer) -> WeiboApiClient {
        WeiboApiClient::new(WeiboApiConfig {
            api_base: server.base_url(),
            request_timeout_ms: 2_000,
        })
        .expect("weibo client")
    }

    #[test]
    fn unit_form_fields_follow_target_shape() {
        let create = CommentRequest::new(
            CommentTarget::Create {
                status_id: "100".to_string(),
            },
            "10.0.0.1",
            "你好",
        );
        assert_eq!(
            create.form_fields("tok"),
            vec![
                ("access_token", "tok".to_string()),
                ("id", "100".to_string()),
                ("comment", "你好".to_string()),
                ("rip", "10.0.0.1".to_string()),
            ]
        );

        let reply = CommentRequest::new(
            CommentTarget::Reply {
                comment_id: "200".to_string(),
                status_id: "100".to_string(),
            },
            "10.0.0.1",
            "你好",
        )
        .with_image_url("https://wx1.sinaimg.cn/bmiddle/006abcXYZ.jpg");
        let fields = reply.form_fields("tok");
        assert!(fields.contains(&("cid", "200".to_string())));
        assert!(fields.contains(&("id", "100".to_string())));
        assert!(fields.contains(&("pic_ids", "006abcXYZ".to_string())));
    }

    #[test]
    fn regression_log_payload_redacts_access_token() {
        let request = CommentRequest::new(
            CommentTarget::Create {
                status_id: "100".to_string(),
            },
            "10.0.0.1",
            "hello",
        );
        let rendered = request.log_payload("2.00SecretAccessTokenValue");
        assert!(!rendered.contains("SecretAccessTokenValue"), "{rendered}");
        assert!(rendered.contains("comment=hello"), "{rendered}");
        assert!(rendered.contains("id=100"), "{rendered}");
    }

    #[test]
    fn unit_classify_failure_maps_expired_token_code() {
        let expired = classify_failure(400, r#"{"error_code": 21332, "error": "expired_token"}"#);
        assert!(expired.is_token_expired());
        let expired_string_code = classify_failure(403, r#"{"error_code": "21332"}"#);
        assert!(expired_string_code.is_token_expired());

        match classify_failure(400, r#"{"error_code": 20019, "error": "repeat content"}"#) {
            WeiboError::TransientHttp {
                status, error_code, ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(error_code, Some(20019));
            }
            other => panic!("unexpected error: {other}"),
        }
        match classify_failure(502, "bad gateway") {
            WeiboError::TransientHttp { error_code, .. } => assert_eq!(error_code, None),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unit_pic_id_from_url_strips_path_extension_and_query() {
        assert_eq!(
            pic_id_from_url("https://wx1.sinaimg.cn/bmiddle/006abc.jpg").as_deref(),
            Some("006abc")
        );
        assert_eq!(
            pic_id_from_url("https://wx1.sinaimg.cn/bmiddle/006abc.jpg?x=1").as_deref(),
            Some("006abc")
        );
        assert_eq!(pic_id_from_url("").as_deref(), None);
    }

    #[tokio::test]
    async fn functional_authorize_sends_signed_query_and_reads_token() {
        let server = MockServer::start();
        let authorize = server.mock(|when, then| {
            when.method(GET)
                .path("/oauth2/vp/authorize")
                .query_param("client_id", "app-key")
                .query_param("timestamp", "1700000000000")
                .query_param("nonce", "eqiojronqnr")
                .query_param("sign", "abc");
            then.status(200)
                .json_body(json!({"access_token": "2.00fresh", "expires_in": 7200}));
        });
        let token = client_for(&server)
            .authorize("app-key", "1700000000000", "eqiojronqnr", "abc")
            .await
            .expect("authorize");
        assert_eq!(token, "2.00fresh");
        authorize.assert();
    }

    #[tokio::test]
    async fn regression_authorize_without_token_is_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/oauth2/vp/authorize");
            then.status(200).json_body(json!({"error": "invalid sign"}));
        });
        let error = client_for(&server)
            .authorize("app-key", "1", "n", "bad")
            .await
            .expect_err("missing token");
        assert!(matches!(error, WeiboError::Auth(_)), "{error}");
    }

    #[tokio::test]
    async fn functional_post_comment_reply_sends_form_and_reads_id() {
        let server = MockServer::start();
        let reply = server.mock(|when, then| {
            when.method(POST)
                .path("/2/comments/reply.json")
                .header("content-type", "application/x-www-form-urlencoded")
                .body_includes("access_token=tok")
                .body_includes("cid=200")
                .body_includes("id=100")
                .body_includes("rip=10.0.0.1");
            then.status(200).json_body(json!({"id": 5031749849974299_u64}));
        });
        let posted = client_for(&server)
            .post_comment(
                "tok",
                &CommentRequest::new(
                    CommentTarget::Reply {
                        comment_id: "200".to_string(),
                        status_id: "100".to_string(),
                    },
                    "10.0.0.1",
                    "收到",
                ),
            )
            .await
            .expect("post");
        assert_eq!(posted.comment_id.as_deref(), Some("5031749849974299"));
        reply.assert();
    }

    #[tokio::test]
    async fn functional_upload_image_returns_hosted_url() {
        let server = MockServer::start();
        let upload = server.mock(|when, then| {
            when.method(POST)
                .path("/2/statuses/upload_pic.json")
                .body_includes("name=\"access_token\"")
                .body_includes("name=\"pic\"");
            then.status(200)
                .json_body(json!({"bmiddle_pic": "https://wx1.sinaimg.cn/bmiddle/006abc.jpg"}));
        });
        let url = client_for(&server)
            .upload_image("tok", b"fake-jpeg-bytes".to_vec())
            .await
            .expect("upload");
        assert_eq!(url, "https://wx1.sinaimg.cn/bmiddle/006abc.jpg");
        upload.assert();
    }

    #[tokio::test]
    async fn regression_download_image_non_success_is_transient() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing.jpg");
            then.status(404).body("nope");
        });
        let error = client_for(&server)
            .download_image(&server.url("/missing.jpg"))
            .await
            .expect_err("404");
        assert!(
            matches!(error, WeiboError::TransientHttp { status: 404, .. }),
            "{error}"
        );
    }
}
