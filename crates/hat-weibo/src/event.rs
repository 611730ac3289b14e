//! Inbound push events delivered to the webhook.

use serde_json::Value;

use crate::{CommentTarget, EventKey, WeiboError};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `EventKind` values.
pub enum EventKind {
    /// A post that mentions the bot account.
    Status,
    /// A comment left under one of the bot's posts.
    Comment {
        status_id: String,
        status_text: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `WeiboImage` used across sorting-hat components.
pub struct WeiboImage {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One decoded push delivery.
pub struct WeiboEvent {
    pub action: String,
    pub kind: EventKind,
    pub id: String,
    pub text: String,
    pub created_at: Option<String>,
    pub user_id: Option<String>,
    pub screen_name: Option<String>,
    pub images: Vec<WeiboImage>,
}

impl WeiboEvent {
    /// Decodes the `event`, `content_type` and `content_body` form fields.
    /// `content_body` is a JSON document whose ids may be numbers or strings.
    pub fn parse(
        action: &str,
        content_type: Option<&str>,
        content_body: Option<&str>,
    ) -> Result<Self, WeiboError> {
        let body = content_body
            .map(str::trim)
            .filter(|body| !body.is_empty())
            .ok_or_else(|| WeiboError::InvalidEvent("missing content_body".to_string()))?;
        let body: Value = serde_json::from_str(body)
            .map_err(|error| WeiboError::InvalidEvent(format!("content_body is not JSON: {error}")))?;

        let id = body
            .get("id")
            .and_then(id_from_value)
            .ok_or_else(|| WeiboError::InvalidEvent("content_body missing id".to_string()))?;
        let text = body
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let kind = match content_type.map(str::trim).unwrap_or_default() {
            "status" => EventKind::Status,
            "comment" => {
                let status = body.get("status");
                let status_id = status
                    .and_then(|status| status.get("id"))
                    .and_then(id_from_value)
                    .ok_or_else(|| {
                        WeiboError::InvalidEvent("comment event missing status.id".to_string())
                    })?;
                let status_text = status
                    .and_then(|status| status.get("text"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                EventKind::Comment {
                    status_id,
                    status_text,
                }
            }
            other => {
                return Err(WeiboError::InvalidEvent(format!(
                    "unsupported content_type '{other}'"
                )))
            }
        };

        let user = body.get("user");
        let images = if is_truthy(body.get("has_image")) {
            body.get("images")
                .and_then(Value::as_array)
                .map(|images| images.iter().filter_map(image_from_value).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        Ok(Self {
            action: action.trim().to_string(),
            kind,
            id,
            text,
            created_at: body
                .get("created_at")
                .and_then(Value::as_str)
                .map(str::to_string),
            user_id: user.and_then(|user| user.get("id")).and_then(id_from_value),
            screen_name: user
                .and_then(|user| user.get("screen_name"))
                .and_then(Value::as_str)
                .map(str::to_string),
            images,
        })
    }

    pub fn is_add(&self) -> bool {
        self.action.eq_ignore_ascii_case("add")
    }

    pub fn event_key(&self) -> EventKey {
        match &self.kind {
            EventKind::Status => EventKey::Status {
                status_id: self.id.clone(),
            },
            EventKind::Comment { status_id, .. } => EventKey::Comment {
                comment_id: self.id.clone(),
                status_id: status_id.clone(),
            },
        }
    }

    /// Where replies to this event are posted: a new comment on a status, or
    /// a reply to a comment.
    pub fn comment_target(&self) -> CommentTarget {
        match &self.kind {
            EventKind::Status => CommentTarget::Create {
                status_id: self.id.clone(),
            },
            EventKind::Comment { status_id, .. } => CommentTarget::Reply {
                comment_id: self.id.clone(),
                status_id: status_id.clone(),
            },
        }
    }

    pub fn first_image_url(&self) -> Option<&str> {
        self.images.first().map(|image| image.url.as_str())
    }
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_i64().is_some_and(|number| number != 0),
        _ => false,
    }
}

fn image_from_value(value: &Value) -> Option<WeiboImage> {
    let url = match value {
        Value::String(url) => Some(url.as_str()),
        Value::Object(object) => ["url", "large", "original", "bmiddle"]
            .iter()
            .find_map(|field| object.get(*field).and_then(Value::as_str)),
        _ => None,
    }?;
    let url = url.trim();
    (!url.is_empty()).then(|| WeiboImage {
        url: url.to_string(),
    })
}
