use serde::{Deserialize, Serialize};

use crate::session::SessionView;

/// The common answer shape: `{status, sessionId?, error?}`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn ok(status: &str, session_id: &str) -> Self {
        Self {
            status: status.to_string(),
            session_id: Some(session_id.to_string()),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            session_id: None,
            error: Some(error.into()),
        }
    }
}

/// Body of `POST` and `DELETE /api/sessions/{id}/topics`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRequest {
    #[serde(alias = "topicName", alias = "topic_name")]
    pub topic: String,
    #[serde(default)]
    pub qos: Option<u8>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicsResponse {
    pub status: String,
    pub session_id: String,
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MessagesQuery {
    #[serde(default)]
    pub since: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SessionList {
    pub sessions: Vec<SessionView>,
}
