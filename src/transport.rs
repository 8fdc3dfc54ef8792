//! Request transport. One UTF-8 JSON object per half of a TCP
//! connection: the client writes its request then half-closes its send
//! side; the server reads to EOF, writes one JSON response, then closes.
//! No length prefix, no pipelining, one request per connection.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{NodeError, Result};
use crate::timeline::{MergedTimeline, Timeline};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimelinePayload {
    Single(Timeline),
    Merged(MergedTimeline),
}

/// Every field that is mandatory for its command is still `Option` on the
/// wire: an absent key must deserialize successfully so the handler can
/// report `NodeError::MissingField("name")` instead of serde rejecting the
/// whole request as an unparseable `UnknownCommand`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Request {
    Get {
        #[serde(default)]
        userid: Option<String>,
        #[serde(rename = "max-posts", default)]
        max_posts: Option<usize>,
    },
    Post {
        #[serde(default)]
        content: Option<String>,
    },
    Delete {
        #[serde(rename = "post-id", default)]
        post_id: Option<u64>,
    },
    Sub {
        #[serde(default)]
        userid: Option<String>,
    },
    Unsub {
        #[serde(default)]
        userid: Option<String>,
    },
    View {
        #[serde(rename = "max-posts", default)]
        max_posts: Option<usize>,
    },
    PeopleIMayKnow {
        #[serde(rename = "max-users", default)]
        max_users: Option<usize>,
    },
    GetTimeline {
        #[serde(default)]
        userid: Option<String>,
        #[serde(rename = "max-posts", default)]
        max_posts: Option<usize>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub message: String,
    pub subscription: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedUser {
    pub userid: String,
    #[serde(rename = "subscribed-by")]
    pub subscribed_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResponseEnvelope {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<TimelinePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<SuggestedUser>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<Warning>>,
}

impl ResponseEnvelope {
    pub fn ok_timeline(timeline: Timeline) -> Self {
        Self {
            status: "ok".into(),
            timeline: Some(TimelinePayload::Single(timeline)),
            ..Default::default()
        }
    }

    pub fn ok_view(merged: MergedTimeline, warnings: Vec<Warning>) -> Self {
        Self {
            status: "ok".into(),
            timeline: Some(TimelinePayload::Merged(merged)),
            warnings: Some(warnings),
            ..Default::default()
        }
    }

    pub fn ok_users(users: Vec<SuggestedUser>) -> Self {
        Self {
            status: "ok".into(),
            users: Some(users),
            ..Default::default()
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            status: "ok".into(),
            ..Default::default()
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

impl From<NodeError> for ResponseEnvelope {
    fn from(e: NodeError) -> Self {
        ResponseEnvelope::err(e.to_string())
    }
}

/// Reads a single JSON request from a socket that has been half-closed by
/// the writer (reads to EOF).
pub async fn read_json<T: for<'de> Deserialize<'de>>(stream: &mut TcpStream) -> Result<T> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Writes a single JSON response then shuts down the write half.
pub async fn write_json<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Client side of the protocol: connect, send the request, half-close,
/// read the response to EOF.
pub async fn send_request(addr: (std::net::IpAddr, u16), request: &Request) -> Result<ResponseEnvelope> {
    debug!(?addr, ?request, "sending request");
    let mut stream = TcpStream::connect(addr).await?;
    let bytes = serde_json::to_vec(request)?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response: ResponseEnvelope = serde_json::from_slice(&buf)?;
    debug!(?response, "received response");
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tags_roundtrip() {
        let req = Request::GetTimeline {
            userid: Some("127.0.0.1:8000".into()),
            max_posts: Some(5),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"command\":\"get-timeline\""));
        assert!(json.contains("\"max-posts\":5"));
        let back: Request = serde_json::from_str(&json).unwrap();
        matches!(back, Request::GetTimeline { .. });
    }

    #[test]
    fn request_with_absent_required_field_still_deserializes() {
        let req: Request = serde_json::from_str(r#"{"command":"post"}"#).unwrap();
        assert!(matches!(req, Request::Post { content: None }));

        let req: Request = serde_json::from_str(r#"{"command":"get"}"#).unwrap();
        assert!(matches!(
            req,
            Request::Get {
                userid: None,
                max_posts: None
            }
        ));
    }

    #[test]
    fn people_i_may_know_tag_is_kebab_case() {
        let req = Request::PeopleIMayKnow { max_users: None };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"command\":\"people-i-may-know\""));
    }

    #[test]
    fn error_response_serializes_error_field() {
        let resp = ResponseEnvelope::err("Unknown command.");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("Unknown command."));
    }
}
