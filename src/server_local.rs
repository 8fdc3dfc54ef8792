//! Local server. Binds loopback only, accepts one request per
//! connection, and exposes the full command surface available to a user
//! of this node: get, post, delete, sub, unsub, view, people-i-may-know.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::error::{NodeError, Result};
use crate::identity::User;
use crate::node::Node;
use crate::transport::{read_json, write_json, Request, ResponseEnvelope};

pub async fn serve(node: Arc<Node>, port: u16) -> Result<()> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "local server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(node, stream).await {
                warn!(%peer, error = %e, "local connection failed");
            }
        });
    }
}

async fn handle_connection(node: Arc<Node>, mut stream: TcpStream) -> Result<()> {
    let request: Result<Request> = read_json(&mut stream).await;
    let response = match request {
        Ok(req) => dispatch(&node, req).await,
        Err(_) => ResponseEnvelope::from(NodeError::UnknownCommand),
    };
    write_json(&mut stream, &response).await
}

async fn dispatch(node: &Arc<Node>, request: Request) -> ResponseEnvelope {
    match handle(node, request).await {
        Ok(resp) => resp,
        Err(e) => {
            error!(error = %e, "command failed");
            ResponseEnvelope::from(e)
        }
    }
}

async fn handle(node: &Arc<Node>, request: Request) -> Result<ResponseEnvelope> {
    match request {
        Request::Get { userid, max_posts } => {
            let target = parse_userid(userid)?;
            let timeline = node.get(target, max_posts).await?;
            Ok(ResponseEnvelope::ok_timeline(timeline))
        }
        Request::Post { content } => {
            let content = require_field(content, "content")?;
            if content.is_empty() {
                return Err(NodeError::MissingField("content"));
            }
            node.post(content).await?;
            Ok(ResponseEnvelope::ok_empty())
        }
        Request::Delete { post_id } => {
            let post_id = require_field(post_id, "post-id")?;
            node.delete(post_id).await?;
            Ok(ResponseEnvelope::ok_empty())
        }
        Request::Sub { userid } => {
            let target = parse_userid(userid)?;
            node.sub(target).await?;
            Ok(ResponseEnvelope::ok_empty())
        }
        Request::Unsub { userid } => {
            let target = parse_userid(userid)?;
            node.unsub(target).await?;
            Ok(ResponseEnvelope::ok_empty())
        }
        Request::View { max_posts } => {
            let (merged, warnings) = node.view(max_posts).await;
            Ok(ResponseEnvelope::ok_view(merged, warnings))
        }
        Request::PeopleIMayKnow { max_users } => {
            let users = node.people_i_may_know(max_users).await;
            Ok(ResponseEnvelope::ok_users(users))
        }
        Request::GetTimeline { .. } => Err(NodeError::UnknownCommand),
    }
}

fn require_field<T>(field: Option<T>, name: &'static str) -> Result<T> {
    field.ok_or(NodeError::MissingField(name))
}

fn parse_userid(userid: Option<String>) -> Result<User> {
    let s = require_field(userid, "userid")?;
    if s.is_empty() {
        return Err(NodeError::MissingField("userid"));
    }
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dht::test_support::InMemoryDht;
    use crate::transport::send_request;
    use std::str::FromStr;
    use tempfile::tempdir;

    fn user(port: u16) -> User {
        User::new(IpAddr::from_str("127.0.0.1").unwrap(), port)
    }

    async fn spawn_node(port: u16) -> Arc<Node> {
        let dir = tempdir().unwrap();
        let config = Config::new(user(port), port, dir.into_path());
        let node = Node::load(config, Arc::new(InMemoryDht::new())).unwrap();
        let n = node.clone();
        tokio::spawn(async move {
            let _ = serve(n, port).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        node
    }

    #[tokio::test]
    async fn post_then_get_roundtrips() {
        let port = 18001;
        let node = spawn_node(port).await;

        send_request(
            (IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            &Request::Post {
                content: Some("hello".into()),
            },
        )
        .await
        .unwrap();

        let resp = send_request(
            (IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            &Request::Get {
                userid: Some(node.me().to_string()),
                max_posts: None,
            },
        )
        .await
        .unwrap();
        assert!(resp.is_ok());
    }

    #[tokio::test]
    async fn unknown_command_shape_rejected() {
        let port = 18002;
        spawn_node(port).await;
        let resp = send_request(
            (IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            &Request::Delete {
                post_id: Some(9999),
            },
        )
        .await
        .unwrap();
        assert!(!resp.is_ok());
        assert_eq!(resp.error.as_deref(), Some("Post not found."));
    }

    #[tokio::test]
    async fn missing_required_field_reports_which_one() {
        let port = 18003;
        spawn_node(port).await;
        let resp = send_request(
            (IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            &Request::Post { content: None },
        )
        .await
        .unwrap();
        assert!(!resp.is_ok());
        assert_eq!(resp.error.as_deref(), Some("No content provided."));
    }
}
