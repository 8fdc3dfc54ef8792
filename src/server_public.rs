//! Public server. Binds this node's own advertised `ip:port`, answers
//! only `get-timeline`, and enforces `U == self || U ∈ Subscriptions`. A
//! denied request for an unfollowed user schedules a background DHT
//! self-heal check.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::error::{NodeError, Result};
use crate::node::Node;
use crate::transport::{read_json, write_json, Request, ResponseEnvelope};

pub async fn serve(node: Arc<Node>) -> Result<()> {
    let addr = SocketAddr::new(node.config.public_ip(), node.config.public_port());
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "public server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let node = node.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(node, stream).await {
                warn!(%peer, error = %e, "public connection failed");
            }
        });
    }
}

async fn handle_connection(node: Arc<Node>, mut stream: TcpStream) -> Result<()> {
    let request: Result<Request> = read_json(&mut stream).await;
    let response = match request {
        Ok(req) => handle(&node, req).await,
        Err(_) => ResponseEnvelope::from(NodeError::UnknownCommand),
    };
    write_json(&mut stream, &response).await
}

async fn handle(node: &Arc<Node>, request: Request) -> ResponseEnvelope {
    let Request::GetTimeline { userid, max_posts } = request else {
        return ResponseEnvelope::from(NodeError::UnknownCommand);
    };

    let Some(userid) = userid else {
        return ResponseEnvelope::from(NodeError::MissingField("userid"));
    };

    let target = match userid.parse() {
        Ok(u) => u,
        Err(e) => return ResponseEnvelope::from(e),
    };

    if target != node.me() && !node.is_subscribed(target).await {
        node.spawn_self_heal(target);
        return ResponseEnvelope::from(NodeError::NotLocallyAvailable);
    }

    match node.local_or_cached(target, max_posts).await {
        Ok(timeline) => ResponseEnvelope::ok_timeline(timeline),
        Err(e) => ResponseEnvelope::from(e),
    }
}
