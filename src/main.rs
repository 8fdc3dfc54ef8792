use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use timeline_node::cli::{Cli, Command};
use timeline_node::config::Config;
use timeline_node::dht::memory::InMemoryDht;
use timeline_node::identity::User;
use timeline_node::node::Node;
use timeline_node::timeline::Timeline;
use timeline_node::transport::{send_request, Request, ResponseEnvelope, TimelinePayload};
use timeline_node::{refresher, server_local, server_public};

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Start {
            ip,
            port,
            local_port,
            data_dir,
            bootstrap,
        } => start(ip, port, local_port, data_dir, bootstrap).await,
        Command::Post {
            content,
            file,
            local_port,
        } => {
            let content = match (content, file) {
                (Some(c), None) => c,
                (None, Some(path)) => std::fs::read_to_string(path)?,
                (Some(_), Some(_)) => anyhow::bail!("give either content or --file, not both"),
                (None, None) => anyhow::bail!("give either content or --file"),
            };
            run_client(local_port, Request::Post { content: Some(content) }).await
        }
        Command::Delete {
            post_id,
            local_port,
        } => {
            run_client(
                local_port,
                Request::Delete {
                    post_id: Some(post_id),
                },
            )
            .await
        }
        Command::Get {
            userid,
            max_posts,
            local_port,
        } => {
            run_client(
                local_port,
                Request::Get {
                    userid: Some(userid),
                    max_posts,
                },
            )
            .await
        }
        Command::Sub { userid, local_port } => {
            run_client(local_port, Request::Sub { userid: Some(userid) }).await
        }
        Command::Unsub { userid, local_port } => {
            run_client(local_port, Request::Unsub { userid: Some(userid) }).await
        }
        Command::View {
            max_posts,
            local_port,
        } => run_client(local_port, Request::View { max_posts }).await,
        Command::PeopleIMayKnow {
            max_users,
            local_port,
        } => run_client(local_port, Request::PeopleIMayKnow { max_users }).await,
    }
}

async fn start(
    ip: IpAddr,
    port: u16,
    local_port: u16,
    data_dir: std::path::PathBuf,
    bootstrap: Vec<String>,
) -> anyhow::Result<()> {
    let me = User::new(ip, port);
    let mut config = Config::new(me, local_port, data_dir);
    for raw in bootstrap {
        config.bootstrap_nodes.push(raw.parse::<User>()?);
    }

    let dht = Arc::new(InMemoryDht::new());
    let node = Node::load(config, dht)?;

    let bootstrap_nodes = node.config.bootstrap_nodes.clone();
    node_dht_bootstrap(&node, &bootstrap_nodes).await;

    let local = tokio::spawn(server_local::serve(node.clone(), node.config.local_port));
    let public = tokio::spawn(server_public::serve(node.clone()));
    let refresh = tokio::spawn(refresher::run(node.clone()));

    tracing::info!(%me, "node started");

    tokio::select! {
        res = local => res??,
        res = public => res??,
        _ = refresh => {},
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
    }

    Ok(())
}

async fn node_dht_bootstrap(node: &Arc<Node>, nodes: &[User]) {
    if nodes.is_empty() {
        return;
    }
    if let Err(e) = node.bootstrap_dht(nodes).await {
        tracing::warn!(error = %e, "DHT bootstrap failed");
    }
}

async fn run_client(local_port: u16, request: Request) -> anyhow::Result<()> {
    let addr = (IpAddr::V4(Ipv4Addr::LOCALHOST), local_port);
    let response = send_request(addr, &request).await?;
    let ok = response.is_ok();
    print_response(&response);
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Renders a timeline/user-list response as a plain aligned table; falls
/// back to the raw JSON envelope for anything else (errors, empty oks).
fn print_response(response: &ResponseEnvelope) {
    if !response.is_ok() {
        eprintln!("error: {}", response.error.as_deref().unwrap_or("unknown"));
        return;
    }

    match &response.timeline {
        Some(TimelinePayload::Single(Timeline::Own(t))) => {
            for post in &t.posts {
                println!("{:>6}  {}  {}", post.id, post.timestamp, post.content);
            }
        }
        Some(TimelinePayload::Single(Timeline::Cached(t))) => {
            for post in &t.posts {
                println!("{:>6}  {}  {}", post.id, post.timestamp, post.content);
            }
        }
        Some(TimelinePayload::Merged(m)) => {
            for tagged in &m.posts {
                println!(
                    "{:>6}  {}  {:<22}  {}",
                    tagged.post.id, tagged.post.timestamp, tagged.owner, tagged.post.content
                );
            }
        }
        None => {}
    }

    if let Some(users) = &response.users {
        for u in users {
            println!("{}  (followed by: {})", u.userid, u.subscribed_by.join(", "));
        }
    }

    if let Some(warnings) = &response.warnings {
        for w in warnings {
            eprintln!("warning: {} ({})", w.message, w.subscription);
        }
    }
}
