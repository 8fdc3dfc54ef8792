//! Command-line surface: `start` launches a node; the other subcommands
//! are thin clients that speak to an already-running node's local server.

use std::net::IpAddr;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "timeline-node", about = "Decentralized microblogging node")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launches the node: local server, public server, and cache refresher.
    Start {
        /// This node's advertised IP address.
        #[arg(long)]
        ip: IpAddr,
        /// This node's advertised (public) port.
        #[arg(long)]
        port: u16,
        /// Port the local-only control server binds on loopback.
        #[arg(long, default_value_t = 9000)]
        local_port: u16,
        /// Directory under which `data/<ip-port>/` is created.
        #[arg(long, default_value = "data")]
        data_dir: std::path::PathBuf,
        /// `ip:port` of an already-running node to bootstrap the DHT from.
        #[arg(long)]
        bootstrap: Vec<String>,
    },
    /// Publishes a new post. Either give the content directly or read it
    /// from a file with `--file`.
    Post {
        content: Option<String>,
        #[arg(long, conflicts_with = "content")]
        file: Option<std::path::PathBuf>,
        #[arg(long, default_value_t = 9000)]
        local_port: u16,
    },
    /// Deletes a post by id.
    Delete {
        post_id: u64,
        #[arg(long, default_value_t = 9000)]
        local_port: u16,
    },
    /// Fetches a user's timeline.
    Get {
        userid: String,
        #[arg(long)]
        max_posts: Option<usize>,
        #[arg(long, default_value_t = 9000)]
        local_port: u16,
    },
    /// Follows a user.
    Sub {
        userid: String,
        #[arg(long, default_value_t = 9000)]
        local_port: u16,
    },
    /// Unfollows a user.
    Unsub {
        userid: String,
        #[arg(long, default_value_t = 9000)]
        local_port: u16,
    },
    /// Shows the merged timeline of self and all followed users.
    View {
        #[arg(long)]
        max_posts: Option<usize>,
        #[arg(long, default_value_t = 9000)]
        local_port: u16,
    },
    /// Suggests users followed by the people this node follows.
    PeopleIMayKnow {
        #[arg(long)]
        max_users: Option<usize>,
        #[arg(long, default_value_t = 9000)]
        local_port: u16,
    },
}
