//! Ambient configuration. Tunables left open by design — reconciliation
//! backoff shape, cache TTL/frequency defaults, and the freshness
//! heuristic's probability/decay — are gathered here; defaults and
//! rationale are recorded in DESIGN.md.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::identity::User;

#[derive(Debug, Clone)]
pub struct Config {
    /// This node's own public identity.
    pub me: User,
    /// Port the local (loopback) server binds.
    pub local_port: u16,
    /// Root directory under which `data/<ip-port>/` is created.
    pub data_dir: PathBuf,
    /// Bootstrap peers for the DHT transport.
    pub bootstrap_nodes: Vec<User>,
    /// How often the cache refresher loop re-fetches each subscription.
    pub cache_frequency: Duration,
    /// Default cap applied when building a cache (`None` = unbounded).
    pub max_cached_posts: Option<usize>,
    /// Default time-to-live stamped on freshly built caches (`None` = never expires).
    pub cache_ttl: Option<Duration>,
    /// Reconciliation loop backoff cap (the "10" in `min(1.5^n, 10)`).
    pub reconcile_backoff_cap: Duration,
    /// Initial probability `p` of continuing to probe subscribers in the
    /// freshness heuristic.
    pub freshness_initial_probability: f64,
    /// Multiplicative decay applied to `p` after each non-improving response.
    pub freshness_decay: f64,
}

impl Config {
    pub fn new(me: User, local_port: u16, data_dir: PathBuf) -> Self {
        Self {
            me,
            local_port,
            data_dir,
            bootstrap_nodes: Vec::new(),
            cache_frequency: Duration::from_secs(60),
            max_cached_posts: Some(50),
            cache_ttl: Some(Duration::from_secs(120)),
            reconcile_backoff_cap: Duration::from_secs(10),
            freshness_initial_probability: 0.75,
            freshness_decay: 0.5,
        }
    }

    pub fn public_ip(&self) -> IpAddr {
        self.me.ip
    }

    pub fn public_port(&self) -> u16 {
        self.me.port
    }
}
