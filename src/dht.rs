//! DHT wrapper. Wraps a bare `get`/`put` key-value contract (assumed
//! last-writer-wins, best-effort replication — e.g. Kademlia) with the
//! subscription reconciliation algorithm below.
//!
//! The DHT transport itself is out of scope; `Dht` is the
//! seam the core consumes. Tests use an in-memory double.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::identity::User;

#[async_trait]
pub trait Dht: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Republish is a no-op if the backing DHT already republishes; the
    /// core only calls this to refresh ownership of reinserted keys.
    async fn republish(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn bootstrap(&self, _nodes: &[User]) -> Result<()> {
        Ok(())
    }
}

pub fn subscribed_key(user: User) -> String {
    format!("{user}-subscribed")
}

pub fn subscribers_key(user: User) -> String {
    format!("{user}-subscribers")
}

pub struct DhtWrapper {
    dht: std::sync::Arc<dyn Dht>,
    backoff_cap: Duration,
}

impl DhtWrapper {
    pub fn new(dht: std::sync::Arc<dyn Dht>, config: &Config) -> Self {
        Self {
            dht,
            backoff_cap: config.reconcile_backoff_cap,
        }
    }

    async fn get_users(&self, key: &str) -> Result<Vec<User>> {
        match self.dht.get(key).await? {
            None => Ok(Vec::new()),
            Some(raw) => {
                let strs: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
                Ok(strs
                    .into_iter()
                    .filter_map(|s| s.parse::<User>().ok())
                    .collect())
            }
        }
    }

    async fn put_users(&self, key: &str, users: &[User]) -> Result<()> {
        let strs: Vec<String> = users.iter().map(User::to_string).collect();
        let raw = serde_json::to_string(&strs)?;
        self.dht.put(key, &raw).await
    }

    /// The caller's own followed-list is stored under `<caller>-subscribed`,
    /// not under `<target>-subscribed`.
    async fn overwrite_own_subscribed(&self, caller: User, my_local_subs: &[User]) -> Result<()> {
        self.put_users(&subscribed_key(caller), my_local_subs).await
    }

    /// A randomized-backoff read-modify-write loop converging a
    /// multi-writer key without clobbering concurrent subscribers.
    async fn reconcile(&self, key: &str, member: User, wanted_present: bool) -> Result<()> {
        let mut state = self.get_users(key).await?;
        let mut n: u32 = 0;
        loop {
            let present = state.contains(&member);
            if present == wanted_present {
                return Ok(());
            }

            if wanted_present {
                state.push(member);
            } else {
                state.retain(|u| *u != member);
            }
            self.put_users(key, &state).await?;

            let delay = jittered_backoff(n, self.backoff_cap);
            debug!(key, n, ?delay, "reconciliation backing off");
            tokio::time::sleep(delay).await;
            n += 1;

            let reread = self.get_users(key).await?;
            if reread.contains(&member) == wanted_present {
                return Ok(());
            }
            state = reread;
        }
    }

    /// `subscribe(U, my_local_subs)`: writes the caller's own subscribed
    /// list, then reconciles `U-subscribers` to include the caller.
    pub async fn subscribe(&self, caller: User, target: User, my_local_subs: &[User]) -> Result<()> {
        self.overwrite_own_subscribed(caller, my_local_subs).await?;
        self.reconcile(&subscribers_key(target), caller, true).await
    }

    pub async fn unsubscribe(
        &self,
        caller: User,
        target: User,
        my_local_subs: &[User],
    ) -> Result<()> {
        self.overwrite_own_subscribed(caller, my_local_subs).await?;
        self.reconcile(&subscribers_key(target), caller, false).await
    }

    pub async fn get_subscribers(&self, user: User) -> Result<Vec<User>> {
        self.get_users(&subscribers_key(user)).await
    }

    pub async fn get_subscribed(&self, user: User) -> Result<Vec<User>> {
        self.get_users(&subscribed_key(user)).await
    }

    /// Re-asserts ownership of an already-correct `user-subscribers` entry
    /// without modifying its membership.
    pub async fn republish_subscribers(&self, user: User) -> Result<()> {
        self.dht.republish(&subscribers_key(user)).await
    }

    pub async fn bootstrap(&self, nodes: &[User]) -> Result<()> {
        if let Err(e) = self.dht.bootstrap(nodes).await {
            warn!(error = %e, "DHT bootstrap failed");
            return Err(e);
        }
        Ok(())
    }
}

/// `min(1.5^n, cap) + uniform(0.2, 1.0)` seconds.
fn jittered_backoff(n: u32, cap: Duration) -> Duration {
    let exp = 1.5_f64.powi(n as i32).min(cap.as_secs_f64());
    let jitter: f64 = rand::thread_rng().gen_range(0.2..1.0);
    Duration::from_secs_f64(exp + jitter)
}

/// A process-local `Dht` implementation. The real distributed DHT
/// transport (Kademlia wire protocol, peer discovery) is out of scope; any
/// backend satisfying the `Dht` trait plugs in at the same seam. This one
/// keeps a single process runnable standalone and gives the test suite a
/// real (if non-networked) `get`/`put` store to reconcile against.
pub mod memory {
    use super::{Dht, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default, Clone)]
    pub struct InMemoryDht {
        inner: Arc<Mutex<HashMap<String, String>>>,
    }

    impl InMemoryDht {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl Dht for InMemoryDht {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.inner.lock().await.get(key).cloned())
        }

        async fn put(&self, key: &str, value: &str) -> Result<()> {
            self.inner
                .lock()
                .await
                .insert(key.to_owned(), value.to_owned());
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    pub use super::memory::InMemoryDht;
    use crate::identity::User;

    pub fn fast_config(me: User) -> crate::config::Config {
        let mut cfg = crate::config::Config::new(me, 0, std::env::temp_dir());
        cfg.reconcile_backoff_cap = std::time::Duration::from_millis(1);
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{fast_config, InMemoryDht};
    use super::*;
    use std::net::IpAddr;
    use std::str::FromStr;
    use std::sync::Arc;

    fn user(port: u16) -> User {
        User::new(IpAddr::from_str("127.0.0.1").unwrap(), port)
    }

    #[tokio::test]
    async fn subscribe_adds_caller_to_subscribers_and_writes_own_subscribed() {
        let dht = Arc::new(InMemoryDht::new());
        let a = user(8000);
        let b = user(8001);
        let wrapper = DhtWrapper::new(dht, &fast_config(b));

        wrapper.subscribe(b, a, &[a]).await.unwrap();

        let subscribers = wrapper.get_subscribers(a).await.unwrap();
        assert_eq!(subscribers, vec![b]);

        let subscribed = wrapper.get_subscribed(b).await.unwrap();
        assert_eq!(subscribed, vec![a]);
    }

    #[tokio::test]
    async fn unsubscribe_removes_caller_from_subscribers() {
        let dht = Arc::new(InMemoryDht::new());
        let a = user(8000);
        let b = user(8001);
        let wrapper = DhtWrapper::new(dht, &fast_config(b));

        wrapper.subscribe(b, a, &[a]).await.unwrap();
        wrapper.unsubscribe(b, a, &[]).await.unwrap();

        assert!(wrapper.get_subscribers(a).await.unwrap().is_empty());
        assert!(wrapper.get_subscribed(b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconcile_is_idempotent_when_already_in_desired_state() {
        let dht = Arc::new(InMemoryDht::new());
        let a = user(8000);
        let b = user(8001);
        let wrapper = DhtWrapper::new(dht, &fast_config(b));

        wrapper.subscribe(b, a, &[a]).await.unwrap();
        // Subscribing again should terminate immediately without error.
        wrapper.subscribe(b, a, &[a]).await.unwrap();
        assert_eq!(wrapper.get_subscribers(a).await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn concurrent_subscribers_both_converge_in_subscribers_set() {
        let dht = Arc::new(InMemoryDht::new());
        let a = user(8000);
        let b = user(8001);
        let c = user(8002);
        let wb = DhtWrapper::new(dht.clone(), &fast_config(b));
        let wc = DhtWrapper::new(dht.clone(), &fast_config(c));

        let (r1, r2) = tokio::join!(wb.subscribe(b, a, &[a]), wc.subscribe(c, a, &[a]));
        r1.unwrap();
        r2.unwrap();

        let mut subscribers = wb.get_subscribers(a).await.unwrap();
        subscribers.sort();
        let mut expected = vec![b, c];
        expected.sort();
        assert_eq!(subscribers, expected);
    }

    #[test]
    fn jittered_backoff_stays_under_cap_plus_jitter() {
        let cap = Duration::from_secs(10);
        for n in 0..10 {
            let d = jittered_backoff(n, cap);
            assert!(d.as_secs_f64() <= 11.0);
            assert!(d.as_secs_f64() >= 0.2);
        }
    }
}
