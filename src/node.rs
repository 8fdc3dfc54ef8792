//! The node orchestrator. Owns the in-memory own timeline,
//! subscriptions, and next-post-id counter exclusively; the local and
//! public servers reach them only through `Node`'s async methods, so the
//! snapshot-and-restore pattern below is trivially atomic: no `.await`
//! happens between snapshot and commit of the in-memory structure itself.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::Config;
use crate::dht::{Dht, DhtWrapper};
use crate::error::{NodeError, Result};
use crate::identity::User;
use crate::store::BlobStore;
use crate::subscriptions::Subscriptions;
use crate::timeline::{MergedTimeline, NextPostId, OwnTimeline, Post, Timeline};
use crate::transport::{self, Request, SuggestedUser, TimelinePayload, Warning};

const NEXT_POST_ID_PATH: &str = "next_post_id.json";
const SUBSCRIPTIONS_PATH: &str = "subscriptions.json";

fn timeline_path(user: User) -> String {
    format!("timelines/{}.json", user.to_filename())
}

pub struct Node {
    pub config: Config,
    store: BlobStore,
    own_timeline: RwLock<OwnTimeline>,
    next_post_id: RwLock<NextPostId>,
    subscriptions: RwLock<Subscriptions>,
    dht: DhtWrapper,
}

impl Node {
    /// Loads all four persisted objects (own timeline, next-post-id,
    /// subscriptions, per-subscription cached timelines stay on disk and
    /// are read lazily). A load failure here is fatal — the caller should
    /// exit non-zero.
    pub fn load(config: Config, dht: Arc<dyn Dht>) -> Result<Arc<Self>> {
        let store = BlobStore::for_user(&config.data_dir, config.me);
        store.create_dir("timelines")?;

        let own_timeline = if store.exists(&timeline_path(config.me)) {
            match store.read::<Timeline>(&timeline_path(config.me))? {
                Timeline::Own(t) => t,
                Timeline::Cached(_) => {
                    return Err(NodeError::Io(std::io::Error::other(
                        "own timeline file holds a cached timeline",
                    )))
                }
            }
        } else {
            OwnTimeline::new(config.me)
        };

        let next_post_id = if store.exists(NEXT_POST_ID_PATH) {
            store.read(NEXT_POST_ID_PATH)?
        } else {
            NextPostId::default()
        };

        let subscriptions = if store.exists(SUBSCRIPTIONS_PATH) {
            store.read(SUBSCRIPTIONS_PATH)?
        } else {
            Subscriptions::new()
        };

        let dht = DhtWrapper::new(dht, &config);

        Ok(Arc::new(Self {
            config,
            store,
            own_timeline: RwLock::new(own_timeline),
            next_post_id: RwLock::new(next_post_id),
            subscriptions: RwLock::new(subscriptions),
            dht,
        }))
    }

    pub fn me(&self) -> User {
        self.config.me
    }

    pub async fn bootstrap_dht(&self, nodes: &[User]) -> Result<()> {
        self.dht.bootstrap(nodes).await
    }

    // --- steps 4.6.1-2: local / cache --------------------------------------

    /// Steps 1-2 of the get pipeline: own timeline, or a still-valid cache.
    /// Used directly by the public server (which additionally restricts to
    /// `U == self || U ∈ Subscriptions` before calling this).
    pub async fn local_or_cached(&self, target: User, max_posts: Option<usize>) -> Result<Timeline> {
        if target == self.config.me {
            let own = self.own_timeline.read().await;
            return Ok(Timeline::Cached(own.cache(max_posts, None)));
        }

        let path = timeline_path(target);
        if self.store.exists(&path) {
            let timeline: Timeline = self.store.read(&path)?;
            if timeline.is_valid() {
                if let Timeline::Cached(ct) = timeline {
                    return Ok(Timeline::Cached(ct.cache(max_posts)));
                }
            } else {
                self.store.delete(&path)?;
            }
        }

        Err(NodeError::NotLocallyAvailable)
    }

    // --- steps 4.6.3-4: owner, then subscriber fallback with heuristic -----

    /// Steps 3-4: contact the owner directly, then fall back to subscribers
    /// discovered via the DHT, applying the freshness heuristic.
    pub async fn get_peers(
        &self,
        target: User,
        max_posts: Option<usize>,
        last_updated_after: Option<DateTime<Utc>>,
    ) -> Result<Timeline> {
        let request = Request::GetTimeline {
            userid: Some(target.to_string()),
            max_posts,
        };

        if let Ok(resp) = transport::send_request((target.ip, target.port), &request).await {
            if let Some((timeline, _)) = as_cached_payload(resp) {
                return Ok(timeline);
            }
        }

        let mut best: Option<(Timeline, DateTime<Utc>)> = None;

        let mut subscribers = self.dht.get_subscribers(target).await?;
        if subscribers.is_empty() {
            return Err(NodeError::NoAvailableSource);
        }

        shuffle(&mut subscribers);
        subscribers.retain(|u| *u != self.config.me);

        let mut probability = self.config.freshness_initial_probability;
        let mut baseline = last_updated_after;

        for subscriber in subscribers {
            debug!(%subscriber, "probing subscriber for timeline");
            let Ok(resp) = transport::send_request((subscriber.ip, subscriber.port), &request).await
            else {
                continue;
            };
            let Some((timeline, la)) = as_cached_payload(resp) else {
                continue;
            };

            let improved = baseline.is_none_or(|b| la > b);
            if improved {
                baseline = Some(la);
                best = Some((timeline, la));
                continue;
            }

            // Non-improving: probabilistically keep probing, decaying `p`.
            if rand::thread_rng().gen_bool(probability) {
                probability *= self.config.freshness_decay;
            } else {
                break;
            }
        }

        best.map(|(t, _)| t).ok_or(NodeError::NoAvailableSource)
    }

    /// The full get pipeline: local or cache, then owner, then subscriber fallback.
    pub async fn get(&self, target: User, max_posts: Option<usize>) -> Result<Timeline> {
        match self.local_or_cached(target, max_posts).await {
            Ok(t) => Ok(t),
            Err(_) => self.get_peers(target, max_posts, None).await,
        }
    }

    // --- post / delete ------------------------------------------------------

    pub async fn post(&self, content: String) -> Result<Post> {
        let mut next_id = self.next_post_id.write().await;
        let mut own = self.own_timeline.write().await;

        let id = next_id.next();
        let post = own.add_post(content, id);

        let persisted = self
            .store
            .write(&timeline_path(self.config.me), &Timeline::Own(own.clone()))
            .and_then(|()| self.store.write(NEXT_POST_ID_PATH, &*next_id));

        match persisted {
            Ok(()) => Ok(post),
            Err(e) => {
                warn!(error = %e, "post failed, rolling back");
                own.remove_post_by_id(id);
                next_id.rollback(id);
                Err(NodeError::CouldNotPost)
            }
        }
    }

    pub async fn delete(&self, post_id: u64) -> Result<()> {
        let mut own = self.own_timeline.write().await;
        let before = own.clone();

        if !own.remove_post_by_id(post_id) {
            return Err(NodeError::PostNotFound);
        }

        if let Err(e) = self
            .store
            .write(&timeline_path(self.config.me), &Timeline::Own(own.clone()))
        {
            warn!(error = %e, "delete failed, rolling back");
            *own = before;
            return Err(e);
        }

        Ok(())
    }

    // --- sub / unsub ----------------------------------------------------

    pub async fn sub(self: &Arc<Self>, target: User) -> Result<()> {
        if target == self.config.me {
            return Err(NodeError::CannotSubscribeToSelf);
        }

        let mut subs = self.subscriptions.write().await;
        if subs.contains(target) {
            return Err(NodeError::AlreadySubscribed);
        }
        let snapshot = subs.clone();
        subs.add(target);

        let local_subs: Vec<User> = subs.iter().collect();
        let result = self
            .store
            .write(SUBSCRIPTIONS_PATH, &*subs)
            .map_err(NodeError::from);
        let result = match result {
            Ok(()) => self
                .dht
                .subscribe(self.config.me, target, &local_subs)
                .await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                drop(subs);
                self.spawn_immediate_refresh(target);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "subscribe failed, rolling back");
                *subs = snapshot;
                Err(NodeError::CouldNotSubscribe)
            }
        }
    }

    pub async fn unsub(&self, target: User) -> Result<()> {
        if target == self.config.me {
            return Err(NodeError::CannotUnsubscribeFromSelf);
        }

        let mut subs = self.subscriptions.write().await;
        if !subs.contains(target) {
            return Err(NodeError::NotSubscribed);
        }
        let snapshot = subs.clone();
        subs.remove(target);

        let local_subs: Vec<User> = subs.iter().collect();
        let result: Result<()> = (|| {
            self.store.write(SUBSCRIPTIONS_PATH, &*subs)?;
            self.store.delete(&timeline_path(target))?;
            Ok(())
        })();
        let result = match result {
            Ok(()) => {
                self.dht
                    .unsubscribe(self.config.me, target, &local_subs)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "unsubscribe failed, rolling back");
                *subs = snapshot;
                Err(NodeError::CouldNotUnsubscribe)
            }
        }
    }

    pub async fn is_subscribed(&self, target: User) -> bool {
        self.subscriptions.read().await.contains(target)
    }

    pub async fn subscriptions_snapshot(&self) -> Vec<User> {
        self.subscriptions.read().await.iter().collect()
    }

    // --- view -------------------------------------------------------------

    pub async fn view(&self, max_posts: Option<usize>) -> (MergedTimeline, Vec<Warning>) {
        let own = self.own_timeline.read().await.clone();
        let subs = self.subscriptions_snapshot().await;

        let mut timelines: Vec<(User, Vec<Post>)> = vec![(own.userid, own.posts)];
        let mut warnings = Vec::new();

        for sub in subs {
            match self.get(sub, None).await {
                Ok(t) => timelines.push((sub, t.posts().to_vec())),
                Err(e) => warnings.push(Warning {
                    message: e.to_string(),
                    subscription: sub.to_string(),
                }),
            }
        }

        let refs: Vec<(User, &[Post])> =
            timelines.iter().map(|(u, p)| (*u, p.as_slice())).collect();
        (MergedTimeline::from_timelines(refs, max_posts), warnings)
    }

    // --- people-i-may-know --------------------------------------------------

    pub async fn people_i_may_know(&self, max_users: Option<usize>) -> Vec<SuggestedUser> {
        let subs = self.subscriptions_snapshot().await;
        let mut order: Vec<User> = Vec::new();
        let mut sub_by: HashMap<User, Vec<User>> = HashMap::new();

        for v in &subs {
            let Ok(subscribed) = self.dht.get_subscribed(*v).await else {
                continue;
            };
            for w in subscribed {
                if w == self.config.me || subs.contains(&w) {
                    continue;
                }
                sub_by
                    .entry(w)
                    .or_insert_with(|| {
                        order.push(w);
                        Vec::new()
                    })
                    .push(*v);
            }
        }

        let mut list: Vec<(User, Vec<User>)> = order
            .into_iter()
            .map(|u| (u, sub_by.remove(&u).unwrap_or_default()))
            .collect();
        list.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
        if let Some(max) = max_users {
            list.truncate(max);
        }

        list.into_iter()
            .map(|(u, by)| SuggestedUser {
                userid: u.to_string(),
                subscribed_by: by.iter().map(User::to_string).collect(),
            })
            .collect()
    }

    // --- cache refresher --------------------------------------------------

    fn spawn_immediate_refresh(self: &Arc<Self>, target: User) {
        let node = self.clone();
        tokio::spawn(async move { node.update_cached_timeline(target).await });
    }

    /// Re-asserts membership in `U-subscribers`, then runs `get_peers` and
    /// persists the freshest timeline found.
    pub async fn update_cached_timeline(self: &Arc<Self>, target: User) {
        let subscribers = match self.dht.get_subscribers(target).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, %target, "cache refresh: could not read subscribers");
                return;
            }
        };

        let refresh_result = if subscribers.contains(&self.config.me) {
            self.dht
                .republish_subscribers(target)
                .await
        } else {
            let local_subs = self.subscriptions_snapshot().await;
            self.dht
                .subscribe(self.config.me, target, &local_subs)
                .await
        };
        if let Err(e) = refresh_result {
            warn!(error = %e, %target, "cache refresh: could not refresh subscription");
            return;
        }

        let baseline = self.existing_cache_baseline(target).await;
        match self
            .get_peers(target, self.config.max_cached_posts, baseline)
            .await
        {
            Ok(timeline) => {
                if let Err(e) = self.store.write(&timeline_path(target), &timeline) {
                    warn!(error = %e, %target, "cache refresh: could not persist timeline");
                }
            }
            Err(e) => warn!(error = %e, %target, "cache refresh: no source found"),
        }
    }

    async fn existing_cache_baseline(&self, target: User) -> Option<DateTime<Utc>> {
        let path = timeline_path(target);
        if !self.store.exists(&path) {
            return None;
        }
        let timeline: Timeline = self.store.read::<Timeline>(&path).ok()?;
        match timeline {
            Timeline::Cached(ct) if ct.valid_until.is_none_or(|v| Utc::now() < v) => {
                Some(ct.last_updated)
            }
            _ => None,
        }
    }

    // --- self-healing -------------------------------------------------------

    /// Schedules a background re-check: if this node erroneously appears in
    /// `target`'s subscribers set despite not following `target` locally,
    /// it unsubscribes itself.
    pub fn spawn_self_heal(self: &Arc<Self>, target: User) {
        let node = self.clone();
        tokio::spawn(async move {
            let Ok(subscribers) = node.dht.get_subscribers(target).await else {
                return;
            };
            if !subscribers.contains(&node.config.me) {
                return;
            }
            let local_subs = node.subscriptions_snapshot().await;
            if let Err(e) = node
                .dht
                .unsubscribe(node.config.me, target, &local_subs)
                .await
            {
                warn!(error = %e, %target, "self-heal: could not unsubscribe");
            }
        });
    }
}

fn as_cached_payload(resp: crate::transport::ResponseEnvelope) -> Option<(Timeline, DateTime<Utc>)> {
    if !resp.is_ok() {
        return None;
    }
    match resp.timeline {
        Some(TimelinePayload::Single(Timeline::Cached(ct))) => {
            let la = ct.last_updated;
            Some((Timeline::Cached(ct), la))
        }
        _ => None,
    }
}

fn shuffle(users: &mut [User]) {
    let mut rng = rand::thread_rng();
    for i in (1..users.len()).rev() {
        let j = rng.gen_range(0..=i);
        users.swap(i, j);
    }
}
