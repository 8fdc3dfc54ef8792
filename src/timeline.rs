//! Timeline & cache model. Two kinds of timeline — an owner's
//! authoritative, mutable `OwnTimeline` and an immutable `CachedTimeline`
//! snapshot with a validity window — modeled as a tagged `Timeline` enum
//! rather than inheritance.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::User;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnTimeline {
    pub userid: User,
    pub posts: Vec<Post>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTimeline {
    pub userid: User,
    pub posts: Vec<Post>,
    pub total_posts: usize,
    pub last_updated: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

/// Tagged variant standing in for the on-disk and wire representation of a
/// timeline. Presence of `valid_until` in the serialized JSON discriminates
/// the two — see the custom (de)serialization below.
#[derive(Debug, Clone)]
pub enum Timeline {
    Own(OwnTimeline),
    Cached(CachedTimeline),
}

impl Timeline {
    pub fn userid(&self) -> User {
        match self {
            Timeline::Own(t) => t.userid,
            Timeline::Cached(t) => t.userid,
        }
    }

    pub fn posts(&self) -> &[Post] {
        match self {
            Timeline::Own(t) => &t.posts,
            Timeline::Cached(t) => &t.posts,
        }
    }

    /// An own timeline is always valid; a cached one only until
    /// `valid_until` (or forever, if `None`).
    pub fn is_valid(&self) -> bool {
        match self {
            Timeline::Own(_) => true,
            Timeline::Cached(t) => t.valid_until.is_none_or(|v| Utc::now() < v),
        }
    }

    pub fn as_cached(&self) -> Option<&CachedTimeline> {
        match self {
            Timeline::Cached(t) => Some(t),
            Timeline::Own(_) => None,
        }
    }
}

impl OwnTimeline {
    pub fn new(userid: User) -> Self {
        Self {
            userid,
            posts: Vec::new(),
        }
    }

    /// Appends `{id, timestamp=now, content}` and returns the new post.
    pub fn add_post(&mut self, content: String, id: u64) -> Post {
        let post = Post {
            id,
            timestamp: Utc::now(),
            content,
        };
        self.posts.push(post.clone());
        post
    }

    /// Removes the first post with the given id, if any.
    pub fn remove_post_by_id(&mut self, id: u64) -> bool {
        if let Some(idx) = self.posts.iter().position(|p| p.id == id) {
            self.posts.remove(idx);
            true
        } else {
            false
        }
    }

    /// Sorts by timestamp descending, keeps the first `max_posts` (or all),
    /// stamps `last_updated = now`, sets `valid_until` when `ttl` given.
    pub fn cache(&self, max_posts: Option<usize>, ttl: Option<Duration>) -> CachedTimeline {
        let mut posts = self.posts.clone();
        posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let total_posts = posts.len();
        if let Some(max) = max_posts {
            posts.truncate(max);
        }
        let now = Utc::now();
        CachedTimeline {
            userid: self.userid,
            posts,
            total_posts,
            last_updated: now,
            valid_until: ttl.map(|d| now + d),
        }
    }
}

impl CachedTimeline {
    /// Re-truncates without refreshing `last_updated`/`valid_until`.
    pub fn cache(&self, max_posts: Option<usize>) -> CachedTimeline {
        let mut posts = self.posts.clone();
        posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(max) = max_posts {
            posts.truncate(max);
        }
        CachedTimeline {
            userid: self.userid,
            posts,
            total_posts: self.total_posts,
            last_updated: self.last_updated,
            valid_until: self.valid_until,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedPost {
    pub owner: User,
    pub post: Post,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedTimeline {
    pub posts: Vec<TaggedPost>,
}

impl MergedTimeline {
    /// Flattens many `(owner, posts)` pairs, sorts descending by timestamp,
    /// truncates to `max_posts` if given.
    pub fn from_timelines<'a>(
        timelines: impl IntoIterator<Item = (User, &'a [Post])>,
        max_posts: Option<usize>,
    ) -> Self {
        let mut tagged: Vec<TaggedPost> = timelines
            .into_iter()
            .flat_map(|(owner, posts)| {
                posts.iter().map(move |post| TaggedPost {
                    owner,
                    post: post.clone(),
                })
            })
            .collect();
        tagged.sort_by(|a, b| b.post.timestamp.cmp(&a.post.timestamp));
        if let Some(max) = max_posts {
            tagged.truncate(max);
        }
        MergedTimeline { posts: tagged }
    }
}

/// Durable counter for post ids: starts at 0, incremented on successful
/// publish, rolled back on failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NextPostId {
    pub id: u64,
}

impl Default for NextPostId {
    fn default() -> Self {
        Self { id: 0 }
    }
}

impl NextPostId {
    pub fn next(&mut self) -> u64 {
        let id = self.id;
        self.id += 1;
        id
    }

    pub fn rollback(&mut self, id: u64) {
        if self.id == id + 1 {
            self.id = id;
        }
    }
}

// --- (de)serialization discriminating Own vs Cached by presence of `valid_until` ---

impl Serialize for Timeline {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Timeline::Own(t) => t.serialize(serializer),
            Timeline::Cached(t) => t.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Timeline {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        if value.get("valid_until").is_some() {
            let cached: CachedTimeline =
                serde_json::from_value(value).map_err(serde::de::Error::custom)?;
            Ok(Timeline::Cached(cached))
        } else {
            let own: OwnTimeline =
                serde_json::from_value(value).map_err(serde::de::Error::custom)?;
            Ok(Timeline::Own(own))
        }
    }
}
