//! Subscription set. A durable, insertion-ordered set of `User`s this
//! node follows. Invariant: the node's own `User` is never a member.

use serde::{Deserialize, Serialize};

use crate::identity::User;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subscriptions {
    users: Vec<User>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, user: User) -> bool {
        self.users.contains(&user)
    }

    /// Returns `false` (no-op) if already present.
    pub fn add(&mut self, user: User) -> bool {
        if self.users.contains(&user) {
            false
        } else {
            self.users.push(user);
            true
        }
    }

    /// Returns `false` (no-op) if absent.
    pub fn remove(&mut self, user: User) -> bool {
        if let Some(idx) = self.users.iter().position(|u| *u == user) {
            self.users.remove(idx);
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = User> + '_ {
        self.users.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::str::FromStr;

    fn user(port: u16) -> User {
        User::new(IpAddr::from_str("127.0.0.1").unwrap(), port)
    }

    #[test]
    fn add_then_contains() {
        let mut subs = Subscriptions::new();
        assert!(subs.add(user(8000)));
        assert!(subs.contains(user(8000)));
        assert!(!subs.add(user(8000)), "adding twice is a no-op");
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let mut subs = Subscriptions::new();
        assert!(!subs.remove(user(8000)));
    }

    #[test]
    fn parity_of_sub_unsub_sequence() {
        let mut subs = Subscriptions::new();
        let u = user(8000);
        subs.add(u);
        subs.remove(u);
        subs.add(u);
        assert!(subs.contains(u));
        subs.remove(u);
        assert!(!subs.contains(u));
    }

    #[test]
    fn json_roundtrip() {
        let mut subs = Subscriptions::new();
        subs.add(user(8000));
        subs.add(user(8001));
        let json = serde_json::to_string(&subs).unwrap();
        let back: Subscriptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.users, subs.users);
    }
}
