//! Background cache refresher: every `cache_frequency`, fan out one
//! `update_cached_timeline` task per current subscription.

use std::sync::Arc;

use tracing::debug;

use crate::node::Node;

pub async fn run(node: Arc<Node>) {
    let mut ticker = tokio::time::interval(node.config.cache_frequency);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let subs = node.subscriptions_snapshot().await;
        debug!(count = subs.len(), "refreshing cached timelines");
        for target in subs {
            let node = node.clone();
            tokio::spawn(async move { node.update_cached_timeline(target).await });
        }
    }
}
