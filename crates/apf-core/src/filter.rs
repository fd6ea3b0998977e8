//! The shared filter handle
//!
//! Matching runs concurrently with mutation, so the index is published as an
//! atomically swapped snapshot: readers load it lock-free and never block on
//! a writer; mutators serialize through a single lock, clone the current
//! snapshot, apply their change and swap. Timed rules are evicted by a
//! dedicated worker task (see [`crate::expiry`]); rules found past their
//! deadline during a match are evicted right after the verdict is computed.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use log::debug;
use tokio::sync::mpsc::UnboundedSender;

use crate::expiry::{self, EvictionCmd};
use crate::index::RuleIndex;
use crate::types::{IndexStats, Verdict};

/// A cloneable handle to one shared rule index. All clones see the same
/// rules; hand one to each connection handler.
#[derive(Clone)]
pub struct Filter {
    core: Arc<FilterCore>,
}

pub(crate) struct FilterCore {
    index: ArcSwap<RuleIndex>,
    write: Mutex<()>,
    evictor: OnceLock<UnboundedSender<EvictionCmd>>,
}

impl FilterCore {
    /// Clone-mutate-swap under the writer lock. Readers keep whatever
    /// snapshot they already loaded.
    fn mutate<R>(&self, f: impl FnOnce(&mut RuleIndex) -> R) -> R {
        let _guard = self.write.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = (**self.index.load()).clone();
        let out = f(&mut next);
        self.index.store(Arc::new(next));
        out
    }

    /// Removal entry point shared with the eviction worker.
    pub(crate) fn remove_now(&self, text: &str) -> bool {
        self.mutate(|index| index.remove(text))
    }
}

impl Filter {
    pub fn new() -> Self {
        Self::with_index(RuleIndex::new())
    }

    /// Build a filter from decoded rule-list lines in one pass, without a
    /// snapshot swap per line.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::with_index(RuleIndex::from_lines(lines))
    }

    fn with_index(index: RuleIndex) -> Self {
        Self {
            core: Arc::new(FilterCore {
                index: ArcSwap::from_pointee(index),
                write: Mutex::new(()),
                evictor: OnceLock::new(),
            }),
        }
    }

    /// Register one rule line; invalid lines are silently skipped (see
    /// [`RuleIndex::add`]).
    pub fn add(&self, text: &str) {
        self.core.mutate(|index| {
            index.add(text);
        });
    }

    /// Register a batch of lines with a single snapshot swap.
    pub fn add_all<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.core.mutate(|index| {
            for line in lines {
                index.add(line.as_ref());
            }
        });
    }

    /// Register a rule that is evicted after `ttl`.
    ///
    /// The eviction worker is spawned lazily on first use, so this must be
    /// called within a Tokio runtime.
    pub fn add_with_ttl(&self, text: &str, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        let registered = self
            .core
            .mutate(|index| index.add_with_expire(text, Some(deadline)));
        if let Some(text) = registered {
            let _ = self
                .evictor()
                .send(EvictionCmd::Schedule { text, after: ttl });
        }
    }

    /// Remove a rule by its registered text; cancels a pending eviction.
    pub fn remove(&self, text: &str) -> bool {
        let removed = self.core.remove_now(text);
        if removed {
            if let Some(tx) = self.core.evictor.get() {
                let _ = tx.send(EvictionCmd::Cancel {
                    text: text.trim().to_string(),
                });
            }
        }
        removed
    }

    /// Decide the route for one URL. Never blocks on writers.
    pub fn match_url(&self, url: &str, host: Option<&str>, domain_only: bool) -> Verdict {
        let eval = self
            .core
            .index
            .load()
            .evaluate(url, host, domain_only, Instant::now());
        for text in &eval.expired {
            debug!("evicting lazily expired rule {text:?}");
            self.remove(text);
        }
        eval.verdict
    }

    /// The current index snapshot, e.g. for bulk diagnostics.
    pub fn snapshot(&self) -> Arc<RuleIndex> {
        self.core.index.load_full()
    }

    pub fn stats(&self) -> IndexStats {
        self.core.index.load().stats()
    }

    fn evictor(&self) -> &UnboundedSender<EvictionCmd> {
        self.core
            .evictor
            .get_or_init(|| expiry::spawn(Arc::downgrade(&self.core)))
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_handles_share_the_index() {
        let filter = Filter::new();
        let other = filter.clone();

        filter.add("||twitter.com");
        assert_eq!(
            other.match_url("http://x.twitter.com", None, false),
            Verdict::Blocked
        );

        assert!(other.remove("||twitter.com"));
        assert_eq!(
            filter.match_url("http://x.twitter.com", None, false),
            Verdict::Unmatched
        );
    }

    #[test]
    fn from_lines_loads_a_whole_list() {
        let filter = Filter::from_lines(["||twitter.com", "@@||qq.com", "! comment"]);
        let stats = filter.stats();
        assert_eq!(stats.total_rules, 2);
        assert_eq!(filter.snapshot().stats(), stats);
        assert_eq!(
            filter.match_url("http://www.qq.com", None, false),
            Verdict::Excluded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timed_rule_is_evicted_by_the_worker() {
        let filter = Filter::new();
        filter.add_with_ttl("||twitter.com", Duration::from_secs(30));
        assert_eq!(
            filter.match_url("http://x.twitter.com", None, false),
            Verdict::Blocked
        );

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert_eq!(
            filter.match_url("http://x.twitter.com", None, false),
            Verdict::Unmatched
        );
        assert_eq!(filter.stats().total_rules, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_remove_cancels_the_pending_eviction() {
        let filter = Filter::new();
        filter.add_with_ttl("||twitter.com", Duration::from_secs(30));
        assert!(filter.remove("||twitter.com"));

        // re-added without a deadline; the stale timer must not fire on it
        filter.add("||twitter.com");
        tokio::time::sleep(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        assert_eq!(
            filter.match_url("http://x.twitter.com", None, false),
            Verdict::Blocked
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lazily_expired_rule_is_evicted_after_a_match() {
        let filter = Filter::new();
        filter.add_with_ttl("iredmail.org", Duration::ZERO);

        // the deadline has already passed when the query runs
        assert_eq!(
            filter.match_url("http://www.test.com/iredmail.org", None, false),
            Verdict::Unmatched
        );
        assert_eq!(filter.stats().total_rules, 0);
    }
}
