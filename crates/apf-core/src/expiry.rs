//! Timed rule eviction
//!
//! One worker task owns the delay queue; mutators talk to it over a channel.
//! When a deadline fires the worker removes the rule exactly as an external
//! caller would, so eager eviction and manual removal share one code path.

use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;

use futures::StreamExt;
use log::debug;
use tokio::sync::mpsc;
use tokio_util::time::delay_queue::{DelayQueue, Key};

use crate::filter::FilterCore;

#[derive(Debug)]
pub(crate) enum EvictionCmd {
    Schedule { text: String, after: Duration },
    Cancel { text: String },
}

/// Spawn the eviction worker. Must run within a Tokio runtime. The worker
/// exits once every filter handle is gone or the channel closes.
pub(crate) fn spawn(core: Weak<FilterCore>) -> mpsc::UnboundedSender<EvictionCmd> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(core, rx));
    tx
}

async fn run(core: Weak<FilterCore>, mut rx: mpsc::UnboundedReceiver<EvictionCmd>) {
    let mut queue: DelayQueue<String> = DelayQueue::new();
    let mut pending: HashMap<String, Key> = HashMap::new();

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(EvictionCmd::Schedule { text, after }) => {
                    // re-scheduling a text replaces its previous deadline
                    if let Some(key) = pending.remove(&text) {
                        queue.remove(&key);
                    }
                    let key = queue.insert(text.clone(), after);
                    pending.insert(text, key);
                }
                Some(EvictionCmd::Cancel { text }) => {
                    if let Some(key) = pending.remove(&text) {
                        queue.remove(&key);
                    }
                }
                None => return,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let text = expired.into_inner();
                pending.remove(&text);
                let Some(core) = core.upgrade() else { return };
                if core.remove_now(&text) {
                    debug!("evicted expired rule {text:?}");
                }
            }
        }
    }
}
