//! apfilter Core Library
//!
//! This crate decides, for a URL/host pair, whether it matches a block/allow
//! list written in the Adblock-Plus-like syntax used by "gfwlist"-style
//! circumvention filters. Callers (typically a proxy server) run one query
//! per outgoing request to pick a route: `Blocked` means "send via proxy",
//! anything else means "connect directly".
//!
//! # Architecture
//!
//! Rule texts are compiled once into classified matchers and stored in tiered
//! containers that trade memory for average-case O(1) lookups: exact-domain
//! sets, domain-suffix sets, literal URL prefixes, keyed substring buckets,
//! and a final linear regex scan for everything else. Only that last tier is
//! O(n) in the number of un-indexable rules.
//!
//! # Modules
//!
//! - `rule`: the rule compiler (text -> classified, compiled matcher)
//! - `index`: the tiered rule index and the match decision procedure
//! - `url`: host derivation from URLs and bare `host:port` strings
//! - `filter`: the shared, concurrently-usable filter handle
//! - `types`: shared type definitions

pub mod filter;
pub mod index;
pub mod rule;
pub mod types;
pub mod url;

mod expiry;

// Re-export commonly used types
pub use filter::Filter;
pub use index::{Evaluation, RuleIndex, KEYLEN};
pub use rule::{Rule, RuleError, RuleMatch};
pub use types::{IndexStats, RuleKind, Verdict};
