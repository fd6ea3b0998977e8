//! Core type definitions for apfilter
//!
//! These types are shared between the rule compiler, the index and the
//! matching entry points.

// =============================================================================
// Verdict
// =============================================================================

/// Final decision for a queried URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// A block rule matched - route the request through the proxy.
    Blocked,
    /// An exception rule matched - never block, regardless of block rules.
    Excluded,
    /// No rule matched.
    Unmatched,
}

impl Verdict {
    /// True iff the caller should route via the proxy.
    #[inline]
    pub fn should_proxy(self) -> bool {
        self == Verdict::Blocked
    }
}

// =============================================================================
// Rule Kinds
// =============================================================================

/// Classification assigned to a rule by the compiler.
///
/// The kind decides both how the pattern is synthesized and which index tier
/// can hold the rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    /// `||host` - matches a host and all of its subdomains.
    DomainAnchor,
    /// `@@||host` - exception form of [`RuleKind::DomainAnchor`].
    DomainAnchorException,
    /// `|http://...` without wildcards - a literal URL prefix.
    UrlPrefix,
    /// `|https://host[/path]` - anchored to the https scheme.
    HttpsPrefix,
    /// Plain text with `*`/`^`/`|` wildcard syntax.
    GenericWildcard,
    /// `/.../` - the interior is compiled verbatim.
    RawRegex,
}

// =============================================================================
// Index Statistics
// =============================================================================

/// Per-tier sizes of a [`crate::RuleIndex`], for diagnostics and KEYLEN
/// tuning. Not used for correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Exact block-domain entries.
    pub domains: usize,
    /// Exact exception-domain entries.
    pub exclude_domains: usize,
    /// Literal URL prefixes.
    pub url_prefixes: usize,
    /// Occupied keyed buckets.
    pub keyed_buckets: usize,
    /// Rules stored across all keyed buckets.
    pub keyed_rules: usize,
    /// Block rules in the linear fallback tier.
    pub linear_matches: usize,
    /// Exception rules in the linear fallback tier.
    pub linear_excludes: usize,
    /// All registered rule texts.
    pub total_rules: usize,
}

impl IndexStats {
    /// Entries answerable with a constant-time set lookup.
    pub fn constant_time(&self) -> usize {
        self.domains + self.exclude_domains
    }

    /// Entries that require a full linear scan.
    pub fn linear_time(&self) -> usize {
        self.linear_matches + self.linear_excludes
    }
}
