//! The tiered rule index and match decision procedure
//!
//! This is the hot path: every outgoing request runs one `evaluate()` call.
//! Rules are stored in per-kind containers so that the common cases (domain
//! anchors, literal prefixes, long-literal patterns) are answered without
//! scanning the whole list; only rules that fit no faster tier fall back to
//! a linear regex scan.
//!
//! Classification is a single pure function ([`classify`]) used by both
//! `add` and `remove`, so removal always finds the tier chosen at add time.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use log::debug;

use crate::rule::{Rule, RuleMatch};
use crate::types::{IndexStats, Verdict};

/// Keyed-bucket key length.
///
/// Larger keys thin out bucket occupancy but push rules with short literal
/// segments into the linear tier; 6 balances both for realistic lists.
pub const KEYLEN: usize = 6;

// =============================================================================
// Tier Classification
// =============================================================================

/// Storage tier for one rule text. First matching arm wins; `remove` replays
/// the same decision.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Tier {
    Domain { host: String },
    ExcludeDomain { host: String },
    UrlPrefix { prefix: String },
    Keyed { key: String },
    Linear { exclude: bool },
}

fn classify(text: &str) -> Tier {
    if text.starts_with("||") && !text.contains('*') {
        Tier::Domain {
            host: anchor_host(&text[2..]),
        }
    } else if text.starts_with("@@||") && !text.contains('*') {
        Tier::ExcludeDomain {
            host: anchor_host(&text[4..]),
        }
    } else if text.starts_with("|https://") || text.starts_with('@') || text.starts_with('/') {
        Tier::Linear {
            exclude: text.starts_with('@'),
        }
    } else if text.starts_with("|http://") && !text.contains('*') {
        Tier::UrlPrefix {
            prefix: text[1..].to_string(),
        }
    } else if let Some(key) = bucket_key(text) {
        Tier::Keyed { key }
    } else {
        Tier::Linear { exclude: false }
    }
}

fn anchor_host(body: &str) -> String {
    body.trim_end_matches(['/', '^']).to_string()
}

/// Key for the keyed-bucket tier: the last KEYLEN characters of the longest
/// `*`-delimited literal segment, provided one is longer than KEYLEN.
fn bucket_key(text: &str) -> Option<String> {
    let seg = text
        .split('*')
        .filter(|s| s.len() > KEYLEN && s.is_ascii())
        .max_by_key(|s| s.len())?;
    Some(seg[seg.len() - KEYLEN..].to_string())
}

// =============================================================================
// Rule Index
// =============================================================================

/// Result of one match evaluation: the verdict, plus the texts of any rules
/// found past their deadline along the way (for best-effort eviction).
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub expired: Vec<String>,
}

impl Evaluation {
    fn done(verdict: Verdict, expired: Vec<String>) -> Self {
        Self { verdict, expired }
    }
}

/// The aggregate of classification tiers.
///
/// Plain single-owner container: `&mut self` to mutate, `&self` to match.
/// [`crate::Filter`] wraps it in atomically swapped snapshots for concurrent
/// use.
#[derive(Debug, Clone, Default)]
pub struct RuleIndex {
    domains: HashSet<String>,
    domain_suffixes: HashSet<String>,
    exclude_domains: HashSet<String>,
    exclude_domain_suffixes: HashSet<String>,
    url_prefixes: Vec<String>,
    keyed: HashMap<String, Vec<Rule>>,
    matches: Vec<Rule>,
    excludes: Vec<Rule>,
    texts: HashSet<String>,
}

impl RuleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from decoded rule-list lines. Malformed lines are
    /// skipped, as in [`RuleIndex::add`].
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self::new();
        for line in lines {
            index.add(line.as_ref());
        }
        index
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Register one rule line. Never fails: comments, section markers,
    /// option-bearing (`$`) lines, duplicates and uncompilable patterns are
    /// silently skipped - community filter lists routinely contain all of
    /// these.
    pub fn add(&mut self, text: &str) {
        self.add_with_expire(text, None);
    }

    /// Like [`RuleIndex::add`], with a deadline after which the rule stops
    /// matching. Returns the registered text when a rule was actually added;
    /// a `||domain/path` rule is rewritten to its `|http://domain/path`
    /// equivalent and the rewritten text is what gets registered (and what
    /// `remove` must be called with).
    pub fn add_with_expire(&mut self, text: &str, expire: Option<Instant>) -> Option<String> {
        let text = text.trim();
        if text.len() < 3
            || text.starts_with('!')
            || text.starts_with('[')
            || text.contains('#')
            || text.contains('$')
        {
            return None;
        }
        if self.texts.contains(text) {
            return None;
        }
        // An anchor with a path component cannot live in the domain tier.
        if let Some(rewritten) = rewrite_anchored_path(text) {
            return self.add_with_expire(&rewritten, expire);
        }

        match classify(text) {
            Tier::Domain { host } => {
                self.domain_suffixes.insert(format!(".{host}"));
                self.domains.insert(host);
            }
            Tier::ExcludeDomain { host } => {
                self.exclude_domain_suffixes.insert(format!(".{host}"));
                self.exclude_domains.insert(host);
            }
            Tier::UrlPrefix { prefix } => {
                self.url_prefixes.push(prefix);
            }
            Tier::Keyed { key } => match Rule::parse_with_expire(text, expire) {
                Ok(rule) => self.keyed.entry(key).or_default().push(rule),
                Err(err) => {
                    debug!("skipping rule {text:?}: {err}");
                    return None;
                }
            },
            Tier::Linear { exclude } => match Rule::parse_with_expire(text, expire) {
                Ok(rule) => {
                    if exclude {
                        self.excludes.push(rule);
                    } else {
                        self.matches.push(rule);
                    }
                }
                Err(err) => {
                    debug!("skipping rule {text:?}: {err}");
                    return None;
                }
            },
        }

        self.texts.insert(text.to_string());
        Some(text.to_string())
    }

    /// Remove a rule by its registered text. Returns false if the text was
    /// never registered.
    pub fn remove(&mut self, text: &str) -> bool {
        let text = text.trim();
        if !self.texts.remove(text) {
            return false;
        }

        match classify(text) {
            Tier::Domain { host } => {
                self.domains.remove(&host);
                self.domain_suffixes.remove(&format!(".{host}"));
            }
            Tier::ExcludeDomain { host } => {
                self.exclude_domains.remove(&host);
                self.exclude_domain_suffixes.remove(&format!(".{host}"));
            }
            Tier::UrlPrefix { prefix } => {
                if let Some(pos) = self.url_prefixes.iter().position(|p| *p == prefix) {
                    self.url_prefixes.remove(pos);
                }
            }
            Tier::Keyed { key } => {
                if let Some(bucket) = self.keyed.get_mut(&key) {
                    bucket.retain(|r| r.text() != text);
                    if bucket.is_empty() {
                        self.keyed.remove(&key);
                    }
                }
            }
            Tier::Linear { exclude } => {
                let list = if exclude {
                    &mut self.excludes
                } else {
                    &mut self.matches
                };
                if let Some(pos) = list.iter().position(|r| r.text() == text) {
                    list.remove(pos);
                }
            }
        }
        true
    }

    /// True iff this exact rule text is currently registered.
    pub fn contains(&self, text: &str) -> bool {
        self.texts.contains(text.trim())
    }

    // -------------------------------------------------------------------------
    // Matching
    // -------------------------------------------------------------------------

    /// Convenience wrapper around [`RuleIndex::evaluate`] that reads the
    /// clock and drops the expiry report.
    pub fn match_url(&self, url: &str, host: Option<&str>, domain_only: bool) -> Verdict {
        self.evaluate(url, host, domain_only, Instant::now()).verdict
    }

    /// Run the tier cascade for one URL.
    ///
    /// Exclusions win outright; otherwise the first matching block tier
    /// decides. With `domain_only` the cascade stops after the domain tiers
    /// (the caller only has a hostname worth of information anyway).
    pub fn evaluate(
        &self,
        url: &str,
        host: Option<&str>,
        domain_only: bool,
        now: Instant,
    ) -> Evaluation {
        let host = host.or_else(|| crate::url::host_of(url)).unwrap_or("");
        let mut expired = Vec::new();

        if scan(&self.excludes, url, now, &mut expired) {
            return Evaluation::done(Verdict::Excluded, expired);
        }

        if !host.is_empty() {
            if self.exclude_domains.contains(host)
                || suffix_hit(&self.exclude_domain_suffixes, host)
            {
                return Evaluation::done(Verdict::Excluded, expired);
            }
            if self.domains.contains(host) || suffix_hit(&self.domain_suffixes, host) {
                return Evaluation::done(Verdict::Blocked, expired);
            }
        }
        if domain_only {
            return Evaluation::done(Verdict::Unmatched, expired);
        }

        if self.url_prefixes.iter().any(|p| url.starts_with(p.as_str())) {
            return Evaluation::done(Verdict::Blocked, expired);
        }

        if url.starts_with("http://") && self.keyed_hit(url, now, &mut expired) {
            return Evaluation::done(Verdict::Blocked, expired);
        }

        if scan(&self.matches, url, now, &mut expired) {
            return Evaluation::done(Verdict::Blocked, expired);
        }

        Evaluation::done(Verdict::Unmatched, expired)
    }

    /// Slide a KEYLEN window across the URL and test only the buckets whose
    /// key occurs in it.
    fn keyed_hit(&self, url: &str, now: Instant, expired: &mut Vec<String>) -> bool {
        if self.keyed.is_empty() || url.len() < KEYLEN || !url.is_ascii() {
            return false;
        }
        for i in 0..=url.len() - KEYLEN {
            if let Some(bucket) = self.keyed.get(&url[i..i + KEYLEN]) {
                if scan(bucket, url, now, expired) {
                    return true;
                }
            }
        }
        false
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            domains: self.domains.len(),
            exclude_domains: self.exclude_domains.len(),
            url_prefixes: self.url_prefixes.len(),
            keyed_buckets: self.keyed.len(),
            keyed_rules: self.keyed.values().map(Vec::len).sum(),
            linear_matches: self.matches.len(),
            linear_excludes: self.excludes.len(),
            total_rules: self.texts.len(),
        }
    }

    /// The `n` most occupied keyed buckets, heaviest first. A handful of
    /// hot keys is the usual sign KEYLEN is too small for the list.
    pub fn heaviest_buckets(&self, n: usize) -> Vec<(String, usize)> {
        let mut buckets: Vec<(String, usize)> = self
            .keyed
            .iter()
            .map(|(key, rules)| (key.clone(), rules.len()))
            .collect();
        buckets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        buckets.truncate(n);
        buckets
    }
}

fn rewrite_anchored_path(text: &str) -> Option<String> {
    let head_end = text.char_indices().last().map(|(i, _)| i)?;
    if text.contains("||") && text[..head_end].contains('/') {
        Some(text.replace("||", "|http://"))
    } else {
        None
    }
}

fn suffix_hit(set: &HashSet<String>, host: &str) -> bool {
    if set.is_empty() {
        return false;
    }
    host.char_indices()
        .filter(|&(_, c)| c == '.')
        .any(|(i, _)| set.contains(&host[i..]))
}

fn scan(rules: &[Rule], url: &str, now: Instant, expired: &mut Vec<String>) -> bool {
    for rule in rules {
        match rule.matches(url, now) {
            RuleMatch::Matched => return true,
            RuleMatch::Expired => expired.push(rule.text().to_string()),
            RuleMatch::Unmatched => {}
        }
    }
    false
}
