//! The rule compiler
//!
//! Translates one raw filter-list line into a [`Rule`]: a classified,
//! compiled matcher. Classification order matters and mirrors the syntax
//! precedence of AutoProxy lists: exception marker, domain anchor, regex
//! literal, https anchor, generic wildcard.

use std::time::Instant;

use regex::Regex;

use crate::types::RuleKind;

/// Error type for rule compilation.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("rule shorter than 3 characters")]
    TooShort,
    #[error("comment or section marker")]
    Comment,
    #[error("unsupported rule syntax ({0:?} delimiter)")]
    Unsupported(char),
    #[error("embedded whitespace")]
    Whitespace,
    #[error("invalid regex body: {0}")]
    BadRegex(#[from] regex::Error),
}

/// Outcome of evaluating one rule against a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMatch {
    Matched,
    Unmatched,
    /// The rule's deadline has passed. Counts as a non-match; the owner
    /// should evict the rule.
    Expired,
}

// =============================================================================
// Rule
// =============================================================================

/// A single compiled filter entry.
///
/// `text` is the identity key: two rules with the same trimmed text are the
/// same rule as far as an index is concerned.
#[derive(Debug, Clone)]
pub struct Rule {
    text: String,
    kind: RuleKind,
    pattern: Option<Regex>,
    exception: bool,
    expire: Option<Instant>,
}

impl Rule {
    /// Compile a rule with no expiry.
    pub fn parse(text: &str) -> Result<Self, RuleError> {
        Self::parse_with_expire(text, None)
    }

    /// Compile a rule that stops matching once `expire` has passed.
    pub fn parse_with_expire(text: &str, expire: Option<Instant>) -> Result<Self, RuleError> {
        let text = text.trim();
        validate(text)?;

        let exception = text.starts_with("@@");
        let body = if exception { &text[2..] } else { text };
        let (kind, pattern) = compile_body(body, exception)?;

        Ok(Self {
            text: text.to_string(),
            kind,
            pattern,
            exception,
            expire,
        })
    }

    /// The original trimmed rule text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// True iff a match means "do not block".
    pub fn is_exception(&self) -> bool {
        self.exception
    }

    pub fn expire(&self) -> Option<Instant> {
        self.expire
    }

    /// The compiled pattern, when the kind needs one. Wildcard-free domain
    /// anchors are answered by set membership and carry no regex.
    pub fn pattern(&self) -> Option<&Regex> {
        self.pattern.as_ref()
    }

    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expire.is_some_and(|deadline| deadline <= now)
    }

    /// Evaluate this rule against a full URL.
    ///
    /// `now` is passed in so a scan over many rules reads the clock once.
    #[inline]
    pub fn matches(&self, url: &str, now: Instant) -> RuleMatch {
        if self.is_expired(now) {
            return RuleMatch::Expired;
        }
        match &self.pattern {
            Some(re) if re.is_match(url) => RuleMatch::Matched,
            _ => RuleMatch::Unmatched,
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate(text: &str) -> Result<(), RuleError> {
    if text.len() < 3 {
        return Err(RuleError::TooShort);
    }
    if text.starts_with('!') || text.starts_with('[') {
        return Err(RuleError::Comment);
    }
    if text.contains('#') {
        return Err(RuleError::Unsupported('#'));
    }
    if text.contains('$') {
        return Err(RuleError::Unsupported('$'));
    }
    if text.chars().any(char::is_whitespace) {
        return Err(RuleError::Whitespace);
    }
    Ok(())
}

// =============================================================================
// Pattern Synthesis
// =============================================================================

fn compile_body(body: &str, exception: bool) -> Result<(RuleKind, Option<Regex>), RuleError> {
    if body.starts_with("||") {
        let kind = if exception {
            RuleKind::DomainAnchorException
        } else {
            RuleKind::DomainAnchor
        };
        let pattern = if body.contains('*') {
            Some(Regex::new(&domain_anchor_regex(body))?)
        } else {
            None
        };
        return Ok((kind, pattern));
    }

    if body.len() >= 2 && body.starts_with('/') && body.ends_with('/') {
        let re = Regex::new(&body[1..body.len() - 1])?;
        return Ok((RuleKind::RawRegex, Some(re)));
    }

    if body.starts_with("|https://") {
        let re = Regex::new(&https_prefix_regex(body))?;
        return Ok((RuleKind::HttpsPrefix, Some(re)));
    }

    let kind = if body.starts_with("|http://") && !body.contains('*') {
        RuleKind::UrlPrefix
    } else {
        RuleKind::GenericWildcard
    };
    let re = Regex::new(&wildcard_regex(body))?;
    Ok((kind, Some(re)))
}

/// `||host` rules: any http(s) scheme, the host itself or any subdomain,
/// followed by a port, a path or the end of the URL.
fn domain_anchor_regex(body: &str) -> String {
    // separator class before wildcard: `[^/]*` must survive the `^` pass
    let escaped = body
        .replace('.', r"\.")
        .replace('?', r"\?")
        .replace('/', "")
        .replace('^', "[/:]")
        .replace('*', "[^/]*")
        .replace("||", r"^(?:https?://)?(?:[^/]+\.)?");
    format!("{escaped}(?:[:/]|$)")
}

/// `|https://host[/path]` rules: the host portion only, anchored to the
/// https scheme, followed by a port or path separator.
fn https_prefix_regex(body: &str) -> String {
    let rest = &body["|https://".len()..];
    let host = rest.split('/').next().unwrap_or(rest);
    let escaped = host.replace('.', r"\.").replace('*', "[^/]*");
    format!("^(?:https://)?{escaped}(?:[:/])")
}

/// Everything else: `*` spans anything, `^` is a URL component boundary,
/// `|` at either end anchors the pattern. Unanchored keyword rules match
/// anywhere in a plain-http URL.
fn wildcard_regex(body: &str) -> String {
    let mut escaped = body
        .replace('.', r"\.")
        .replace('?', r"\?")
        .replace('*', ".*")
        .replace('^', "[/:]");
    if let Some(rest) = escaped.strip_prefix('|') {
        escaped = format!("^{rest}");
    }
    if let Some(rest) = escaped.strip_suffix('|') {
        escaped = format!("{rest}$");
    }
    if !body.starts_with('|') && !body.starts_with("http://") {
        escaped = format!("^http://.*{escaped}");
    }
    escaped
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn classifies_domain_anchor_without_pattern() {
        let rule = Rule::parse("||twitter.com").unwrap();
        assert_eq!(rule.kind(), RuleKind::DomainAnchor);
        assert!(!rule.is_exception());
        assert!(rule.pattern().is_none());
    }

    #[test]
    fn classifies_domain_anchor_exception() {
        let rule = Rule::parse("@@||qq.com").unwrap();
        assert_eq!(rule.kind(), RuleKind::DomainAnchorException);
        assert!(rule.is_exception());
        assert!(rule.pattern().is_none());
    }

    #[test]
    fn wildcard_domain_anchor_compiles_pattern() {
        let rule = Rule::parse("||doc*.google.com").unwrap();
        assert_eq!(rule.kind(), RuleKind::DomainAnchor);
        let now = Instant::now();
        assert_eq!(rule.matches("http://docs.google.com/x", now), RuleMatch::Matched);
        assert_eq!(rule.matches("https://docs.google.com:443", now), RuleMatch::Matched);
        assert_eq!(rule.matches("http://docs.goggle.com/x", now), RuleMatch::Unmatched);
    }

    #[test]
    fn raw_regex_body_is_compiled_verbatim() {
        let rule = Rule::parse(r"/^https?://\d+\.\d+/").unwrap();
        assert_eq!(rule.kind(), RuleKind::RawRegex);
        let now = Instant::now();
        assert_eq!(rule.matches("http://10.11/x", now), RuleMatch::Matched);
        assert_eq!(rule.matches("http://ten.eleven/x", now), RuleMatch::Unmatched);
    }

    #[test]
    fn https_prefix_requires_host_boundary() {
        let rule = Rule::parse("|https://doc*.google.com").unwrap();
        assert_eq!(rule.kind(), RuleKind::HttpsPrefix);
        let now = Instant::now();
        assert_eq!(rule.matches("https://docs.google.com/x", now), RuleMatch::Matched);
        assert_eq!(rule.matches("https://docs.google.com:443", now), RuleMatch::Matched);
        // no separator after the host portion
        assert_eq!(rule.matches("https://docs.google.com", now), RuleMatch::Unmatched);
    }

    #[test]
    fn url_prefix_rule_anchors_to_start() {
        let rule = Rule::parse("|http://zh.wikipedia.com").unwrap();
        assert_eq!(rule.kind(), RuleKind::UrlPrefix);
        let now = Instant::now();
        assert_eq!(rule.matches("http://zh.wikipedia.com/abc", now), RuleMatch::Matched);
        assert_eq!(rule.matches("http://en.wikipedia.com", now), RuleMatch::Unmatched);
    }

    #[test]
    fn keyword_rule_matches_anywhere_in_http_urls() {
        let rule = Rule::parse("iredmail.org").unwrap();
        assert_eq!(rule.kind(), RuleKind::GenericWildcard);
        let now = Instant::now();
        assert_eq!(
            rule.matches("http://www.test.com/iredmail.org", now),
            RuleMatch::Matched
        );
        assert_eq!(
            rule.matches("https://www.test.com/iredmail.org", now),
            RuleMatch::Unmatched
        );
    }

    #[test]
    fn trailing_pipe_anchors_to_end() {
        let rule = Rule::parse("http://x.com/a.swf|").unwrap();
        let now = Instant::now();
        assert_eq!(rule.matches("http://x.com/a.swf", now), RuleMatch::Matched);
        assert_eq!(rule.matches("http://x.com/a.swf?q=1", now), RuleMatch::Unmatched);
    }

    #[test]
    fn caret_matches_component_boundary() {
        let rule = Rule::parse("r.com^").unwrap();
        let now = Instant::now();
        assert_eq!(rule.matches("http://r.com/", now), RuleMatch::Matched);
        assert_eq!(rule.matches("http://r.com:8080", now), RuleMatch::Matched);
        assert_eq!(rule.matches("http://r.company", now), RuleMatch::Unmatched);
    }

    #[test]
    fn exception_url_prefix_still_compiles() {
        let rule = Rule::parse("@@|http://www.163.com").unwrap();
        assert_eq!(rule.kind(), RuleKind::UrlPrefix);
        assert!(rule.is_exception());
        let now = Instant::now();
        assert_eq!(rule.matches("http://www.163.com/index", now), RuleMatch::Matched);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(Rule::parse("ab"), Err(RuleError::TooShort)));
        assert!(matches!(Rule::parse("!comment"), Err(RuleError::Comment)));
        assert!(matches!(Rule::parse("[AutoProxy 0.2.9]"), Err(RuleError::Comment)));
        assert!(matches!(Rule::parse("a#b"), Err(RuleError::Unsupported('#'))));
        assert!(matches!(Rule::parse("ads$script"), Err(RuleError::Unsupported('$'))));
        assert!(matches!(Rule::parse("a b.com"), Err(RuleError::Whitespace)));
        assert!(matches!(Rule::parse("/[unterminated/"), Err(RuleError::BadRegex(_))));
    }

    #[test]
    fn expired_rule_reports_expired_instead_of_matching() {
        let deadline = Instant::now();
        let rule = Rule::parse_with_expire("iredmail.org", Some(deadline)).unwrap();
        assert_eq!(rule.expire(), Some(deadline));
        let later = deadline + Duration::from_secs(1);
        assert_eq!(rule.matches("http://www.test.com/iredmail.org", later), RuleMatch::Expired);
        assert!(rule.is_expired(later));
    }
}
