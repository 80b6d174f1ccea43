use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use senmux_utils::InterfaceId;

use crate::senblk::Senblk;

/// Sentences are matched by their five leading talker/sentence-type
/// characters (e.g. `GPGGA`); `0` in a pattern byte is a wildcard.
pub const TAG_LEN: usize = 5;
pub type Tag = [u8; TAG_LEN];

#[must_use]
pub fn tag_from_str(s: &str) -> Tag {
    let mut tag = [0u8; TAG_LEN];
    for (slot, b) in tag.iter_mut().zip(s.bytes()) {
        *slot = if b == b'*' { 0 } else { b };
    }
    tag
}

fn tag_matches(pattern: &Tag, body: &[u8]) -> bool {
    for (i, p) in pattern.iter().enumerate() {
        if *p != 0 && (i >= body.len() || body[i] != *p) {
            return false;
        }
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Accept,
    Deny,
    Limit,
}

struct FilterRule {
    tag: Tag,
    source: Option<InterfaceId>,
    action: RuleAction,
    /// Minimum spacing between accepted sentences under [`RuleAction::Limit`].
    period: Duration,
    last_pass: Mutex<Option<Instant>>,
}

struct FailoverSource {
    source: InterfaceId,
    /// How long this source may stay silent before a lower-priority source
    /// in the list is allowed through. Sources are kept ordered ascending by
    /// this value, so the first entries are the highest priority.
    failtime: Duration,
    last_seen: Mutex<Option<Instant>>,
}

struct FailoverRule {
    tag: Tag,
    sources: Vec<FailoverSource>,
}

enum FilterKind {
    Rules(Vec<FilterRule>),
    Failover(Vec<FailoverRule>),
}

struct FilterInner {
    kind: FilterKind,
}

/// A shared, read-mostly set of filtering rules.
///
/// The original reference-counted filters behind a mutex that guarded
/// teardown; `Arc` gives the same shared-ownership lifetime without needing
/// a hand-rolled refcount, since interfaces only ever clone a filter, never
/// mutate its rule set after construction.
#[derive(Clone)]
pub struct Filter(Arc<FilterInner>);

pub struct FilterRuleSpec {
    pub tag: Tag,
    pub source: Option<InterfaceId>,
    pub action: RuleAction,
    pub period: Duration,
}

pub struct FailoverSourceSpec {
    pub source: InterfaceId,
    pub failtime: Duration,
}

pub struct FailoverRuleSpec {
    pub tag: Tag,
    /// Sources in priority order, highest priority (shortest failtime)
    /// first.
    pub sources: Vec<FailoverSourceSpec>,
}

impl Filter {
    #[must_use]
    pub fn rules(specs: Vec<FilterRuleSpec>) -> Self {
        let rules = specs
            .into_iter()
            .map(|s| FilterRule {
                tag: s.tag,
                source: s.source,
                action: s.action,
                period: s.period,
                last_pass: Mutex::new(None),
            })
            .collect();
        Self(Arc::new(FilterInner {
            kind: FilterKind::Rules(rules),
        }))
    }

    #[must_use]
    pub fn failover(specs: Vec<FailoverRuleSpec>) -> Self {
        let rules = specs
            .into_iter()
            .map(|r| {
                let mut sources: Vec<_> = r
                    .sources
                    .into_iter()
                    .map(|s| FailoverSource {
                        source: s.source,
                        failtime: s.failtime,
                        last_seen: Mutex::new(None),
                    })
                    .collect();
                sources.sort_by_key(|s| s.failtime);
                FailoverRule {
                    tag: r.tag,
                    sources,
                }
            })
            .collect();
        Self(Arc::new(FilterInner {
            kind: FilterKind::Failover(rules),
        }))
    }

    /// Evaluates this filter against a sentence. For a [`Filter::rules`]
    /// filter, returns whether the sentence should be accepted. For a
    /// [`Filter::failover`] filter, returns whether the sentence's source is
    /// currently the active one for its tag.
    #[must_use]
    pub fn passes(&self, senblk: &Senblk) -> bool {
        match &self.0.kind {
            FilterKind::Rules(rules) => self.passes_rules(rules, senblk),
            FilterKind::Failover(rules) => self.passes_failover(rules, senblk),
        }
    }

    fn passes_rules(&self, rules: &[FilterRule], senblk: &Senblk) -> bool {
        let body = senblk.as_bytes();
        if body.first() == Some(&b'\r') {
            return false;
        }
        let Some(rule) = rules.iter().find(|r| {
            tag_matches(&r.tag, &body[1..])
                && r.source.is_none_or(|src| src.major_bits() == senblk.src.major_bits())
        }) else {
            // No matching rule: default accept, mirroring the original's
            // "no match falls through" filter semantics.
            return true;
        };
        match rule.action {
            RuleAction::Accept => true,
            RuleAction::Deny => false,
            RuleAction::Limit => {
                let now = Instant::now();
                let mut last = rule.last_pass.lock().unwrap();
                match *last {
                    Some(prev) if now.duration_since(prev) < rule.period => false,
                    _ => {
                        *last = Some(now);
                        true
                    }
                }
            }
        }
    }

    fn passes_failover(&self, rules: &[FailoverRule], senblk: &Senblk) -> bool {
        let body = senblk.as_bytes();
        let Some(rule) = rules.iter().find(|r| tag_matches(&r.tag, &body[1..])) else {
            return true;
        };
        let now = Instant::now();
        let mut higher_priority_last: Option<Instant> = None;
        for source in &rule.sources {
            if source.source.major_bits() == senblk.src.major_bits() {
                let mut last_seen = source.last_seen.lock().unwrap();
                *last_seen = Some(now);
                return match higher_priority_last {
                    Some(last) => now.duration_since(last) >= source.failtime,
                    None => true,
                };
            }
            let last_seen = *source.last_seen.lock().unwrap();
            if let Some(last) = last_seen {
                higher_priority_last = match higher_priority_last {
                    Some(existing) if existing > last => Some(existing),
                    _ => Some(last),
                };
            }
        }
        // Source isn't in this failover's source list at all: only the
        // sources named in the rule are ever admitted.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn senblk(body: &str, src: u32) -> Senblk {
        Senblk::from_bytes(body.as_bytes(), InterfaceId(src))
    }

    #[test]
    fn accept_rule_matches_tag() {
        let filter = Filter::rules(vec![FilterRuleSpec {
            tag: tag_from_str("GPGGA"),
            source: None,
            action: RuleAction::Accept,
            period: Duration::ZERO,
        }]);
        assert!(filter.passes(&senblk("$GPGGA,1*2F\r\n", 1)));
    }

    #[test]
    fn deny_rule_blocks_tag() {
        let filter = Filter::rules(vec![FilterRuleSpec {
            tag: tag_from_str("GPGGA"),
            source: None,
            action: RuleAction::Deny,
            period: Duration::ZERO,
        }]);
        assert!(!filter.passes(&senblk("$GPGGA,1*2F\r\n", 1)));
        assert!(filter.passes(&senblk("$GPGLL,1*2F\r\n", 1)));
    }

    #[test]
    fn unmatched_tag_defaults_to_accept() {
        let filter = Filter::rules(vec![FilterRuleSpec {
            tag: tag_from_str("GPGGA"),
            source: None,
            action: RuleAction::Deny,
            period: Duration::ZERO,
        }]);
        assert!(filter.passes(&senblk("$GPZDA,1*2F\r\n", 1)));
    }

    #[test]
    fn leading_cr_always_dropped() {
        let filter = Filter::rules(vec![]);
        let senblk = Senblk::from_bytes(b"\r\n", InterfaceId(1));
        assert!(!filter.passes(&senblk));
    }

    #[test]
    fn limit_throttles_within_period() {
        let filter = Filter::rules(vec![FilterRuleSpec {
            tag: tag_from_str("GPGGA"),
            source: None,
            action: RuleAction::Limit,
            period: Duration::from_secs(3600),
        }]);
        assert!(filter.passes(&senblk("$GPGGA,1*2F\r\n", 1)));
        assert!(!filter.passes(&senblk("$GPGGA,1*2F\r\n", 1)));
    }

    #[test]
    fn failover_prefers_highest_priority_source() {
        let filter = Filter::failover(vec![FailoverRuleSpec {
            tag: tag_from_str("GPGGA"),
            sources: vec![
                FailoverSourceSpec {
                    source: InterfaceId::major(1),
                    failtime: Duration::from_secs(5),
                },
                FailoverSourceSpec {
                    source: InterfaceId::major(2),
                    failtime: Duration::from_secs(10),
                },
            ],
        }]);
        let primary = senblk("$GPGGA,1*2F\r\n", InterfaceId::major(1).raw());
        let backup = senblk("$GPGGA,1*2F\r\n", InterfaceId::major(2).raw());
        assert!(filter.passes(&primary));
        // Backup arrives right after the primary spoke: still within the
        // primary's failtime window, so backup is blocked.
        assert!(!filter.passes(&backup));
    }

    #[test]
    fn failover_denies_unlisted_source() {
        let filter = Filter::failover(vec![FailoverRuleSpec {
            tag: tag_from_str("GPGGA"),
            sources: vec![FailoverSourceSpec {
                source: InterfaceId::major(1),
                failtime: Duration::from_secs(5),
            }],
        }]);
        let stranger = senblk("$GPGGA,1*2F\r\n", InterfaceId::major(9).raw());
        assert!(!filter.passes(&stranger));
    }
}
