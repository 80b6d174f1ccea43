use std::time::Duration;

use senmux_core::{tag_from_str, FailoverRuleSpec, FailoverSourceSpec, FilterRuleSpec, RuleAction};
use senmux_core::{Registry, Tag};

#[derive(Debug, thiserror::Error)]
pub enum RuleParseError {
    #[error("empty rule token")]
    EmptyToken,
    #[error("rule token {0:?} has no sign prefix (expected '+', '-' or '=')")]
    MissingSign(String),
    #[error("invalid tag {0:?}: must be at most 5 characters")]
    TagTooLong(String),
    #[error("invalid rate for LIMIT rule {0:?}: {1}")]
    BadRate(String, humantime::DurationError),
    #[error("failover spec {0:?} is malformed: expected <tag>:<failtime>:<source>[:...]")]
    BadFailoverSpec(String),
    #[error("invalid failtime {0:?}: {1}")]
    BadFailtime(String, humantime::DurationError),
    #[error("unknown interface name {0:?} in failover spec")]
    UnknownSource(String),
}

fn parse_tag(raw: &str) -> Result<Tag, RuleParseError> {
    if raw.len() > 5 {
        return Err(RuleParseError::TagTooLong(raw.to_string()));
    }
    let padded = format!("{raw:*<5}");
    Ok(tag_from_str(&padded))
}

/// Parses the rule-string grammar for input/output filters:
/// `<sign><tag>[:<sign><tag>...]` where `<sign>` is `+` (accept), `-`
/// (deny), or `=<rate>` (limit, e.g. `=GPGGA/1s` throttles `GPGGA` to at
/// most once per second). `*` within a tag is a wildcard matching any
/// character at that position. The literal spec `all` accepts everything
/// unconditionally (an empty rule set, since unmatched sentences default to
/// accept).
pub fn parse_filter_spec(spec: &str) -> Result<Vec<FilterRuleSpec>, RuleParseError> {
    if spec.eq_ignore_ascii_case("all") {
        return Ok(Vec::new());
    }
    spec.split(':')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(parse_filter_token)
        .collect()
}

fn parse_filter_token(token: &str) -> Result<FilterRuleSpec, RuleParseError> {
    let mut chars = token.chars();
    let sign = chars.next().ok_or(RuleParseError::EmptyToken)?;
    let rest = chars.as_str();

    match sign {
        '+' => Ok(FilterRuleSpec {
            tag: parse_tag(rest)?,
            source: None,
            action: RuleAction::Accept,
            period: Duration::ZERO,
        }),
        '-' => Ok(FilterRuleSpec {
            tag: parse_tag(rest)?,
            source: None,
            action: RuleAction::Deny,
            period: Duration::ZERO,
        }),
        '=' => {
            let (tag_part, rate_part) = rest.split_once('/').ok_or_else(|| RuleParseError::MissingSign(token.to_string()))?;
            let period = humantime::parse_duration(rate_part).map_err(|e| RuleParseError::BadRate(token.to_string(), e))?;
            Ok(FilterRuleSpec {
                tag: parse_tag(tag_part)?,
                source: None,
                action: RuleAction::Limit,
                period,
            })
        }
        _ => Err(RuleParseError::MissingSign(token.to_string())),
    }
}

/// Parses the failover-spec grammar: `<tag>:<failtime>:<source>[:<failtime>:<source>...]`.
/// Sources are listed in priority order (first = primary); `<failtime>` is
/// how long that source may go silent before the next one in the list is
/// allowed through, given as a [`humantime`] duration (`2s`, `500ms`, ...).
pub fn parse_failover_spec(spec: &str, registry: &Registry) -> Result<FailoverRuleSpec, RuleParseError> {
    let parts: Vec<&str> = spec.split(':').map(str::trim).collect();
    if parts.len() < 3 || (parts.len() - 1) % 2 != 0 {
        return Err(RuleParseError::BadFailoverSpec(spec.to_string()));
    }
    let tag = parse_tag(parts[0])?;
    let mut sources = Vec::with_capacity((parts.len() - 1) / 2);
    for pair in parts[1..].chunks(2) {
        let [failtime_str, source_name] = pair else {
            return Err(RuleParseError::BadFailoverSpec(spec.to_string()));
        };
        let failtime = humantime::parse_duration(failtime_str).map_err(|e| RuleParseError::BadFailtime((*failtime_str).to_string(), e))?;
        let source = registry.id_of(source_name).ok_or_else(|| RuleParseError::UnknownSource((*source_name).to_string()))?;
        sources.push(FailoverSourceSpec { source, failtime });
    }
    Ok(FailoverRuleSpec { tag, sources })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_means_no_rules() {
        assert!(parse_filter_spec("all").unwrap().is_empty());
    }

    #[test]
    fn accept_and_deny_tokens() {
        let rules = parse_filter_spec("+GPGGA:-GPGLL").unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].action, RuleAction::Accept);
        assert_eq!(rules[1].action, RuleAction::Deny);
    }

    #[test]
    fn limit_token_parses_rate() {
        let rules = parse_filter_spec("=GPGGA/500ms").unwrap();
        assert_eq!(rules[0].action, RuleAction::Limit);
        assert_eq!(rules[0].period, Duration::from_millis(500));
    }

    #[test]
    fn rejects_missing_sign() {
        assert!(parse_filter_spec("GPGGA").is_err());
    }

    #[test]
    fn failover_spec_resolves_sources_in_order() {
        let registry = Registry::build(&["gps1".into(), "gps2".into()]).unwrap();
        let rule = parse_failover_spec("GPGGA:2s:gps1:10s:gps2", &registry).unwrap();
        assert_eq!(rule.sources.len(), 2);
        assert_eq!(rule.sources[0].source, registry.id_of("gps1").unwrap());
    }

    #[test]
    fn failover_spec_rejects_unknown_source() {
        let registry = Registry::build(&["gps1".into()]).unwrap();
        assert!(parse_failover_spec("GPGGA:2s:nope", &registry).is_err());
    }
}
