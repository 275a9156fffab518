//! Topic name/filter validation and subscription matching (spec §4.8)
//!
//! A connection's subscription list is small (one session's worth), so
//! matching is a linear scan rather than the trie a multi-tenant broker
//! would need — the teacher's own shape for a per-connection adapter.

use crate::protocol::QoS;
use crate::session::SessionSubscription;

/// Validate a topic name (used in PUBLISH). Topic names must not contain
/// wildcards and must be non-empty.
pub fn validate_topic_name(topic: &str) -> Result<(), &'static str> {
    if topic.is_empty() {
        return Err("topic name cannot be empty");
    }
    if topic.len() > 65535 {
        return Err("topic name exceeds maximum length");
    }
    if topic.contains('\0') {
        return Err("topic name cannot contain null character");
    }
    if topic.contains('+') || topic.contains('#') {
        return Err("topic name cannot contain wildcards");
    }
    Ok(())
}

/// Validate a topic filter (used in SUBSCRIBE/UNSUBSCRIBE).
pub fn validate_topic_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }
    if filter.len() > 65535 {
        return Err("topic filter exceeds maximum length");
    }
    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') {
            if *level != "#" {
                return Err("multi-level wildcard must occupy entire level");
            }
            if i != levels.len() - 1 {
                return Err("multi-level wildcard must be last level");
            }
        }
        if level.contains('+') && *level != "+" {
            return Err("single-level wildcard must occupy entire level");
        }
    }
    Ok(())
}

/// Whether `topic` matches `filter` under standard MQTT wildcard rules.
/// `+` matches exactly one level, `#` matches zero or more trailing levels.
/// Topics starting with `$` never match a filter starting with `+` or `#`.
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let topic_levels: Vec<&str> = topic.split('/').collect();
    let filter_levels: Vec<&str> = filter.split('/').collect();

    let mut ti = 0;
    let mut fi = 0;
    while fi < filter_levels.len() {
        let filter_level = filter_levels[fi];
        if filter_level == "#" {
            return true;
        }
        if ti >= topic_levels.len() {
            return false;
        }
        if filter_level == "+" || filter_level == topic_levels[ti] {
            ti += 1;
            fi += 1;
        } else {
            return false;
        }
    }
    ti == topic_levels.len()
}

/// Select the highest granted QoS among the connection's subscriptions that
/// match `topic`, subject to the time-gating invariant (spec P7): a
/// subscription only matches messages created strictly after it was.
///
/// Short-circuits once `server_max` is reached, per spec §4.8.
pub fn best_match<'a>(
    subscriptions: impl Iterator<Item = &'a SessionSubscription>,
    topic: &str,
    message_created_at: std::time::Instant,
    server_max: QoS,
) -> Option<QoS> {
    let mut best: Option<QoS> = None;
    for sub in subscriptions {
        if sub.created_at >= message_created_at {
            continue;
        }
        if !topic_matches_filter(topic, &sub.filter) {
            continue;
        }
        let candidate = sub.qos.min(server_max);
        best = Some(match best {
            Some(current) if current >= candidate => current,
            _ => candidate,
        });
        if best == Some(server_max) {
            break;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn validates_topic_name() {
        assert!(validate_topic_name("a/b").is_ok());
        assert!(validate_topic_name("").is_err());
        assert!(validate_topic_name("a/+/b").is_err());
        assert!(validate_topic_name("a/#").is_err());
    }

    #[test]
    fn validates_topic_filter() {
        assert!(validate_topic_filter("a/+/c").is_ok());
        assert!(validate_topic_filter("a/#").is_ok());
        assert!(validate_topic_filter("").is_err());
        assert!(validate_topic_filter("a/#/b").is_err());
        assert!(validate_topic_filter("a+").is_err());
    }

    #[test]
    fn matches_wildcards() {
        assert!(topic_matches_filter("a/b", "a/+"));
        assert!(topic_matches_filter("a/b/c", "a/#"));
        assert!(!topic_matches_filter("$SYS/x", "+/x"));
        assert!(topic_matches_filter("a/b", "a/b"));
        assert!(!topic_matches_filter("a/b/c", "a/b"));
    }

    #[test]
    fn time_gating_excludes_late_subscription() {
        let t0 = Instant::now();
        let msg_time = t0 + Duration::from_millis(1);
        let sub = SessionSubscription {
            filter: "a/b".into(),
            qos: QoS::AtLeastOnce,
            created_at: msg_time + Duration::from_millis(1),
        };
        let result = best_match(std::iter::once(&sub), "a/b", msg_time, QoS::AtLeastOnce);
        assert_eq!(result, None);
    }

    #[test]
    fn picks_highest_capped_qos() {
        let t0 = Instant::now();
        let msg_time = t0 + Duration::from_secs(10);
        let subs = vec![
            SessionSubscription { filter: "a/+".into(), qos: QoS::AtMostOnce, created_at: t0 },
            SessionSubscription { filter: "a/b".into(), qos: QoS::ExactlyOnce, created_at: t0 },
        ];
        let result = best_match(subs.iter(), "a/b", msg_time, QoS::AtLeastOnce);
        assert_eq!(result, Some(QoS::AtLeastOnce));
    }
}
