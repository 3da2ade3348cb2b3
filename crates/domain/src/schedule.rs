//! Schedule resolution — keywords and rule-queue building.
//!
//! Each instance's config carries a `schedule` map of `"HH:MM"` (or
//! keyword) → rule. Once per day the node materializes that map into a
//! time-ordered queue of upcoming rule changes for the remainder of the
//! day; entries already past wrap to tomorrow. Keywords (`"sunrise"` →
//! `"06:32"`) are resolved at build time, so a keyword change requires
//! rebuilding every queue.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::error::{HomeNodeError, ScheduleError};
use crate::rule::Rule;
use crate::time::{TimeOfDay, Timestamp};
use crate::validate::RuleValidator;

/// Named aliases for times of day (`"sunrise"` → `06:32`).
pub type ScheduleKeywords = HashMap<String, TimeOfDay>;

/// Parse the flat keyword file mapping (`keyword -> "HH:MM"`).
///
/// # Errors
///
/// Returns [`ScheduleError::InvalidTimestamp`] for malformed times.
pub fn parse_keywords(
    raw: &HashMap<String, String>,
) -> Result<ScheduleKeywords, ScheduleError> {
    raw.iter()
        .map(|(keyword, time)| Ok((keyword.clone(), time.parse()?)))
        .collect()
}

/// Resolve a schedule timespec: literal `HH:MM` first, keyword otherwise.
///
/// # Errors
///
/// Returns [`ScheduleError::UnknownKeyword`] when neither applies.
pub fn resolve(spec: &str, keywords: &ScheduleKeywords) -> Result<TimeOfDay, ScheduleError> {
    if let Ok(tod) = spec.parse::<TimeOfDay>() {
        return Ok(tod);
    }
    keywords
        .get(spec)
        .copied()
        .ok_or_else(|| ScheduleError::UnknownKeyword(spec.to_string()))
}

/// One upcoming rule change.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub at: Timestamp,
    pub rule: Rule,
}

/// A materialized schedule: the rule currently in force plus the ordered
/// queue for the next 24 hours.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltSchedule {
    /// Rule prescribed by the most recent boundary at or before build
    /// time; `None` when the schedule map is empty.
    pub current: Option<Rule>,
    /// Upcoming changes, strictly time-ordered, wrapping at midnight.
    pub queue: Vec<QueueEntry>,
}

/// Build an instance's rule queue from its schedule map.
///
/// Every rule is decoded and run through the instance's schedule
/// validator; keywords are resolved once, here.
///
/// # Errors
///
/// Propagates timestamp/keyword resolution errors and rule validation
/// failures (configs are validated before the core starts, so failures
/// here indicate a bad keyword file edit or API-supplied schedule).
pub fn build(
    schedule: &BTreeMap<String, Value>,
    keywords: &ScheduleKeywords,
    validator: &RuleValidator,
    now: Timestamp,
) -> Result<BuiltSchedule, HomeNodeError> {
    let mut resolved: Vec<(TimeOfDay, Rule)> = Vec::with_capacity(schedule.len());
    for (spec, raw_rule) in schedule {
        let tod = resolve(spec, keywords)?;
        let rule = validator.validate(Rule::from_value(raw_rule)?)?;
        resolved.push((tod, rule));
    }

    let mut queue: Vec<QueueEntry> = resolved
        .iter()
        .map(|(tod, rule)| QueueEntry {
            at: tod.next_occurrence(now),
            rule: rule.clone(),
        })
        .collect();
    queue.sort_by_key(|entry| entry.at);

    let current = resolved
        .iter()
        .max_by_key(|(tod, _)| tod.previous_occurrence(now))
        .map(|(_, rule)| rule.clone());

    Ok(BuiltSchedule { current, queue })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    use crate::kind::InstanceKind;
    use crate::validate::RuleLimits;

    fn noon() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn keywords() -> ScheduleKeywords {
        parse_keywords(&HashMap::from([
            ("sunrise".to_string(), "06:32".to_string()),
            ("sunset".to_string(), "21:08".to_string()),
        ]))
        .unwrap()
    }

    fn validator() -> RuleValidator {
        RuleValidator::new(InstanceKind::LedStrip).with_limits(RuleLimits {
            min: 0.0,
            max: 1023.0,
        })
    }

    #[test]
    fn should_resolve_literal_times_and_keywords() {
        let kw = keywords();
        assert_eq!(resolve("08:30", &kw).unwrap(), TimeOfDay::new(8, 30).unwrap());
        assert_eq!(resolve("sunrise", &kw).unwrap(), TimeOfDay::new(6, 32).unwrap());
        assert!(matches!(
            resolve("solstice", &kw),
            Err(ScheduleError::UnknownKeyword(_))
        ));
    }

    #[test]
    fn should_reject_malformed_keyword_file_entries() {
        let raw = HashMap::from([("sunrise".to_string(), "6am".to_string())]);
        assert!(parse_keywords(&raw).is_err());
    }

    #[test]
    fn should_order_queue_entries_by_next_occurrence() {
        let schedule = BTreeMap::from([
            ("22:00".to_string(), serde_json::json!(64)),
            ("14:00".to_string(), serde_json::json!(512)),
            ("08:00".to_string(), serde_json::json!(1023)),
        ]);
        let built = build(&schedule, &keywords(), &validator(), noon()).unwrap();

        // 08:00 already passed at noon so it wraps to tomorrow.
        let rules: Vec<_> = built.queue.iter().map(|e| e.rule.clone()).collect();
        assert_eq!(
            rules,
            vec![Rule::Numeric(512.0), Rule::Numeric(64.0), Rule::Numeric(1023.0)]
        );
        assert!(built.queue.windows(2).all(|w| w[0].at < w[1].at));
    }

    #[test]
    fn should_report_most_recent_boundary_as_current() {
        let schedule = BTreeMap::from([
            ("08:00".to_string(), serde_json::json!(1023)),
            ("14:00".to_string(), serde_json::json!(512)),
        ]);
        let built = build(&schedule, &keywords(), &validator(), noon()).unwrap();
        assert_eq!(built.current, Some(Rule::Numeric(1023.0)));
    }

    #[test]
    fn should_wrap_current_rule_across_midnight() {
        // At 02:00 the latest boundary is yesterday's 22:00 entry.
        let schedule = BTreeMap::from([
            ("08:00".to_string(), serde_json::json!(1023)),
            ("22:00".to_string(), serde_json::json!(64)),
        ]);
        let two_am = Utc.with_ymd_and_hms(2024, 6, 15, 2, 0, 0).unwrap();
        let built = build(&schedule, &keywords(), &validator(), two_am).unwrap();
        assert_eq!(built.current, Some(Rule::Numeric(64.0)));
    }

    #[test]
    fn should_build_empty_schedule() {
        let built = build(&BTreeMap::new(), &keywords(), &validator(), noon()).unwrap();
        assert_eq!(built.current, None);
        assert!(built.queue.is_empty());
    }

    #[test]
    fn should_resolve_keywords_in_schedule_maps() {
        let schedule = BTreeMap::from([("sunset".to_string(), serde_json::json!(256))]);
        let built = build(&schedule, &keywords(), &validator(), noon()).unwrap();
        assert_eq!(built.queue.len(), 1);
        assert_eq!(
            built.queue[0].at,
            Utc.with_ymd_and_hms(2024, 6, 15, 21, 8, 0).unwrap()
        );
    }

    #[test]
    fn should_propagate_validation_failures() {
        let schedule = BTreeMap::from([("08:00".to_string(), serde_json::json!(4096))]);
        assert!(build(&schedule, &keywords(), &validator(), noon()).is_err());
    }

    #[test]
    fn should_accept_universal_rules_in_schedules() {
        let schedule = BTreeMap::from([("08:00".to_string(), serde_json::json!("disabled"))]);
        let built = build(&schedule, &keywords(), &validator(), noon()).unwrap();
        assert_eq!(built.queue[0].rule, Rule::Disabled);
    }
}
