//! Group activation rules
//!
//! Narrows the configuration to the groups allowed for the frontmost
//! application and the current weekday. Pure; safe to call on every
//! application switch.

use std::collections::BTreeSet;

use chrono::Weekday;
use serde::{Deserialize, Serialize};

use super::WorkflowGroup;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Empty means any application
    #[serde(default)]
    pub allowed_bundle_identifiers: BTreeSet<String>,
    #[serde(default)]
    pub disallowed_bundle_identifiers: BTreeSet<String>,
    /// Empty means every day
    #[serde(default)]
    pub allowed_weekdays: Vec<Weekday>,
}

impl Rule {
    pub fn permits(&self, frontmost: Option<&str>, weekday: Weekday) -> bool {
        let allowed = self.allowed_bundle_identifiers.is_empty()
            || frontmost.is_some_and(|id| self.allowed_bundle_identifiers.contains(id));
        let disallowed =
            frontmost.is_some_and(|id| self.disallowed_bundle_identifiers.contains(id));
        let today = self.allowed_weekdays.is_empty() || self.allowed_weekdays.contains(&weekday);

        allowed && !disallowed && today
    }
}

/// Groups whose rule (if any) permits activation right now
pub fn eligible_groups<'a>(
    groups: &'a [WorkflowGroup],
    frontmost: Option<&str>,
    weekday: Weekday,
) -> Vec<&'a WorkflowGroup> {
    groups
        .iter()
        .filter(|group| {
            group
                .rule
                .as_ref()
                .map_or(true, |rule| rule.permits(frontmost, weekday))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_for(apps: &[&str]) -> Rule {
        Rule {
            allowed_bundle_identifiers: apps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn group_ids<'a>(groups: &[&'a WorkflowGroup]) -> Vec<&'a str> {
        groups.iter().map(|g| g.id.as_str()).collect()
    }

    #[test]
    fn test_group_without_rule_always_eligible() {
        let groups = vec![WorkflowGroup::new("any", vec![])];
        assert_eq!(eligible_groups(&groups, None, Weekday::Mon).len(), 1);
        assert_eq!(
            eligible_groups(&groups, Some("com.apple.Safari"), Weekday::Sun).len(),
            1
        );
    }

    #[test]
    fn test_allowed_application() {
        let groups = vec![
            WorkflowGroup::new("safari", vec![]).with_rule(rule_for(&["com.apple.Safari"])),
            WorkflowGroup::new("global", vec![]),
        ];

        let eligible = eligible_groups(&groups, Some("com.apple.Safari"), Weekday::Mon);
        assert_eq!(group_ids(&eligible), vec!["safari", "global"]);

        let eligible = eligible_groups(&groups, Some("com.apple.mail"), Weekday::Mon);
        assert_eq!(group_ids(&eligible), vec!["global"]);

        let eligible = eligible_groups(&groups, None, Weekday::Mon);
        assert_eq!(group_ids(&eligible), vec!["global"]);
    }

    #[test]
    fn test_disallowed_application_wins() {
        let rule = Rule {
            allowed_bundle_identifiers: ["com.apple.Terminal".to_string()].into(),
            disallowed_bundle_identifiers: ["com.apple.Terminal".to_string()].into(),
            ..Default::default()
        };
        assert!(!rule.permits(Some("com.apple.Terminal"), Weekday::Tue));

        let rule = Rule {
            disallowed_bundle_identifiers: ["com.apple.Terminal".to_string()].into(),
            ..Default::default()
        };
        assert!(!rule.permits(Some("com.apple.Terminal"), Weekday::Tue));
        assert!(rule.permits(Some("com.apple.Safari"), Weekday::Tue));
        assert!(rule.permits(None, Weekday::Tue));
    }

    #[test]
    fn test_weekday_rule() {
        let rule = Rule {
            allowed_weekdays: vec![Weekday::Sat, Weekday::Sun],
            ..Default::default()
        };
        assert!(rule.permits(None, Weekday::Sat));
        assert!(!rule.permits(None, Weekday::Wed));
    }

    #[test]
    fn test_rule_deserialization() {
        let json = r#"{
            "allowed_bundle_identifiers": ["com.apple.Safari"],
            "allowed_weekdays": ["Mon", "Fri"]
        }"#;
        let rule: Rule = serde_json::from_str(json).unwrap();
        assert!(rule.permits(Some("com.apple.Safari"), Weekday::Fri));
        assert!(!rule.permits(Some("com.apple.Safari"), Weekday::Thu));
    }
}
