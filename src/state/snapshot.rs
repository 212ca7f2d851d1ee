//! Eligible workflow snapshot
//!
//! Everything the matcher reads while handling an event, derived from the
//! configuration, the frontmost application and the weekday. Rebuilt off
//! the event path and swapped in whole; never mutated after construction.

use std::sync::Arc;

use chrono::Weekday;

use crate::workflow::{
    eligible_groups, ApplicationContext, Configuration, ShortcutResolver, Workflow,
};

#[derive(Debug)]
pub struct Snapshot {
    /// Enabled keyboard-triggered workflows from eligible groups, in
    /// configuration order
    active: Vec<Arc<Workflow>>,
    /// Enabled application-triggered workflows from eligible groups
    application: Vec<Arc<Workflow>>,
    resolver: ShortcutResolver,
    frontmost: Option<String>,
    weekday: Weekday,
}

impl Snapshot {
    pub fn build(configuration: &Configuration, frontmost: Option<&str>, weekday: Weekday) -> Self {
        let mut active = Vec::new();
        let mut application = Vec::new();

        for group in eligible_groups(&configuration.groups, frontmost, weekday) {
            for workflow in group.workflows.iter().filter(|w| w.is_enabled) {
                if !workflow.shortcuts().is_empty() {
                    active.push(Arc::new(workflow.clone()));
                } else if !workflow.application_triggers().is_empty() {
                    application.push(Arc::new(workflow.clone()));
                }
            }
        }

        let resolver = ShortcutResolver::build(&active);

        Self {
            active,
            application,
            resolver,
            frontmost: frontmost.map(str::to_string),
            weekday,
        }
    }

    pub fn empty(weekday: Weekday) -> Self {
        Self {
            active: Vec::new(),
            application: Vec::new(),
            resolver: ShortcutResolver::default(),
            frontmost: None,
            weekday,
        }
    }

    pub fn active_workflows(&self) -> &[Arc<Workflow>] {
        &self.active
    }

    pub fn resolver(&self) -> &ShortcutResolver {
        &self.resolver
    }

    pub fn frontmost(&self) -> Option<&str> {
        self.frontmost.as_deref()
    }

    pub fn weekday(&self) -> Weekday {
        self.weekday
    }

    /// Application-triggered workflows listening for this moment
    pub fn application_workflows(
        &self,
        bundle_identifier: &str,
        context: ApplicationContext,
    ) -> Vec<Arc<Workflow>> {
        self.application
            .iter()
            .filter(|workflow| {
                workflow
                    .application_triggers()
                    .iter()
                    .any(|trigger| trigger.matches(bundle_identifier, context))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{ApplicationTrigger, Rule, Trigger, WorkflowGroup};

    fn keyboard(id: &str, chord: &str) -> Workflow {
        Workflow::new(id, id).with_shortcuts(vec![chord.parse().unwrap()])
    }

    fn ids(workflows: &[Arc<Workflow>]) -> Vec<&str> {
        workflows.iter().map(|w| w.id.as_str()).collect()
    }

    #[test]
    fn test_disabled_workflows_are_excluded() {
        let mut disabled = keyboard("off", "cmd+d");
        disabled.is_enabled = false;
        let configuration = Configuration::new(vec![WorkflowGroup::new(
            "g",
            vec![keyboard("on", "cmd+e"), disabled],
        )]);

        let snapshot = Snapshot::build(&configuration, None, Weekday::Mon);
        assert_eq!(ids(snapshot.active_workflows()), vec!["on"]);
        assert_eq!(snapshot.resolver().len(), 1);
    }

    #[test]
    fn test_rule_restricts_active_set() {
        let restricted = WorkflowGroup::new("safari", vec![keyboard("tabs", "cmd+shift+t")])
            .with_rule(Rule {
                allowed_bundle_identifiers: ["com.apple.Safari".to_string()].into(),
                ..Default::default()
            });
        let configuration = Configuration::new(vec![restricted]);

        let in_safari = Snapshot::build(&configuration, Some("com.apple.Safari"), Weekday::Mon);
        assert_eq!(ids(in_safari.active_workflows()), vec!["tabs"]);

        let in_mail = Snapshot::build(&configuration, Some("com.apple.mail"), Weekday::Mon);
        assert!(in_mail.active_workflows().is_empty());
        assert!(in_mail.resolver().is_empty());
    }

    #[test]
    fn test_application_workflows() {
        let launched = Workflow::new("launch", "launch").with_trigger(Trigger::Application {
            triggers: vec![ApplicationTrigger {
                bundle_identifier: "com.apple.Music".to_string(),
                contexts: [ApplicationContext::Launched].into_iter().collect(),
            }],
        });
        let configuration = Configuration::new(vec![WorkflowGroup::new("g", vec![launched])]);
        let snapshot = Snapshot::build(&configuration, None, Weekday::Mon);

        assert!(snapshot.active_workflows().is_empty());
        assert_eq!(
            ids(&snapshot.application_workflows("com.apple.Music", ApplicationContext::Launched)),
            vec!["launch"]
        );
        assert!(snapshot
            .application_workflows("com.apple.Music", ApplicationContext::Closed)
            .is_empty());
    }
}
