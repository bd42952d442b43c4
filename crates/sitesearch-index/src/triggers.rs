//! Recursive update triggers: page changes that cascade to the subtree.

use sitesearch_core::{FieldMap, IndexingConfiguration, Record, RecursiveUpdateTrigger, Result};
use tracing::debug;

/// Requeue and garbage rules evaluated on page updates.
#[derive(Debug, Clone)]
pub struct RecursiveUpdateTriggers {
    requeue: Vec<RecursiveUpdateTrigger>,
    garbage: Vec<RecursiveUpdateTrigger>,
}

impl Default for RecursiveUpdateTriggers {
    fn default() -> Self {
        Self {
            requeue: vec![
                RecursiveUpdateTrigger::new(
                    "page and subpages unhidden",
                    [],
                    [("hidden", "0"), ("extendToSubpages", "0")],
                ),
                RecursiveUpdateTrigger::new(
                    "page with extendToSubpages unhidden",
                    [("extendToSubpages", "1")],
                    [("hidden", "0")],
                ),
                RecursiveUpdateTrigger::new(
                    "hidden page stops hiding subpages",
                    [("hidden", "1")],
                    [("extendToSubpages", "0")],
                ),
                RecursiveUpdateTrigger::new(
                    "subpages included in search",
                    [],
                    [("no_search_sub_entries", "0")],
                ),
            ],
            garbage: vec![
                RecursiveUpdateTrigger::new(
                    "page with extendToSubpages hidden",
                    [("extendToSubpages", "1")],
                    [("hidden", "1")],
                ),
                RecursiveUpdateTrigger::new(
                    "hidden page starts hiding subpages",
                    [("hidden", "1")],
                    [("extendToSubpages", "1")],
                ),
                RecursiveUpdateTrigger::new(
                    "subpages excluded from search",
                    [],
                    [("no_search_sub_entries", "1")],
                ),
            ],
        }
    }
}

impl RecursiveUpdateTriggers {
    /// Rule set without any rules.
    pub fn empty() -> Self {
        Self {
            requeue: Vec::new(),
            garbage: Vec::new(),
        }
    }

    /// Builder: add a requeue rule.
    pub fn with_requeue_trigger(mut self, trigger: RecursiveUpdateTrigger) -> Result<Self> {
        trigger.validate()?;
        self.requeue.push(trigger);
        Ok(self)
    }

    /// Builder: add a garbage rule.
    pub fn with_garbage_trigger(mut self, trigger: RecursiveUpdateTrigger) -> Result<Self> {
        trigger.validate()?;
        self.garbage.push(trigger);
        Ok(self)
    }

    pub fn requeue_triggers(&self) -> &[RecursiveUpdateTrigger] {
        &self.requeue
    }

    pub fn garbage_triggers(&self) -> &[RecursiveUpdateTrigger] {
        &self.garbage
    }

    /// Whether the subtree of `page` must be queued again.
    ///
    /// Fires on a matching rule, or when a field listed in the configuration's
    /// `recursive_update_fields` changed.
    pub fn requeue_triggered(
        &self,
        page: &Record,
        changed_fields: &FieldMap,
        configuration: Option<&IndexingConfiguration>,
    ) -> bool {
        if let Some(trigger) = first_match(&self.requeue, page, changed_fields) {
            debug!("Page {} triggers requeue: {}", page.uid, trigger.name);
            return true;
        }
        let by_field = configuration.is_some_and(|c| {
            c.recursive_update_fields
                .iter()
                .any(|field| changed_fields.contains_key(field))
        });
        if by_field {
            debug!("Page {} triggers requeue through recursive update fields", page.uid);
        }
        by_field
    }

    /// Whether the subtree of `page` must be removed from the index.
    pub fn garbage_triggered(&self, page: &Record, changed_fields: &FieldMap) -> bool {
        match first_match(&self.garbage, page, changed_fields) {
            Some(trigger) => {
                debug!("Page {} triggers garbage collection: {}", page.uid, trigger.name);
                true
            }
            None => false,
        }
    }
}

fn first_match<'a>(
    triggers: &'a [RecursiveUpdateTrigger],
    page: &Record,
    changed_fields: &FieldMap,
) -> Option<&'a RecursiveUpdateTrigger> {
    triggers.iter().find(|t| t.matches(page, changed_fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::page;
    use serde_json::json;

    fn changes(pairs: &[(&str, i64)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), json!(v)))
            .collect()
    }

    #[test]
    fn test_hiding_with_extend_to_subpages_is_garbage() {
        let triggers = RecursiveUpdateTriggers::default();
        let live = page(10, 1).with("hidden", 1).with("extendToSubpages", 1);
        let changed = changes(&[("hidden", 1)]);

        assert!(triggers.garbage_triggered(&live, &changed));
        assert!(!triggers.requeue_triggered(&live, &changed, None));
    }

    #[test]
    fn test_plain_hide_is_not_recursive() {
        let triggers = RecursiveUpdateTriggers::default();
        let live = page(10, 1).with("hidden", 1);
        assert!(!triggers.garbage_triggered(&live, &changes(&[("hidden", 1)])));
    }

    #[test]
    fn test_unhide_requeues() {
        let triggers = RecursiveUpdateTriggers::default();
        let live = page(10, 1).with("extendToSubpages", 1);
        assert!(triggers.requeue_triggered(&live, &changes(&[("hidden", 0)]), None));

        let both = changes(&[("hidden", 0), ("extendToSubpages", 0)]);
        assert!(triggers.requeue_triggered(&page(10, 1), &both, None));
        assert!(triggers.requeue_triggered(
            &page(10, 1),
            &changes(&[("no_search_sub_entries", 0)]),
            None
        ));
    }

    #[test]
    fn test_recursive_update_fields() {
        let triggers = RecursiveUpdateTriggers::empty();
        let mut conf = IndexingConfiguration::for_table("pages");
        conf.recursive_update_fields = vec!["title".to_string()];
        let changed: FieldMap = [("title".to_string(), json!("New"))].into_iter().collect();

        assert!(triggers.requeue_triggered(&page(10, 1), &changed, Some(&conf)));
        assert!(!triggers.requeue_triggered(&page(10, 1), &changed, None));
    }

    #[test]
    fn test_empty_change_set_rejected() {
        let rule = RecursiveUpdateTrigger::new("broken", [("hidden", "1")], []);
        assert!(RecursiveUpdateTriggers::default()
            .with_garbage_trigger(rule)
            .is_err());

        let rule = RecursiveUpdateTrigger::new("custom", [], [("fe_group", "-2")]);
        let triggers = RecursiveUpdateTriggers::empty()
            .with_garbage_trigger(rule)
            .unwrap();
        assert_eq!(triggers.garbage_triggers().len(), 1);
        assert!(triggers.requeue_triggers().is_empty());
    }
}
