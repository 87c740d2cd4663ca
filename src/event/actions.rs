use std::sync::Arc;
use tracing::debug;

use super::runtime::{normalize_actions, Event};

/// Callback handed to [`Event::execute_actions`]; receives the action name
/// and the event it belongs to.
pub type ActionCallback = Arc<dyn Fn(&str, &Arc<Event>) + Send + Sync>;

/// Action list management. Actions are trimmed, non-empty strings with
/// set semantics by exact match; every mutation marks the owning profile
/// dirty.
impl Event {
    pub async fn add_action(&self, action: &str) -> bool {
        let action = action.trim();
        if action.is_empty() {
            return false;
        }

        {
            let mut inner = self.inner.write().await;
            if inner.actions.iter().any(|a| a == action) {
                return false;
            }
            inner.actions.push(action.to_string());
        }

        self.mark_profile_dirty();
        true
    }

    pub async fn remove_action(&self, action: &str) -> bool {
        let action = action.trim();
        let removed = {
            let mut inner = self.inner.write().await;
            let before = inner.actions.len();
            inner.actions.retain(|a| a != action);
            inner.actions.len() != before
        };

        if removed {
            self.mark_profile_dirty();
        }
        removed
    }

    pub async fn clear_actions(&self) {
        let had_any = {
            let mut inner = self.inner.write().await;
            let had_any = !inner.actions.is_empty();
            inner.actions.clear();
            had_any
        };

        if had_any {
            self.mark_profile_dirty();
        }
    }

    /// Replace the whole list; input goes through the same trim and
    /// duplicate suppression as individual adds.
    pub async fn set_actions(&self, actions: &[String]) {
        {
            let mut inner = self.inner.write().await;
            inner.actions = normalize_actions(actions);
        }
        self.mark_profile_dirty();
    }

    pub async fn actions(&self) -> Vec<String> {
        self.inner.read().await.actions.clone()
    }

    pub async fn has_action(&self, action: &str) -> bool {
        let action = action.trim();
        self.inner.read().await.actions.iter().any(|a| a == action)
    }

    pub async fn has_actions(&self) -> bool {
        !self.inner.read().await.actions.is_empty()
    }

    /// Invoke `callback` once per action, each on its own task. The caller
    /// is never blocked and never observes callback outcomes.
    pub async fn execute_actions(self: &Arc<Self>, callback: ActionCallback) {
        let actions = self.actions().await;
        debug!(
            "executing {} action(s) for event '{}'",
            actions.len(),
            self.name()
        );

        for action in actions {
            let callback = Arc::clone(&callback);
            let event = Arc::clone(self);
            tokio::spawn(async move {
                callback(&action, &event);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{format_timestamp, EventConfig};
    use crate::solar::SolarClock;
    use chrono::{Duration, Local};
    use std::sync::Weak;

    async fn sample_event() -> Arc<Event> {
        let mut cfg = EventConfig::named("actionable");
        cfg.target_time = Some(format_timestamp(&(Local::now() + Duration::minutes(30))));
        Event::from_config(&cfg, Weak::new(), Arc::new(SolarClock::new(44.8, 20.5))).unwrap()
    }

    #[tokio::test]
    async fn add_trims_and_suppresses_duplicates() {
        let event = sample_event().await;

        assert!(event.add_action(" lights-on ").await);
        assert!(!event.add_action("lights-on").await);
        assert!(!event.add_action("   ").await);

        assert_eq!(event.actions().await, vec!["lights-on".to_string()]);
        assert!(event.has_action("lights-on").await);
        assert!(event.has_actions().await);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let event = sample_event().await;
        event.add_action("one").await;
        event.add_action("two").await;

        assert!(event.remove_action("one").await);
        assert!(!event.remove_action("one").await);
        assert_eq!(event.actions().await, vec!["two".to_string()]);

        event.clear_actions().await;
        assert!(!event.has_actions().await);
    }

    #[tokio::test]
    async fn set_replaces_the_whole_list() {
        let event = sample_event().await;
        event.add_action("old").await;

        event
            .set_actions(&[" a ".to_string(), "b".to_string(), "a".to_string()])
            .await;
        assert_eq!(event.actions().await, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn execute_runs_every_action_without_blocking() {
        let event = sample_event().await;
        event.add_action("first").await;
        event.add_action("second").await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let callback: ActionCallback = Arc::new(move |action: &str, _event: &Arc<Event>| {
            let _ = tx.send(action.to_string());
        });

        event.execute_actions(callback).await;

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort();
        assert_eq!(seen, vec!["first".to_string(), "second".to_string()]);
    }
}
