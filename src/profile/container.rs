use anyhow::Result;
use chrono::{DateTime, Local};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::store;
use crate::config::{format_timestamp, EventConfig, ProfileConfig};
use crate::event::{Event, FireCallback, SubscriberList};
use crate::solar::SolarClock;

/// Delay between a dirty edge and the deferred save; further edges inside
/// the window push the save out again.
const SAVE_DEBOUNCE: Duration = Duration::from_secs(3);

/// A named set of events backed by one JSON file.
///
/// The profile owns its events, re-emits their fires to its own
/// subscribers and coalesces state changes into a single debounced write.
pub struct Profile {
    name: String,
    description: RwLock<String>,
    events: RwLock<HashMap<String, Arc<Event>>>,
    changed: AtomicBool,
    dirty: Notify,
    save_cancel: CancellationToken,
    save_task: Mutex<Option<JoinHandle<()>>>,
    file_path: PathBuf,
    solar: Arc<SolarClock>,
    subscribers: SubscriberList,
    last_modified: RwLock<Option<DateTime<Local>>>,
    disposed: AtomicBool,
}

impl Profile {
    pub fn new(
        name: &str,
        description: &str,
        config_dir: &Path,
        solar: Arc<SolarClock>,
    ) -> Arc<Self> {
        let name = name.trim().to_string();
        let file_path = config_dir.join(store::profile_file_name(&name));

        let profile = Arc::new(Self {
            name,
            description: RwLock::new(description.to_string()),
            events: RwLock::new(HashMap::new()),
            changed: AtomicBool::new(false),
            dirty: Notify::new(),
            save_cancel: CancellationToken::new(),
            save_task: Mutex::new(None),
            file_path,
            solar,
            subscribers: SubscriberList::new(),
            last_modified: RwLock::new(None),
            disposed: AtomicBool::new(false),
        });

        let save_loop = profile.spawn_save_loop();
        if let Ok(mut save_task) = profile.save_task.lock() {
            *save_task = Some(save_loop);
        }
        profile
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn description(&self) -> String {
        self.description.read().await.clone()
    }

    pub async fn set_description(&self, description: &str) {
        *self.description.write().await = description.to_string();
        self.mark_changed();
    }

    pub async fn last_modified(&self) -> Option<DateTime<Local>> {
        *self.last_modified.read().await
    }

    pub(crate) async fn restore_last_modified(&self, stamp: Option<DateTime<Local>>) {
        *self.last_modified.write().await = stamp;
    }

    pub(crate) fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn is_dirty(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    /// Raise the dirty flag and arm the deferred save. Clearing the flag
    /// never disarms; the save loop checks it again at expiry.
    pub(crate) fn mark_changed(&self) {
        self.changed.store(true, Ordering::SeqCst);
        self.dirty.notify_one();
    }

    /// Subscribe to fires of any event in this profile.
    pub fn on_event_fired(&self, callback: FireCallback) -> u64 {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub(crate) fn notify_event_fired(&self, event: &Arc<Event>) {
        self.subscribers.emit(event);
    }

    /// Build an event from its config and register it under its unique
    /// name. With `overwrite` an existing event of the same name is
    /// removed first; otherwise a collision is reported as `false`.
    /// Construction failures are logged and reported as `false`.
    pub async fn add_event(self: &Arc<Self>, cfg: &EventConfig, overwrite: bool) -> bool {
        if overwrite {
            self.remove_event(&cfg.name).await;
        }

        let event =
            match Event::from_config(cfg, Arc::downgrade(self), Arc::clone(&self.solar)) {
                Ok(event) => event,
                Err(e) => {
                    error!(
                        "profile '{}': event '{}' not added: {:#}",
                        self.name, cfg.name, e
                    );
                    return false;
                }
            };

        {
            let mut events = self.events.write().await;
            match events.entry(event.name().to_string()) {
                Entry::Occupied(_) => {
                    warn!(
                        "profile '{}' already has an event named '{}'",
                        self.name,
                        event.name()
                    );
                    return false;
                }
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&event));
                }
            }
        }

        event.start();
        self.mark_changed();
        debug!("profile '{}': event '{}' added", self.name, event.name());
        true
    }

    /// Remove an event by name, stopping its timer. Waits for an
    /// in-flight tick, so the event fires no callbacks once this returns.
    pub async fn remove_event(&self, name: &str) -> bool {
        let removed = self.events.write().await.remove(name.trim());

        match removed {
            Some(event) => {
                event.stop().await;
                self.mark_changed();
                debug!("profile '{}': event '{}' removed", self.name, name.trim());
                true
            }
            None => false,
        }
    }

    /// Drop an event from the map without joining its timer task. Used by
    /// a one-time event removing itself from inside that task, where
    /// joining would deadlock; the task exits right after this call.
    pub(crate) async fn detach_event(&self, name: &str) -> bool {
        let removed = self.events.write().await.remove(name.trim()).is_some();

        if removed {
            self.mark_changed();
            debug!(
                "profile '{}': event '{}' removed after firing",
                self.name,
                name.trim()
            );
        }
        removed
    }

    pub async fn get_event(&self, name: &str) -> Option<Arc<Event>> {
        self.events.read().await.get(name.trim()).cloned()
    }

    /// Snapshot of all events, ascending by target time.
    pub async fn get_events(&self) -> Vec<Arc<Event>> {
        let snapshot: Vec<Arc<Event>> = self.events.read().await.values().cloned().collect();

        let mut keyed = Vec::with_capacity(snapshot.len());
        for event in snapshot {
            keyed.push((event.target_time().await, event));
        }
        keyed.sort_by_key(|(target, _)| *target);
        keyed.into_iter().map(|(_, event)| event).collect()
    }

    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn enable_all_events(&self) -> bool {
        let mut all = true;
        for event in self.get_events().await {
            all &= event.enable().await;
        }
        all
    }

    pub async fn disable_all_events(&self) -> bool {
        let mut all = true;
        for event in self.get_events().await {
            all &= event.disable().await;
        }
        all
    }

    pub async fn remove_all_events(&self) -> bool {
        let names: Vec<String> = self.events.read().await.keys().cloned().collect();
        let mut all = true;
        for name in names {
            all &= self.remove_event(&name).await;
        }
        all
    }

    /// Persist the current state. The dirty flag drops before the write
    /// and is restored on failure, so edits racing the write are never
    /// lost and a failed save retries on the next dirty edge.
    pub async fn save(&self) -> Result<()> {
        self.changed.store(false, Ordering::SeqCst);

        let result = self.write_snapshot().await;
        if result.is_err() {
            self.changed.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn write_snapshot(&self) -> Result<()> {
        let events = self.get_events().await;
        let mut configs = Vec::with_capacity(events.len());
        for (index, event) in events.iter().enumerate() {
            configs.push(event.to_config(index as u32 + 1).await);
        }

        let stamp = Local::now();
        let config = ProfileConfig {
            name: self.name.clone(),
            description: self.description.read().await.clone(),
            last_modified: Some(format_timestamp(&stamp)),
            events: configs,
        };

        store::write_profile(&self.file_path, &config).await?;
        *self.last_modified.write().await = Some(stamp);
        Ok(())
    }

    /// Stop the deferred save, flush once if dirty, then stop and drop
    /// every event. The profile file stays on disk. Idempotent.
    ///
    /// A cancellation barrier: the save loop and every timer task are
    /// joined, so no save runs and no callback fires after this returns.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.save_cancel.cancel();
        let save_loop = self.save_task.lock().ok().and_then(|mut task| task.take());
        if let Some(handle) = save_loop {
            let _ = handle.await;
        }

        if self.is_dirty() {
            if let Err(e) = self.save().await {
                error!("final save of profile '{}' failed: {:#}", self.name, e);
            }
        }

        let events: Vec<Arc<Event>> = {
            let mut events = self.events.write().await;
            events.drain().map(|(_, event)| event).collect()
        };
        for event in &events {
            event.stop().await;
        }
        self.subscribers.clear();

        debug!("profile '{}' disposed", self.name);
    }

    fn spawn_save_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let cancel = self.save_cancel.clone();

        tokio::spawn(async move {
            loop {
                let Some(profile) = weak.upgrade() else { break };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = profile.dirty.notified() => {}
                }

                // Debounce window: every further edge pushes the save out
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = profile.dirty.notified() => continue,
                        _ = tokio::time::sleep(SAVE_DEBOUNCE) => break,
                    }
                }

                if cancel.is_cancelled() {
                    break;
                }

                if profile.is_dirty() {
                    if let Err(e) = profile.save().await {
                        error!(
                            "deferred save of profile '{}' failed: {:#}",
                            profile.name, e
                        );
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Timelike};
    use tempfile::{tempdir, TempDir};

    fn test_profile(name: &str) -> (Arc<Profile>, TempDir) {
        let dir = tempdir().unwrap();
        let solar = Arc::new(SolarClock::new(44.8125, 20.4612));
        let profile = Profile::new(name, "test profile", dir.path(), solar);
        (profile, dir)
    }

    fn future_cfg(name: &str, minutes: i64) -> EventConfig {
        let mut cfg = EventConfig::named(name);
        cfg.target_time = Some(format_timestamp(
            &(Local::now() + ChronoDuration::minutes(minutes)),
        ));
        cfg
    }

    fn recurring_cfg(name: &str, minutes: i64) -> EventConfig {
        let mut cfg = future_cfg(name, minutes);
        cfg.frequency = "EveryNthMinute".to_string();
        cfg.rate = 10;
        cfg
    }

    #[tokio::test]
    async fn add_and_get_events() {
        let (profile, _dir) = test_profile("Basics");

        assert!(profile.add_event(&future_cfg("lamp", 30), false).await);
        assert!(profile.get_event("lamp").await.is_some());
        assert_eq!(profile.event_count().await, 1);
        assert!(profile.is_dirty());
    }

    #[tokio::test]
    async fn duplicate_names_collide_without_overwrite() {
        let (profile, _dir) = test_profile("Collisions");

        assert!(profile.add_event(&future_cfg("dup", 30), false).await);
        assert!(!profile.add_event(&future_cfg("dup", 40), false).await);
        assert_eq!(profile.event_count().await, 1);
    }

    #[tokio::test]
    async fn overwrite_replaces_the_existing_event() {
        let (profile, _dir) = test_profile("Overwrite");

        assert!(profile.add_event(&future_cfg("slot", 30), true).await);
        let first = profile.get_event("slot").await.unwrap();

        assert!(profile.add_event(&future_cfg("slot", 60), true).await);
        let second = profile.get_event("slot").await.unwrap();

        assert_eq!(profile.event_count().await, 1);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn invalid_event_is_reported_false() {
        let (profile, _dir) = test_profile("Invalid");

        let mut cfg = future_cfg("broken", 30);
        cfg.frequency = "EveryNthWeek".to_string();
        cfg.add_rate = 0;

        assert!(!profile.add_event(&cfg, false).await);
        assert_eq!(profile.event_count().await, 0);
    }

    #[tokio::test]
    async fn past_one_time_event_is_not_added() {
        let (profile, _dir) = test_profile("TooLate");

        let mut cfg = EventConfig::named("missed");
        cfg.target_time = Some(format_timestamp(
            &(Local::now() - ChronoDuration::minutes(1)),
        ));

        assert!(!profile.add_event(&cfg, false).await);
        assert_eq!(profile.event_count().await, 0);
    }

    #[tokio::test]
    async fn remove_event_by_name() {
        let (profile, _dir) = test_profile("Removal");

        profile.add_event(&future_cfg("ephemeral", 30), false).await;
        assert!(profile.remove_event("ephemeral").await);
        assert!(!profile.remove_event("ephemeral").await);
        assert_eq!(profile.event_count().await, 0);
    }

    #[tokio::test]
    async fn events_snapshot_is_sorted_by_target_time() {
        let (profile, _dir) = test_profile("Sorted");

        profile.add_event(&future_cfg("later", 90), false).await;
        profile.add_event(&future_cfg("sooner", 30), false).await;
        profile.add_event(&future_cfg("middle", 60), false).await;

        let names: Vec<String> = profile
            .get_events()
            .await
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["sooner", "middle", "later"]);
    }

    #[tokio::test]
    async fn enable_and_disable_all() {
        let (profile, _dir) = test_profile("Toggles");

        profile.add_event(&recurring_cfg("a", 30), false).await;
        profile.add_event(&recurring_cfg("b", 60), false).await;

        assert!(profile.disable_all_events().await);
        for event in profile.get_events().await {
            assert_eq!(event.status().await, crate::event::EventStatus::Disabled);
        }

        assert!(profile.enable_all_events().await);
        for event in profile.get_events().await {
            assert_eq!(event.status().await, crate::event::EventStatus::Enabled);
        }
    }

    #[tokio::test]
    async fn remove_all_empties_the_profile() {
        let (profile, _dir) = test_profile("Sweep");

        profile.add_event(&future_cfg("a", 30), false).await;
        profile.add_event(&future_cfg("b", 60), false).await;

        assert!(profile.remove_all_events().await);
        assert_eq!(profile.event_count().await, 0);
    }

    #[tokio::test]
    async fn save_renumbers_ids_by_target_order() {
        let (profile, _dir) = test_profile("Renumber");

        profile.add_event(&future_cfg("third", 90), false).await;
        profile.add_event(&future_cfg("first", 30), false).await;
        profile.add_event(&future_cfg("second", 60), false).await;

        profile.save().await.unwrap();
        assert!(!profile.is_dirty());

        let saved = store::read_profile(profile.file_path()).await.unwrap();
        assert_eq!(saved.name, "Renumber");
        assert!(saved.last_modified.is_some());

        let order: Vec<(u32, String)> = saved
            .events
            .iter()
            .map(|e| (e.id, e.name.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, "first".to_string()),
                (2, "second".to_string()),
                (3, "third".to_string()),
            ]
        );

        // Persisted targets carry no seconds
        for event in &saved.events {
            let target =
                crate::config::parse_timestamp(event.target_time.as_deref().unwrap()).unwrap();
            assert_eq!(target.second(), 0);
        }
    }

    #[tokio::test]
    async fn saved_profile_reloads_into_the_same_events() {
        let (profile, dir) = test_profile("Reload");

        let mut cfg = recurring_cfg("pump", 45);
        cfg.description = "garden pump".to_string();
        cfg.actions = Some(vec!["relay-7".to_string()]);
        profile.add_event(&cfg, false).await;

        profile.save().await.unwrap();
        profile.dispose().await;

        let saved = store::read_profile(profile.file_path()).await.unwrap();
        let solar = Arc::new(SolarClock::new(44.8125, 20.4612));
        let reloaded = Profile::new(&saved.name, &saved.description, dir.path(), solar);
        for event_cfg in &saved.events {
            assert!(reloaded.add_event(event_cfg, true).await);
        }

        let pump = reloaded.get_event("pump").await.unwrap();
        assert_eq!(pump.description().await, "garden pump");
        assert_eq!(pump.actions().await, vec!["relay-7".to_string()]);
        assert!(pump.target_time().await > Local::now() - ChronoDuration::minutes(1));
        reloaded.dispose().await;
    }

    #[tokio::test]
    async fn dirty_edge_triggers_a_deferred_save() {
        let (profile, _dir) = test_profile("Debounce");

        profile.add_event(&future_cfg("spark", 30), false).await;
        assert!(profile.is_dirty());
        assert!(!profile.file_path().exists());

        // Debounce window is three seconds
        tokio::time::sleep(Duration::from_millis(4500)).await;

        assert!(profile.file_path().exists());
        assert!(!profile.is_dirty());
    }

    #[tokio::test]
    async fn dispose_flushes_and_is_idempotent() {
        let (profile, _dir) = test_profile("Flush");

        profile.add_event(&future_cfg("keeper", 30), false).await;
        assert!(profile.is_dirty());

        profile.dispose().await;
        assert!(profile.file_path().exists());
        assert_eq!(profile.event_count().await, 0);

        // Second dispose is a no-op
        profile.dispose().await;
    }

    #[tokio::test]
    async fn one_time_event_removes_itself_after_firing() {
        let (profile, _dir) = test_profile("SelfRemove");

        profile.add_event(&future_cfg("flash", 30), false).await;
        let event = profile.get_event("flash").await.unwrap();

        event.inner.write().await.target_time = Local::now() - ChronoDuration::seconds(30);
        event.tick().await;

        assert!(profile.get_event("flash").await.is_none());
        assert!(event.last_fired().await.is_some());
        assert!(profile.is_dirty());
    }

    #[tokio::test]
    async fn fires_are_reemitted_to_profile_subscribers() {
        let (profile, _dir) = test_profile("FanOut");

        profile.add_event(&recurring_cfg("beacon", 30), false).await;
        let event = profile.get_event("beacon").await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        profile.on_event_fired(Arc::new(move |fired: &Arc<Event>| {
            let _ = tx.send(fired.name().to_string());
        }));

        event.inner.write().await.target_time = Local::now() - ChronoDuration::seconds(30);
        event.tick().await;

        assert_eq!(rx.recv().await.unwrap(), "beacon");
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_break_the_fire() {
        let (profile, _dir) = test_profile("Panics");

        profile.add_event(&recurring_cfg("robust", 30), false).await;
        let event = profile.get_event("robust").await.unwrap();

        profile.on_event_fired(Arc::new(|_: &Arc<Event>| {
            panic!("subscriber bug");
        }));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        profile.on_event_fired(Arc::new(move |fired: &Arc<Event>| {
            let _ = tx.send(fired.name().to_string());
        }));

        event.inner.write().await.target_time = Local::now() - ChronoDuration::seconds(30);
        event.tick().await;

        assert_eq!(rx.recv().await.unwrap(), "robust");
        assert!(event.last_fired().await.is_some());
    }
}
