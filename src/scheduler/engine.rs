use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::parse_timestamp;
use crate::event::{FireCallback, SubscriberList};
use crate::profile::{store, Profile};
use crate::solar::{SolarClock, SolarProvider};

/// The root container: a set of named profiles loaded from one config
/// directory, sharing a geographic location for astronomical events.
///
/// Event fires bubble up per profile and are re-emitted to the
/// scheduler's own subscribers.
pub struct Scheduler {
    config_dir: PathBuf,
    solar: Arc<SolarClock>,
    profiles: RwLock<HashMap<String, Arc<Profile>>>,
    subscribers: Arc<SubscriberList>,
    subscriptions: Mutex<HashMap<String, u64>>,
    disposed: AtomicBool,
}

impl Scheduler {
    pub fn new(config_dir: impl Into<PathBuf>, latitude: f64, longitude: f64) -> Self {
        Self::build(config_dir.into(), SolarClock::new(latitude, longitude))
    }

    /// Same as [`Scheduler::new`] with an explicit solar provider, for
    /// hosts substituting their own ephemeris source.
    pub fn with_provider(
        config_dir: impl Into<PathBuf>,
        latitude: f64,
        longitude: f64,
        provider: Arc<dyn SolarProvider>,
    ) -> Self {
        Self::build(
            config_dir.into(),
            SolarClock::with_provider(latitude, longitude, provider),
        )
    }

    fn build(config_dir: PathBuf, solar: SolarClock) -> Self {
        Self {
            config_dir,
            solar: Arc::new(solar),
            profiles: RwLock::new(HashMap::new()),
            subscribers: Arc::new(SubscriberList::new()),
            subscriptions: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn latitude(&self) -> f64 {
        self.solar.latitude()
    }

    pub fn longitude(&self) -> f64 {
        self.solar.longitude()
    }

    /// Create the config directory if needed and load every profile file
    /// in it. Malformed files and duplicate names are logged and skipped;
    /// the rest of the load continues.
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config_dir)
            .await
            .context("failed to create config directory")?;

        let mut entries = tokio::fs::read_dir(&self.config_dir)
            .await
            .context("failed to list config directory")?;

        let mut loaded = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string())
            else {
                continue;
            };
            // Loose on purpose: accepts both "-Profile.json" and
            // "-profile.json" spellings
            if !file_name.ends_with("rofile.json") {
                continue;
            }

            match self.load_profile_file(&path).await {
                Ok(true) => loaded += 1,
                Ok(false) => {}
                Err(e) => warn!("skipping profile file {}: {:#}", path.display(), e),
            }
        }

        info!(
            "scheduler initialized with {} profile(s) from {}",
            loaded,
            self.config_dir.display()
        );
        Ok(())
    }

    async fn load_profile_file(&self, path: &Path) -> Result<bool> {
        let config = store::read_profile(path).await?;

        let name = config.name.trim().to_string();
        if name.is_empty() {
            bail!("profile record has no name");
        }

        let Some(profile) = self.insert_profile(&name, &config.description).await else {
            warn!(
                "duplicate profile name '{}' in {}, skipping",
                name,
                path.display()
            );
            return Ok(false);
        };

        profile
            .restore_last_modified(config.last_modified.as_deref().and_then(parse_timestamp))
            .await;

        for event_cfg in &config.events {
            // Per-event failures are logged inside; the load continues
            profile.add_event(event_cfg, true).await;
        }

        Ok(true)
    }

    /// Create an empty profile. Returns false on a duplicate name.
    pub async fn add_profile(&self, name: &str, description: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            warn!("profile name must not be empty");
            return false;
        }

        match self.insert_profile(name, description).await {
            Some(profile) => {
                // Arm the deferred save so the file appears on disk
                profile.mark_changed();
                info!("profile '{}' added", name);
                true
            }
            None => {
                warn!("profile '{}' already exists", name);
                false
            }
        }
    }

    async fn insert_profile(&self, name: &str, description: &str) -> Option<Arc<Profile>> {
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(name) {
            return None;
        }

        let profile = Profile::new(name, description, &self.config_dir, Arc::clone(&self.solar));

        // Re-emit this profile's fires at scheduler level
        let outer = Arc::clone(&self.subscribers);
        let subscription = profile.on_event_fired(Arc::new(move |event| outer.emit(event)));
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.insert(name.to_string(), subscription);
        }

        profiles.insert(name.to_string(), Arc::clone(&profile));
        Some(profile)
    }

    /// Remove a profile: unsubscribe, dispose (which flushes a pending
    /// save) and delete its file.
    pub async fn remove_profile(&self, name: &str) -> bool {
        let name = name.trim();
        let removed = self.profiles.write().await.remove(name);
        let Some(profile) = removed else {
            return false;
        };

        let subscription = self
            .subscriptions
            .lock()
            .ok()
            .and_then(|mut subscriptions| subscriptions.remove(name));
        if let Some(subscription) = subscription {
            profile.unsubscribe(subscription);
        }

        profile.dispose().await;

        if profile.file_path().exists() {
            if let Err(e) = store::delete_profile(profile.file_path()).await {
                warn!("profile '{}' removed but file cleanup failed: {:#}", name, e);
            }
        }

        info!("profile '{}' removed", name);
        true
    }

    pub async fn get_profile(&self, name: &str) -> Option<Arc<Profile>> {
        self.profiles.read().await.get(name.trim()).cloned()
    }

    /// Snapshot of all profiles, sorted by name.
    pub async fn get_profiles(&self) -> Vec<Arc<Profile>> {
        let mut profiles: Vec<Arc<Profile>> =
            self.profiles.read().await.values().cloned().collect();
        profiles.sort_by(|a, b| a.name().cmp(b.name()));
        profiles
    }

    /// Subscribe to fires from every event in every profile.
    pub fn on_event_fired(&self, callback: FireCallback) -> u64 {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Dispose every profile (flushing pending saves, files retained) and
    /// drop all subscriptions. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let profiles: Vec<Arc<Profile>> = {
            let mut profiles = self.profiles.write().await;
            profiles.drain().map(|(_, profile)| profile).collect()
        };

        for profile in &profiles {
            let subscription = self
                .subscriptions
                .lock()
                .ok()
                .and_then(|mut subscriptions| subscriptions.remove(profile.name()));
            if let Some(subscription) = subscription {
                profile.unsubscribe(subscription);
            }
            profile.dispose().await;
        }

        self.subscribers.clear();
        info!("scheduler disposed");
    }
}
