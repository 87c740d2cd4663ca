use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Local};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::{format_timestamp, parse_legacy_date_time, parse_timestamp, EventConfig};
use crate::profile::Profile;
use crate::recurrence::{
    next_fire, resolve_local, round_to_minute, until_next_minute, Frequency, RecurrenceRule,
};
use crate::solar::{AstroOffset, SolarClock};

/// Days searched forward for an astronomical instant that clears the
/// re-fire guard.
const MAX_ASTRO_SEARCH: u32 = 370;

/// Whether an event's target is a fixed wall-clock time or a solar anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Absolute,
    Astronomical,
}

impl EventKind {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("astronomicalevent") {
            EventKind::Astronomical
        } else {
            EventKind::Absolute
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Absolute => "AbsoluteEvent",
            EventKind::Astronomical => "AstronomicalEvent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Enabled,
    Disabled,
}

impl EventStatus {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("disabled") {
            EventStatus::Disabled
        } else {
            EventStatus::Enabled
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Enabled => "Enabled",
            EventStatus::Disabled => "Disabled",
        }
    }
}

pub(crate) struct EventInner {
    pub(crate) id: u32,
    pub(crate) description: String,
    pub(crate) rec_description: String,
    pub(crate) status: EventStatus,
    pub(crate) kind: EventKind,
    pub(crate) rule: RecurrenceRule,
    pub(crate) astro_offset: AstroOffset,
    pub(crate) target_time: DateTime<Local>,
    pub(crate) last_fired: Option<DateTime<Local>>,
    pub(crate) actions: Vec<String>,
    pub(crate) acknowledge: bool,
}

pub(crate) enum TickOutcome {
    Rearm,
    Removed,
}

/// A scheduled event: one recurrence rule, one target time, one timer.
///
/// The timer task sleeps to the next minute boundary, checks whether the
/// target has been reached, dispatches through the owning profile, then
/// advances the target and re-arms. Disabled events keep their task parked
/// until re-enabled or removed.
pub struct Event {
    name: String,
    pub(crate) inner: RwLock<EventInner>,
    profile: Weak<Profile>,
    solar: Arc<SolarClock>,
    rearm: Notify,
    cancel: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Event {
    /// Validate a config record and build the event, re-anchoring its
    /// target into the future. The timer is not started; the owning
    /// container does that once the event is registered.
    pub(crate) fn from_config(
        cfg: &EventConfig,
        profile: Weak<Profile>,
        solar: Arc<SolarClock>,
    ) -> Result<Arc<Self>> {
        let name = cfg.name.trim().to_string();
        if name.is_empty() {
            bail!("event name must not be empty");
        }

        let kind = EventKind::parse(&cfg.event_type);
        let status = EventStatus::parse(&cfg.state);
        let rule = RecurrenceRule::new(Frequency::parse(&cfg.frequency), cfg.rate, cfg.add_rate);
        rule.validate()
            .with_context(|| format!("event '{}' has an invalid recurrence rule", name))?;

        let astro_offset = match kind {
            EventKind::Astronomical => cfg
                .astro_offset
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(AstroOffset::parse)
                .unwrap_or_default(),
            EventKind::Absolute => AstroOffset::default(),
        };

        let now = Local::now();
        let configured_target = cfg
            .target_time
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| match (cfg.date.as_deref(), cfg.time.as_deref()) {
                (Some(date), Some(time)) => parse_legacy_date_time(date, time),
                _ => None,
            })
            .unwrap_or_else(|| {
                warn!(
                    "event '{}' has no usable target time, defaulting to five minutes from now",
                    name
                );
                now + Duration::minutes(5)
            });

        let target_time =
            compute_next_target(&solar, &rule, kind, &astro_offset, configured_target, now)
                .with_context(|| format!("event '{}' target could not be scheduled", name))?;

        if rule.is_one_time() && target_time < now {
            bail!(
                "one-time event '{}' is scheduled in the past ({})",
                name,
                format_timestamp(&target_time)
            );
        }

        let last_fired = cfg.last_fired.as_deref().and_then(parse_timestamp);
        let rec_description = rule.describe(target_time);

        debug!(
            "event '{}' scheduled for {} ({})",
            name,
            format_timestamp(&target_time),
            rec_description
        );

        Ok(Arc::new(Self {
            name,
            inner: RwLock::new(EventInner {
                id: cfg.id,
                description: cfg.description.clone(),
                rec_description,
                status,
                kind,
                rule,
                astro_offset,
                target_time,
                last_fired,
                actions: normalize_actions(cfg.actions.as_deref().unwrap_or_default()),
                acknowledge: cfg.acknowledge,
            }),
            profile,
            solar,
            rearm: Notify::new(),
            cancel: CancellationToken::new(),
            timer: Mutex::new(None),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn id(&self) -> u32 {
        self.inner.read().await.id
    }

    pub async fn description(&self) -> String {
        self.inner.read().await.description.clone()
    }

    pub async fn recurrence_description(&self) -> String {
        self.inner.read().await.rec_description.clone()
    }

    pub async fn status(&self) -> EventStatus {
        self.inner.read().await.status
    }

    pub async fn kind(&self) -> EventKind {
        self.inner.read().await.kind
    }

    pub async fn rule(&self) -> RecurrenceRule {
        self.inner.read().await.rule
    }

    pub async fn target_time(&self) -> DateTime<Local> {
        self.inner.read().await.target_time
    }

    pub async fn last_fired(&self) -> Option<DateTime<Local>> {
        self.inner.read().await.last_fired
    }

    /// Recompute the next target past the current time and resume the
    /// timer.
    pub async fn enable(&self) -> bool {
        let now = Local::now();
        {
            let mut inner = self.inner.write().await;
            let next = compute_next_target(
                &self.solar,
                &inner.rule,
                inner.kind,
                &inner.astro_offset,
                inner.target_time,
                now,
            );
            match next {
                Ok(target) => {
                    inner.target_time = target;
                    let description = inner.rule.describe(target);
                    inner.rec_description = description;
                    inner.status = EventStatus::Enabled;
                }
                Err(e) => {
                    error!("cannot enable event '{}': {:#}", self.name, e);
                    return false;
                }
            }
        }

        self.mark_profile_dirty();
        self.rearm.notify_one();
        true
    }

    /// Park the timer. Disabling an already disabled event succeeds
    /// without touching the dirty flag.
    pub async fn disable(&self) -> bool {
        {
            let mut inner = self.inner.write().await;
            if inner.status == EventStatus::Disabled {
                return true;
            }
            inner.status = EventStatus::Disabled;
        }

        self.mark_profile_dirty();
        self.rearm.notify_one();
        true
    }

    /// Snapshot for persistence; `id` is the caller-assigned display
    /// order and sticks to the event.
    pub(crate) async fn to_config(&self, id: u32) -> EventConfig {
        let mut inner = self.inner.write().await;
        inner.id = id;
        EventConfig {
            id,
            name: self.name.clone(),
            description: inner.description.clone(),
            rec_description: inner.rec_description.clone(),
            event_type: inner.kind.as_str().to_string(),
            state: inner.status.as_str().to_string(),
            frequency: inner.rule.frequency.as_str().to_string(),
            rate: inner.rule.rate,
            add_rate: inner.rule.add_rate,
            astro_offset: (inner.kind == EventKind::Astronomical)
                .then(|| inner.astro_offset.descriptor()),
            target_time: Some(format_timestamp(&inner.target_time)),
            time: None,
            date: None,
            last_fired: inner.last_fired.as_ref().map(format_timestamp),
            acknowledge: inner.acknowledge,
            actions: (!inner.actions.is_empty()).then(|| inner.actions.clone()),
        }
    }

    /// Spawn the timer task. Called exactly once, after the event is
    /// registered with its profile.
    pub(crate) fn start(self: &Arc<Self>) {
        let event = Arc::clone(self);
        let handle = tokio::spawn(async move {
            event.run().await;
        });
        if let Ok(mut timer) = self.timer.lock() {
            *timer = Some(handle);
        }
    }

    /// Stop the timer task and wait for it to finish. An in-flight tick
    /// completes first, so no callbacks fire after this returns. Must not
    /// be called from the timer task itself.
    pub(crate) async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.timer.lock().ok().and_then(|mut timer| timer.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>) {
        loop {
            let enabled = self.inner.read().await.status == EventStatus::Enabled;
            let delay = until_next_minute(Local::now());

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.rearm.notified() => continue,
                _ = tokio::time::sleep(delay), if enabled => {
                    if matches!(self.tick().await, TickOutcome::Removed) {
                        break;
                    }
                }
            }
        }

        debug!("timer for event '{}' stopped", self.name);
    }

    /// One minute-boundary evaluation: fire if the target has been
    /// reached, then advance or self-remove.
    pub(crate) async fn tick(self: &Arc<Self>) -> TickOutcome {
        let now = Local::now();

        // Cancellation may land between the timer expiring and this
        // evaluation; once it has, nothing may fire
        if self.cancel.is_cancelled() {
            return TickOutcome::Removed;
        }

        let due = {
            let inner = self.inner.read().await;
            inner.status == EventStatus::Enabled && now >= inner.target_time
        };
        if !due {
            return TickOutcome::Rearm;
        }

        debug!("event '{}' fired at {}", self.name, format_timestamp(&now));

        let profile = self.profile.upgrade();
        if let Some(profile) = &profile {
            profile.notify_event_fired(self);
        }

        let one_time = {
            let mut inner = self.inner.write().await;
            inner.last_fired = Some(now);
            inner.rule.is_one_time()
        };
        self.mark_profile_dirty();

        if one_time {
            // Detach rather than remove: removal joins the timer task,
            // which is the task running right now
            if let Some(profile) = &profile {
                profile.detach_event(&self.name).await;
            }
            return TickOutcome::Removed;
        }

        {
            let mut inner = self.inner.write().await;
            let next = compute_next_target(
                &self.solar,
                &inner.rule,
                inner.kind,
                &inner.astro_offset,
                inner.target_time,
                now,
            );
            match next {
                Ok(target) => {
                    inner.target_time = target;
                    let description = inner.rule.describe(target);
                    inner.rec_description = description;
                }
                // Keep the old target; the next tick advances again
                Err(e) => error!("event '{}' failed to advance: {:#}", self.name, e),
            }
        }
        self.mark_profile_dirty();

        TickOutcome::Rearm
    }

    pub(crate) fn mark_profile_dirty(&self) {
        if let Some(profile) = self.profile.upgrade() {
            profile.mark_changed();
        }
    }
}

/// Recurrence arithmetic plus astronomical resolution plus minute
/// rounding: the full path from a nominal target to the next fire
/// instant.
fn compute_next_target(
    solar: &SolarClock,
    rule: &RecurrenceRule,
    kind: EventKind,
    astro_offset: &AstroOffset,
    target: DateTime<Local>,
    now: DateTime<Local>,
) -> Result<DateTime<Local>> {
    let mut next = next_fire(target, now, rule)?;

    if kind == EventKind::Astronomical {
        next = resolve_astronomical(solar, astro_offset, next, now);
    }

    Ok(round_to_minute(next))
}

/// Pin the nominal date to its solar instant plus offset, walking forward
/// day by day until the offset result clears the re-fire guard.
fn resolve_astronomical(
    solar: &SolarClock,
    astro_offset: &AstroOffset,
    nominal: DateTime<Local>,
    now: DateTime<Local>,
) -> DateTime<Local> {
    let earliest = now + Duration::minutes(1);
    let mut date = nominal;

    for _ in 0..MAX_ASTRO_SEARCH {
        let instant = solar.solar_time(astro_offset.kind, date, true)
            + Duration::minutes(astro_offset.minutes as i64);
        if instant > earliest {
            return instant;
        }
        date = resolve_local(date.naive_local() + Duration::days(1));
    }

    warn!(
        "no future {} instant found for offset {}",
        astro_offset.kind.as_str(),
        astro_offset.minutes
    );
    now
}

pub(crate) fn normalize_actions(actions: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(actions.len());
    for action in actions {
        let trimmed = action.trim();
        if !trimmed.is_empty() && !normalized.iter().any(|a| a == trimmed) {
            normalized.push(trimmed.to_string());
        }
    }
    normalized
}
