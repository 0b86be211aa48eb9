//! Timed and triggered actions.
//!
//! Provides:
//! - interval timers (every N seconds, optionally N times)
//! - daily timers (wall-clock time, sunrise or sunset)
//! - trigger timers (a matching device event arms a one-shot delay)
//!
//! Every timer lives in one [`Scheduler`] and can be cancelled by its
//! [`TimerId`]. Timer tasks hold a weak engine handle and stop once the
//! engine is gone.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use insteon_gateway::scheduler::{Action, DailyTime, Scheduler};
//!
//! let scheduler = Scheduler::new(modem.clone());
//! scheduler.add_daily("sunset".parse::<DailyTime>()?, Some(porch), Action::SetLevel(200))?;
//! scheduler.add_interval(Duration::from_secs(600), Action::Refresh, Some(hall), None)?;
//! ```

mod action;
mod schedule;
mod solar;

pub use action::{first_refresh_target, next_refresh_target, Action, ActionCallback};
pub use schedule::{DailyTime, Schedule, DAY};
pub use solar::{next_solar_event, sun_times, Location};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

use crate::address::{Address, DeviceRef};
use crate::dispatcher::{DeviceEvent, ListenerFilter, ListenerId};
use crate::error::{InsteonError, Result};
use crate::modem::{Modem, WeakModem};

/// Handle of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

enum TimerEntry {
    /// An interval or daily task.
    Task(JoinHandle<()>),
    /// A listener plus the delays it has armed.
    Trigger {
        listener: ListenerId,
        armed: Arc<Mutex<Vec<JoinHandle<()>>>>,
    },
}

type TimerMap = Arc<Mutex<HashMap<TimerId, TimerEntry>>>;

/// The engine's cancellable timer collection.
pub struct Scheduler {
    modem: Modem,
    timers: TimerMap,
    next_id: AtomicU64,
    location: Option<Location>,
}

impl Scheduler {
    pub fn new(modem: Modem) -> Self {
        Self {
            modem,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            location: None,
        }
    }

    /// Set the location used for sunrise and sunset timers.
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    /// Run `action` every `interval`, `count` times (forever when `None`).
    pub fn add_interval(
        &self,
        interval: Duration,
        action: Action,
        address: Option<Address>,
        count: Option<u32>,
    ) -> Result<TimerId> {
        check_target(&action, address)?;
        let schedule = Schedule::interval(interval, count)?;
        let id = self.next_id();
        tracing::info!(
            "{}: {} on {:?} every {:?} ({:?} times)",
            id,
            action,
            address,
            interval,
            count
        );
        self.spawn_repeating(id, interval, schedule, action, address);
        Ok(id)
    }

    /// Run `action` every day at `time`.
    pub fn add_daily(
        &self,
        time: DailyTime,
        address: Option<Address>,
        action: Action,
    ) -> Result<TimerId> {
        check_target(&action, address)?;
        let first = time.delay_from(chrono::Local::now(), self.location)?;
        let id = self.next_id();
        tracing::info!("{}: {} on {:?} daily at {} (first in {:?})", id, action, address, time, first);
        self.spawn_repeating(id, first, Schedule::daily(), action, address);
        Ok(id)
    }

    /// Run `action` `delay` after `source` sends `command`.
    ///
    /// The button of `source`, if any, must match too. The action applies to
    /// `target`, or to the source device when `None`.
    pub fn add_trigger(
        &self,
        source: DeviceRef,
        command: u8,
        action: Action,
        delay: Duration,
        target: Option<Address>,
    ) -> Result<TimerId> {
        let target = target.or(Some(source.address));
        check_target(&action, target)?;

        let mut filter = ListenerFilter::new().source(source.address).command(command);
        if let Some(button) = source.button {
            filter = filter.button(button);
        }

        let id = self.next_id();
        let armed: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let weak = self.modem.downgrade();
        let runtime = Handle::try_current()
            .map_err(|e| InsteonError::ChannelUnavailable(e.to_string()))?;
        let armed_by_listener = armed.clone();

        let listener = self.modem.register_listener(Some(filter), move |event| {
            tracing::debug!("{} triggered by {}", id, event.frame);
            let handle = runtime.spawn(run_delayed(
                weak.clone(),
                delay,
                action.clone(),
                target,
                event.clone(),
            ));
            if let Ok(mut armed) = armed_by_listener.lock() {
                armed.retain(|h| !h.is_finished());
                armed.push(handle);
            }
        });

        tracing::info!(
            "{}: trigger on {} cmd {:02X} after {:?}",
            id,
            source,
            command,
            delay
        );
        self.insert(id, TimerEntry::Trigger { listener, armed });
        Ok(id)
    }

    /// Refresh every dimmable device in turn, one every `period`.
    pub fn start_auto_update(&self, period: Duration) -> Result<TimerId> {
        let first = first_refresh_target(self.modem.registry().as_ref()).ok_or_else(|| {
            InsteonError::InvalidParameter("No dimmer or switch in the device registry".into())
        })?;
        self.add_interval(period, Action::RefreshAndAdvance, Some(first), None)
    }

    /// Cancel a timer. Returns false if it does not exist (or already ended).
    pub fn cancel(&self, id: TimerId) -> bool {
        let entry = self.timers.lock().ok().and_then(|mut t| t.remove(&id));
        match entry {
            Some(entry) => {
                self.stop(entry);
                tracing::info!("{} cancelled", id);
                true
            }
            None => false,
        }
    }

    /// Ids of live timers.
    pub fn ids(&self) -> Vec<TimerId> {
        let mut ids: Vec<TimerId> = self
            .timers
            .lock()
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every timer.
    pub fn shutdown(&self) {
        let entries: Vec<TimerEntry> = self
            .timers
            .lock()
            .map(|mut t| t.drain().map(|(_, e)| e).collect())
            .unwrap_or_default();
        let n = entries.len();
        for entry in entries {
            self.stop(entry);
        }
        tracing::debug!("Scheduler stopped {} timers", n);
    }

    fn next_id(&self) -> TimerId {
        TimerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, id: TimerId, entry: TimerEntry) {
        match self.timers.lock() {
            Ok(mut timers) => {
                timers.insert(id, entry);
            }
            Err(_) => self.stop(entry),
        }
    }

    fn stop(&self, entry: TimerEntry) {
        match entry {
            TimerEntry::Task(handle) => handle.abort(),
            TimerEntry::Trigger { listener, armed } => {
                self.modem.unregister_listener(listener);
                if let Ok(mut armed) = armed.lock() {
                    for handle in armed.drain(..) {
                        handle.abort();
                    }
                }
            }
        }
    }

    fn spawn_repeating(
        &self,
        id: TimerId,
        first: Duration,
        schedule: Schedule,
        action: Action,
        target: Option<Address>,
    ) {
        // Locked across the spawn: the task removes its own entry when done.
        let Ok(mut timers) = self.timers.lock() else {
            return;
        };
        let handle = tokio::spawn(run_repeating(
            id,
            self.modem.downgrade(),
            self.timers.clone(),
            Instant::now() + first,
            schedule,
            action,
            target,
        ));
        timers.insert(id, TimerEntry::Task(handle));
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn check_target(action: &Action, target: Option<Address>) -> Result<()> {
    if action.needs_target() && target.is_none() {
        return Err(InsteonError::InvalidParameter(format!(
            "Action '{}' needs a device address",
            action
        )));
    }
    Ok(())
}

async fn run_repeating(
    id: TimerId,
    weak: WeakModem,
    timers: TimerMap,
    mut deadline: Instant,
    mut schedule: Schedule,
    action: Action,
    mut target: Option<Address>,
) {
    loop {
        sleep_until(deadline).await;
        let next = schedule.fire(deadline);

        let Some(modem) = weak.upgrade() else {
            break;
        };
        tracing::debug!("{} fired ({}): {}", id, schedule.fired(), action);
        if let Err(e) = action.run(&modem, &mut target, None).await {
            tracing::warn!("{} action {} failed: {}", id, action, e);
        }
        drop(modem);

        match next {
            Some(next) => deadline = next,
            None => break,
        }
    }
    if let Ok(mut timers) = timers.lock() {
        timers.remove(&id);
    }
    tracing::debug!("{} finished", id);
}

async fn run_delayed(
    weak: WeakModem,
    delay: Duration,
    action: Action,
    mut target: Option<Address>,
    event: DeviceEvent,
) {
    sleep(delay).await;
    let Some(modem) = weak.upgrade() else {
        return;
    };
    if let Err(e) = action.run(&modem, &mut target, Some(&event)).await {
        tracing::warn!("Triggered {} failed: {}", action, e);
    }
}
