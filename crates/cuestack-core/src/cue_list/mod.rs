//! The cue list: owner of all cues, the scheduler thread and the audio mix.
//!
//! All mutable state sits behind one mutex. Every caller (scheduler, audio
//! callback, OSC endpoint, triggers, the embedding application) goes through
//! a [`CueListGuard`], which holds the lock for its lifetime and binds every
//! cue action to the list's own clock.
//!
//! ```text
//! CueList ──owns──▶ Arc<CueListInner> ◀──upgrade── CueListHandle (Weak)
//!                        │
//!                        ├── Mutex<CueListState>   cues, ring buffers, levels
//!                        ├── Clock                 shared timeline
//!                        └── kill flag             scheduler shutdown
//! ```

mod mixer;
mod ring_buffer;
mod scheduler;
mod state;

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

pub use mixer::{ChannelLevel, RmsData};
pub use ring_buffer::{RingBuffer, DEFAULT_CAPACITY};
pub use state::CueListState;

use crate::config::EngineConfig;
use crate::cue::{CueAction, CueId, CueUid};
use crate::error::{Error, Result};
use crate::midi::MidiEventSource;
use crate::timing::{Clock, ClockTime};
use crate::trigger::{Trigger, TriggerEnv, TriggerSpec};

/// Construction parameters of a cue list.
#[derive(Clone, Debug, PartialEq)]
pub struct CueListConfig {
    pub channels: usize,
    pub sample_rate: u32,
    pub ring_capacity: usize,
    pub pulse_interval: Duration,
    pub trigger_poll: Duration,
}

impl Default for CueListConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 44_100,
            ring_capacity: DEFAULT_CAPACITY,
            pulse_interval: Duration::from_millis(1),
            trigger_poll: Duration::from_millis(250),
        }
    }
}

impl From<&EngineConfig> for CueListConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            channels: config.audio.channels,
            sample_rate: config.audio.sample_rate,
            ring_capacity: config.audio.ring_capacity,
            pulse_interval: Duration::from_millis(config.scheduler.pulse_interval_ms),
            trigger_poll: Duration::from_millis(config.triggers.time_poll_ms),
        }
    }
}

struct CueListInner {
    state: Mutex<CueListState>,
    clock: Clock,
    kill: AtomicBool,
    config: CueListConfig,
    /// Triggers removed with their cues, signalled and waiting to be joined
    /// outside the state lock.
    retired: Mutex<Vec<Trigger>>,
}

impl CueListInner {
    fn lock_state(&self) -> MutexGuard<'_, CueListState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            log::error!("Cue list lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Join retired trigger watchers. Must not be called with the state lock held.
    fn reap(&self) {
        let retired = {
            let mut retired = self.retired.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::take(&mut *retired)
        };
        if !retired.is_empty() {
            log::debug!("Joining {} retired trigger(s)", retired.len());
        }
        drop(retired);
    }
}

/// A cue list with its own clock and (optionally) a scheduler thread.
pub struct CueList {
    inner: Arc<CueListInner>,
    scheduler: Option<JoinHandle<()>>,
}

impl CueList {
    /// Create a cue list and start its scheduler thread.
    pub fn new(config: CueListConfig) -> Result<Self> {
        let mut list = Self::without_scheduler(config);
        let interval = list.inner.config.pulse_interval;
        let handle = scheduler::spawn(list.inner.clone(), interval)
            .map_err(|e| Error::Config(format!("failed to spawn scheduler thread: {}", e)))?;
        list.scheduler = Some(handle);
        Ok(list)
    }

    /// Create a cue list that is only pulsed when the caller says so.
    pub fn without_scheduler(config: CueListConfig) -> Self {
        let state = CueListState::new(&config);
        Self {
            inner: Arc::new(CueListInner {
                state: Mutex::new(state),
                clock: Clock::new(),
                kill: AtomicBool::new(false),
                config,
                retired: Mutex::new(Vec::new()),
            }),
            scheduler: None,
        }
    }

    /// Acquire the list lock.
    pub fn lock(&self) -> CueListGuard<'_> {
        CueListGuard::new(&self.inner)
    }

    /// A weak handle for other threads.
    pub fn handle(&self) -> CueListHandle {
        CueListHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &CueListConfig {
        &self.inner.config
    }

    pub fn now(&self) -> ClockTime {
        self.inner.clock.now()
    }

    pub fn has_scheduler(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Event source used by MIDI triggers added after this call.
    pub fn set_midi_source(&self, source: Arc<dyn MidiEventSource>) {
        self.inner.lock_state().midi_source = Some(source);
    }

    /// Join trigger watchers of removed cues.
    pub fn reap(&self) {
        self.inner.reap();
    }

    /// Stop the scheduler, then every trigger watcher.
    pub fn shutdown(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        self.inner.kill.store(true, Ordering::Relaxed);
        if let Some(handle) = self.scheduler.take() {
            if handle.join().is_err() {
                log::error!("Scheduler thread panicked");
            }
        }
        let triggers = self.inner.lock_state().take_all_triggers();
        for trigger in &triggers {
            trigger.signal();
        }
        drop(triggers);
        self.inner.reap();
    }
}

impl Drop for CueList {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

/// Weak reference to a cue list, for threads that must not keep it alive.
#[derive(Clone)]
pub struct CueListHandle {
    inner: Weak<CueListInner>,
}

impl CueListHandle {
    /// Run `f` with the list locked. Returns None once the list is gone.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut CueListGuard<'_>) -> R) -> Option<R> {
        let inner = self.inner.upgrade()?;
        if inner.kill.load(Ordering::Relaxed) {
            return None;
        }
        let mut guard = CueListGuard::new(&inner);
        Some(f(&mut guard))
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

/// Scoped lock on a cue list. Releases on drop, on every exit path.
pub struct CueListGuard<'a> {
    state: MutexGuard<'a, CueListState>,
    inner: &'a Arc<CueListInner>,
}

impl<'a> CueListGuard<'a> {
    fn new(inner: &'a Arc<CueListInner>) -> Self {
        Self {
            state: inner.lock_state(),
            inner,
        }
    }

    /// Current time on the list clock.
    pub fn now(&self) -> ClockTime {
        self.inner.clock.now()
    }

    pub fn handle(&self) -> CueListHandle {
        CueListHandle {
            inner: Arc::downgrade(self.inner),
        }
    }

    pub fn perform(&mut self, uid: CueUid, action: CueAction) -> bool {
        let now = self.now();
        self.state.perform(uid, action, now)
    }

    pub fn play(&mut self, uid: CueUid) -> bool {
        self.perform(uid, CueAction::Play)
    }

    pub fn pause(&mut self, uid: CueUid) -> bool {
        self.perform(uid, CueAction::Pause)
    }

    pub fn stop(&mut self, uid: CueUid) -> bool {
        self.perform(uid, CueAction::Stop)
    }

    /// Perform an action on the cue with display id `id`.
    pub fn perform_by_id(&mut self, id: CueId, action: CueAction) -> bool {
        match self.state.find_by_id(id) {
            Some(uid) => self.perform(uid, action),
            None => {
                log::warn!("No cue with id {}", id);
                false
            }
        }
    }

    pub fn stop_all(&mut self) {
        let now = self.now();
        self.state.stop_all(now);
    }

    /// Pulse every playing cue at the current clock time.
    pub fn pulse(&mut self) {
        let now = self.now();
        self.state.pulse_all(now);
    }

    pub fn go(&mut self) -> bool {
        let now = self.now();
        self.state.go(now)
    }

    pub fn remove(&mut self, uid: CueUid) -> bool {
        let now = self.now();
        self.state.remove(uid, now)
    }

    pub fn clear(&mut self) {
        let now = self.now();
        self.state.clear(now);
    }

    pub fn dispatch_key(&mut self, key: &str) -> usize {
        let now = self.now();
        self.state.dispatch_key(key, now)
    }

    pub fn populate_buffers(&mut self, frames: usize) {
        let now = self.now();
        self.state.populate_buffers(frames, now);
    }

    /// Pull interleaved audio for a device callback. See [`CueListState::get_audio`].
    pub fn get_audio(&mut self, out: &mut [f32], samples: usize, channels: &[usize]) -> usize {
        let now = self.now();
        self.state.get_audio(out, samples, channels, now)
    }

    pub fn render_offline(&mut self, frames: usize) -> Vec<Vec<f32>> {
        let now = self.now();
        self.state.render_offline(frames, now)
    }

    /// Attach a trigger to a cue and start its watcher.
    pub fn add_trigger(&mut self, uid: CueUid, spec: TriggerSpec) -> bool {
        if !self.state.contains(uid) {
            log::error!("Cannot add trigger to unknown cue {}", uid);
            return false;
        }
        let env = TriggerEnv {
            midi_source: self.state.midi_source.clone(),
            time_poll: self.inner.config.trigger_poll,
        };
        let trigger = Trigger::start(spec, uid, self.handle(), &env);
        match self.state.cue_mut(uid) {
            Some(cue) => {
                cue.triggers.push(trigger);
                true
            }
            None => false,
        }
    }

    /// Detach and retire the trigger at `index` of a cue.
    pub fn remove_trigger(&mut self, uid: CueUid, index: usize) -> bool {
        let Some(cue) = self.state.cue_mut(uid) else {
            return false;
        };
        if index >= cue.triggers.len() {
            return false;
        }
        let trigger = cue.triggers.remove(index);
        trigger.signal();
        self.state.retired_triggers.push(trigger);
        true
    }
}

impl Deref for CueListGuard<'_> {
    type Target = CueListState;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl DerefMut for CueListGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}

impl Drop for CueListGuard<'_> {
    fn drop(&mut self) {
        // Watchers are joined by the scheduler, `CueList::reap` or shutdown, never under this lock.
        if self.state.retired_triggers.is_empty() {
            return;
        }
        let retired = std::mem::take(&mut self.state.retired_triggers);
        for trigger in &retired {
            trigger.signal();
        }
        self.inner
            .retired
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(retired);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue::{CueState, PostTrigger};
    use crate::property::{PropertyValue, PropertyVersion};
    use crate::timing::{millis, seconds};

    fn list() -> CueList {
        CueList::without_scheduler(CueListConfig::default())
    }

    fn timed(state: &mut CueListState, class: &str, action: ClockTime, trigger: PostTrigger) -> CueUid {
        let uid = state.append(class).unwrap();
        state
            .cue_mut(uid)
            .unwrap()
            .core
            .set_timing(0, action, 0, trigger);
        uid
    }

    #[test]
    fn test_append_assigns_whole_ids() {
        let list = list();
        let mut guard = list.lock();
        let a = guard.append("Cue").unwrap();
        let b = guard.append("Cue").unwrap();
        assert_eq!(guard.cue(a).unwrap().core.id, CueId(1000));
        assert_eq!(guard.cue(b).unwrap().core.id, CueId(2000));
        guard.cue_mut(b).unwrap().core.id = CueId(2500);
        let c = guard.append("Cue").unwrap();
        assert_eq!(guard.cue(c).unwrap().core.id, CueId(3000));
        assert!(guard.append("NoSuchCue").is_none());
    }

    #[test]
    fn test_child_ids_stay_below_next_whole_id() {
        let list = list();
        let mut guard = list.lock();
        let group = guard.append("GroupCue").unwrap();
        guard.cue_mut(group).unwrap().core.id = CueId(1998);
        let child = guard.append_child(group, "Cue").unwrap();
        assert_eq!(guard.cue(child).unwrap().core.id, CueId(1999));
        assert!(guard.append_child(group, "Cue").is_none());
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn test_post_wait_chains_to_next_sibling() {
        let list = list();
        let mut guard = list.lock();
        let state = &mut *guard;
        let first = timed(state, "Cue", seconds(1.0), PostTrigger::AfterAction);
        let second = timed(state, "Cue", seconds(5.0), PostTrigger::None);

        assert!(state.perform(first, CueAction::Play, 0));
        for ms in 0..=1000 {
            state.pulse_all(millis(ms));
        }
        assert_eq!(state.cue(first).unwrap().state(), CueState::Stopped);
        assert_eq!(state.cue(second).unwrap().state(), CueState::PlayingAction);
        // Further pulses never replay the second cue.
        for ms in 1001..1100 {
            state.pulse_all(millis(ms));
        }
        assert_eq!(state.cue(second).unwrap().core.running_times(millis(1100)).action, millis(100));
    }

    #[test]
    fn test_group_plays_children_and_finishes() {
        let list = list();
        let mut guard = list.lock();
        let state = &mut *guard;
        let group = state.append("GroupCue").unwrap();
        let a = state.append_child(group, "Cue").unwrap();
        let b = state.append_child(group, "Cue").unwrap();
        state.cue_mut(a).unwrap().core.set_timing(0, millis(10), 0, PostTrigger::None);
        state.cue_mut(b).unwrap().core.set_timing(0, millis(20), 0, PostTrigger::None);
        assert_eq!(state.cue(a).unwrap().core.id, CueId(1001));

        assert!(state.perform(group, CueAction::Play, 0));
        state.pulse_all(0);
        assert!(state.cue(a).unwrap().state().is_playing());
        assert!(state.cue(b).unwrap().state().is_playing());

        for ms in 1..=30 {
            state.pulse_all(millis(ms));
        }
        assert_eq!(state.cue(b).unwrap().state(), CueState::Stopped);
        assert_eq!(state.cue(group).unwrap().state(), CueState::Stopped);
    }

    #[test]
    fn test_group_stop_and_pause_propagate() {
        let list = list();
        let mut guard = list.lock();
        let state = &mut *guard;
        let group = state.append("GroupCue").unwrap();
        let child = state.append_child(group, "Cue").unwrap();
        state.cue_mut(child).unwrap().core.set_timing(0, -1, 0, PostTrigger::None);
        state.perform(group, CueAction::Play, 0);
        state.pulse_all(0);

        assert!(state.perform(group, CueAction::Pause, millis(5)));
        assert_eq!(state.cue(child).unwrap().state(), CueState::Paused);
        assert!(state.perform(group, CueAction::Play, millis(10)));
        assert!(state.cue(child).unwrap().state().is_playing());

        state.perform(group, CueAction::Stop, millis(20));
        assert_eq!(state.cue(child).unwrap().state(), CueState::Stopped);
    }

    #[test]
    fn test_remove_releases_children_and_adjusts_cursor() {
        let list = list();
        let mut guard = list.lock();
        let a = guard.append("Cue").unwrap();
        let group = guard.append("GroupCue").unwrap();
        guard.append_child(group, "Cue").unwrap();
        assert_eq!(guard.len(), 3);

        guard.goto(CueId(2000));
        assert_eq!(guard.cursor(), Some(group));
        assert!(guard.remove(a));
        assert_eq!(guard.cursor(), Some(group));
        assert!(guard.remove(group));
        assert!(guard.is_empty());
        assert!(!guard.remove(group));
    }

    #[test]
    fn test_cursor_navigation() {
        let list = list();
        let mut guard = list.lock();
        let a = guard.append("Cue").unwrap();
        let b = guard.append("Cue").unwrap();
        assert_eq!(guard.cursor(), Some(a));
        assert_eq!(guard.next(), Some(b));
        assert_eq!(guard.next(), None);
        assert_eq!(guard.previous(), Some(b));
        assert_eq!(guard.previous(), Some(a));
        assert_eq!(guard.previous(), Some(a));

        guard.cue_mut(a).unwrap().core.set_timing(0, -1, 0, PostTrigger::None);
        assert!(guard.go());
        assert_eq!(guard.cue(a).unwrap().state(), CueState::PlayingAction);
        assert_eq!(guard.cursor(), Some(b));
        assert!(!guard.goto(CueId(9000)));
    }

    #[test]
    fn test_move_cue() {
        let list = list();
        let mut guard = list.lock();
        let a = guard.append("Cue").unwrap();
        let b = guard.append("Cue").unwrap();
        let c = guard.append("Cue").unwrap();
        assert!(guard.move_cue(c, 0));
        assert_eq!(guard.top_level(), &[c, a, b]);
        assert!(guard.move_cue(c, 99));
        assert_eq!(guard.top_level(), &[a, b, c]);
        assert_eq!(guard.next_sibling(a), Some(b));
        assert_eq!(guard.next_sibling(c), None);
    }

    #[test]
    fn test_set_property_clears_error() {
        let list = list();
        let mut guard = list.lock();
        let action = guard.append("ActionCue").unwrap();
        let target = guard.append("Cue").unwrap();
        assert_eq!(guard.cue(action).unwrap().state(), CueState::Error);

        assert!(guard.set_property(action, "target", PropertyVersion::Defined, PropertyValue::UInt64(target.0)));
        assert_eq!(guard.cue(action).unwrap().state(), CueState::Stopped);
        assert!(!guard.set_property(action, "target", PropertyVersion::Live, PropertyValue::UInt64(1)));
        assert!(!guard.set_property(action, "target", PropertyVersion::Defined, PropertyValue::Double(1.0)));

        assert!(guard.set_property_null(action, "target", true));
        assert_eq!(guard.cue(action).unwrap().state(), CueState::Error);
    }

    #[test]
    fn test_action_cue_stops_target() {
        let list = list();
        let mut guard = list.lock();
        let state = &mut *guard;
        let target = timed(state, "Cue", -1, PostTrigger::None);
        let action = state.append("ActionCue").unwrap();
        let v = PropertyVersion::Defined;
        state.set_property(action, "target", v, PropertyValue::UInt64(target.0));
        state.set_property(action, "action", v, PropertyValue::Int32(CueAction::Stop.as_i32()));

        state.perform(target, CueAction::Play, 0);
        state.perform(action, CueAction::Play, millis(1));
        state.pulse_all(millis(1));
        assert_eq!(state.cue(target).unwrap().state(), CueState::Stopped);
        assert_eq!(state.cue(action).unwrap().state(), CueState::Stopped);
    }

    #[test]
    fn test_fade_ramps_live_volume_and_stops_target() {
        let list = list();
        let mut guard = list.lock();
        let state = &mut *guard;
        let signal = timed(state, "SignalCue", -1, PostTrigger::None);
        let fade = timed(state, "FadeCue", millis(100), PostTrigger::None);
        let v = PropertyVersion::Defined;
        state.set_property(fade, "target", v, PropertyValue::UInt64(signal.0));
        state.set_property(fade, "stop_target", v, PropertyValue::Bool(true));

        state.perform(signal, CueAction::Play, 0);
        state.perform(fade, CueAction::Play, 0);
        state.pulse_all(millis(50));
        let volume: f64 = state
            .cue(signal)
            .unwrap()
            .core
            .properties
            .get("play_volume", PropertyVersion::Live)
            .unwrap();
        assert!((volume - 0.5).abs() < 1e-9);
        // Defined value is untouched by the fade.
        let defined: f64 = state.cue(signal).unwrap().core.properties.get("play_volume", v).unwrap();
        assert_eq!(defined, 1.0);

        state.pulse_all(millis(100));
        assert_eq!(state.cue(fade).unwrap().state(), CueState::Stopped);
        assert_eq!(state.cue(signal).unwrap().state(), CueState::Stopped);
    }

    #[test]
    fn test_set_channels_resizes_together() {
        let list = list();
        let mut guard = list.lock();
        guard.set_channels(6);
        assert_eq!(guard.channels(), 6);
        assert_eq!(guard.master_rms().channels().len(), 6);
        assert_eq!(guard.render_offline(16).len(), 6);
    }

    #[test]
    fn test_scheduler_thread_pulses() {
        let list = CueList::new(CueListConfig::default()).unwrap();
        let uid = {
            let mut guard = list.lock();
            let uid = guard.append("Cue").unwrap();
            guard.cue_mut(uid).unwrap().core.set_timing(0, millis(20), 0, PostTrigger::None);
            assert!(guard.play(uid));
            uid
        };
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(list.lock().cue(uid).unwrap().state(), CueState::Stopped);
        list.shutdown();
    }

    #[test]
    fn test_scheduler_joins_retired_watchers() {
        use crate::trigger::TimeTrigger;

        let list = CueList::new(CueListConfig {
            trigger_poll: Duration::from_millis(10),
            ..CueListConfig::default()
        })
        .unwrap();
        {
            let mut guard = list.lock();
            let uid = guard.append("Cue").unwrap();
            let spec = TriggerSpec::Time(TimeTrigger {
                date: None,
                time: chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                repeat_secs: 60,
                action: CueAction::Play,
            });
            assert!(guard.add_trigger(uid, spec));
            assert!(guard.cue(uid).unwrap().triggers[0].is_watching());
            assert!(guard.remove(uid));
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !list.inner.retired.lock().unwrap().is_empty() {
            assert!(std::time::Instant::now() < deadline, "retired watcher never joined");
            std::thread::sleep(Duration::from_millis(5));
        }
        list.shutdown();
    }

    #[test]
    fn test_handle_is_dead_after_drop() {
        let list = list();
        let handle = list.handle();
        assert_eq!(handle.with_lock(|l| l.len()), Some(0));
        drop(list);
        assert!(!handle.is_alive());
        assert!(handle.with_lock(|l| l.len()).is_none());
    }
}
