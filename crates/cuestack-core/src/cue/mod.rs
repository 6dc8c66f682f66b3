//! Cues and the per-cue timing state machine.
//!
//! A [`Cue`] pairs a [`CueCore`] (identity, properties, timing state) with a
//! [`CueKind`] implementation that supplies class-specific behaviour. The core
//! owns every state transition; kinds only observe them through hooks.
//!
//! # Phases
//!
//! ```text
//! Stopped ──play──▶ PlayingPre ──▶ PlayingAction ──▶ PlayingPost ──▶ Stopped
//!                        │               │                │
//!                        └────pause──────┴──────▶ Paused ─┘ (play resumes)
//! ```

mod kind;
pub mod kinds;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::property::{Property, PropertyStore, PropertyValue, PropertyVersion};
use crate::timing::{self, ClockTime};
use crate::trigger::Trigger;

pub use kind::{AudioRequest, CueClassRegistry, CueConstructor, CueContext, CueKind};

/// Class section name of the base cue properties.
pub const BASE_CLASS: &str = "Cue";

/// Process-unique cue identifier. Never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CueUid(pub u64);

impl fmt::Display for CueUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Registry of issued UIDs. A UID is never handed out twice while registered.
#[derive(Debug, Default)]
pub struct UidRegistry {
    issued: HashSet<CueUid>,
}

impl UidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh random UID and register it.
    pub fn generate(&mut self) -> CueUid {
        let mut rng = rand::rng();
        loop {
            let candidate = CueUid(rng.random::<u64>());
            if candidate.0 != 0 && self.issued.insert(candidate) {
                return candidate;
            }
        }
    }

    pub fn contains(&self, uid: CueUid) -> bool {
        self.issued.contains(&uid)
    }

    /// Release a UID. Logs if it was never issued.
    pub fn release(&mut self, uid: CueUid) {
        if !self.issued.remove(&uid) {
            log::error!("Releasing unknown cue UID {}", uid);
        }
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

/// Display and sort-order id, stored in thousandths (`1.250` is 1250).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CueId(pub u32);

impl CueId {
    /// Parse a dotted id such as `"1"`, `"1.5"` or `"1.250"`.
    ///
    /// The fractional part is read as decimal digits, so `"1.5"` is `1.500`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (major, minor) = match text.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (text, ""),
        };
        let major: u32 = major.parse().ok()?;
        if minor.len() > 3 || !minor.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let minor = if minor.is_empty() {
            0
        } else {
            let digits: u32 = minor.parse().ok()?;
            digits * 10u32.pow(3 - minor.len() as u32)
        };
        major.checked_mul(1000)?.checked_add(minor).map(CueId)
    }

    pub fn major(self) -> u32 {
        self.0 / 1000
    }

    pub fn minor(self) -> u32 {
        self.0 % 1000
    }

    /// The next whole-number id after this one, or None past the largest id.
    pub fn next_whole(self) -> Option<Self> {
        self.major().checked_add(1)?.checked_mul(1000).map(CueId)
    }
}

impl fmt::Display for CueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.major(), self.minor())
    }
}

impl FromStr for CueId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CueId::parse(s).ok_or_else(|| format!("invalid cue id '{}'", s))
    }
}

/// Lifecycle state of a cue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CueState {
    Error,
    Stopped,
    Paused,
    Prepared,
    PlayingPre,
    PlayingAction,
    PlayingPost,
}

impl CueState {
    pub fn is_playing(self) -> bool {
        matches!(self, Self::PlayingPre | Self::PlayingAction | Self::PlayingPost)
    }

    /// Playing or paused: the cue has a live timeline.
    pub fn is_running(self) -> bool {
        self.is_playing() || self == Self::Paused
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Prepared => "prepared",
            Self::PlayingPre => "pre-wait",
            Self::PlayingAction => "playing",
            Self::PlayingPost => "post-wait",
        }
    }
}

impl fmt::Display for CueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// When the post-wait starts counting, and therefore when the next cue is played.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PostTrigger {
    #[default]
    None,
    Immediate,
    AfterPre,
    AfterAction,
}

impl PostTrigger {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::Immediate,
            2 => Self::AfterPre,
            3 => Self::AfterAction,
            _ => Self::None,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Immediate => 1,
            Self::AfterPre => 2,
            Self::AfterAction => 3,
        }
    }
}

/// An action that can be performed on a cue from any control surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CueAction {
    Play,
    Pause,
    Stop,
}

impl CueAction {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Play),
            1 => Some(Self::Pause),
            2 => Some(Self::Stop),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Self::Play => 0,
            Self::Pause => 1,
            Self::Stop => 2,
        }
    }
}

impl fmt::Display for CueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
        })
    }
}

/// Progress through each phase of a running cue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunningTimes {
    pub pre: ClockTime,
    pub action: ClockTime,
    pub post: ClockTime,
    /// Total time spent paused.
    pub paused: ClockTime,
    /// Cue time elapsed, excluding pauses.
    pub real: ClockTime,
    /// Wall time since the cue started, including pauses.
    pub total: ClockTime,
}

/// What happened during one [`CueCore::pulse`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PulseOutcome {
    /// The post-wait elapsed on this pulse; the next cue should be played.
    pub post_wait_fired: bool,
    /// The cue stopped itself on this pulse.
    pub stopped: bool,
}

/// Snapshot of the live timing properties.
#[derive(Clone, Copy, Debug)]
struct Timing {
    pre: ClockTime,
    action: ClockTime,
    post: ClockTime,
    trigger: PostTrigger,
}

impl Timing {
    fn action_is_infinite(&self) -> bool {
        self.action < 0
    }

    /// Cue time at which the post-wait starts counting.
    fn post_start(&self) -> Option<ClockTime> {
        match self.trigger {
            PostTrigger::None => None,
            PostTrigger::Immediate => Some(0),
            PostTrigger::AfterPre => Some(self.pre),
            PostTrigger::AfterAction if self.action_is_infinite() => None,
            PostTrigger::AfterAction => Some(self.pre.saturating_add(self.action)),
        }
    }
}

const TIMING_PROPERTIES: [&str; 4] = ["pre_time", "action_time", "post_time", "post_trigger"];

/// Identity, properties and timing state shared by every cue class.
#[derive(Debug)]
pub struct CueCore {
    uid: CueUid,
    pub id: CueId,
    pub properties: PropertyStore,
    state: CueState,
    parent: Option<CueUid>,
    start_time: ClockTime,
    pause_time: ClockTime,
    paused_time: ClockTime,
    pause_paused_time: ClockTime,
    post_has_run: bool,
}

impl CueCore {
    pub fn new(uid: CueUid, id: CueId) -> Self {
        let mut properties = PropertyStore::new();
        properties.add(Property::new("name", BASE_CLASS, PropertyValue::String(String::new())));
        properties.add(Property::new("notes", BASE_CLASS, PropertyValue::String(String::new())));
        properties.add(Property::new("pre_time", BASE_CLASS, PropertyValue::Int64(0)));
        properties.add(Property::new("action_time", BASE_CLASS, PropertyValue::Int64(0)));
        properties.add(Property::new("post_time", BASE_CLASS, PropertyValue::Int64(0)));
        properties.add(Property::new("post_trigger", BASE_CLASS, PropertyValue::Int32(0)));
        Self {
            uid,
            id,
            properties,
            state: CueState::Stopped,
            parent: None,
            start_time: 0,
            pause_time: 0,
            paused_time: 0,
            pause_paused_time: 0,
            post_has_run: false,
        }
    }

    pub fn uid(&self) -> CueUid {
        self.uid
    }

    pub fn state(&self) -> CueState {
        self.state
    }

    pub fn parent(&self) -> Option<CueUid> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<CueUid>) {
        self.parent = parent;
    }

    pub fn name(&self) -> String {
        self.properties
            .get_or("name", PropertyVersion::Defined, String::new())
    }

    /// Convenience setter for the defined timing of a cue.
    pub fn set_timing(&mut self, pre: ClockTime, action: ClockTime, post: ClockTime, trigger: PostTrigger) {
        let v = PropertyVersion::Defined;
        self.properties.set("pre_time", v, pre);
        self.properties.set("action_time", v, action);
        self.properties.set("post_time", v, post);
        self.properties.set("post_trigger", v, trigger.as_i32());
    }

    fn timing(&self, version: PropertyVersion) -> Timing {
        Timing {
            pre: self.properties.get_or("pre_time", version, 0i64).max(0),
            action: self.properties.get_or("action_time", version, 0i64),
            post: self.properties.get_or("post_time", version, 0i64).max(0),
            trigger: PostTrigger::from_i32(self.properties.get_or("post_trigger", version, 0i32)),
        }
    }

    /// Cue time elapsed since start, excluding time spent paused.
    fn elapsed(&self, now: ClockTime) -> ClockTime {
        let clock = if self.state == CueState::Paused {
            self.pause_time
        } else {
            now
        };
        (clock - self.start_time - self.paused_time).max(0)
    }

    /// Start or resume playback.
    ///
    /// Returns false unless the cue is stopped, prepared or paused.
    pub fn play(&mut self, now: ClockTime) -> bool {
        match self.state {
            CueState::Stopped | CueState::Prepared => {
                self.start_time = now;
                self.pause_time = 0;
                self.paused_time = 0;
                self.pause_paused_time = 0;
                self.post_has_run = false;
                self.properties.copy_to_live(&TIMING_PROPERTIES);

                let timing = self.timing(PropertyVersion::Live);
                self.state = if timing.pre > 0 {
                    CueState::PlayingPre
                } else {
                    CueState::PlayingAction
                };
                true
            }
            CueState::Paused => {
                self.paused_time += (now - self.pause_time).max(0);
                self.pause_time = 0;
                // Re-enter by elapsed time; start_time stays put.
                let elapsed = (now - self.start_time - self.paused_time).max(0);
                let timing = self.timing(PropertyVersion::Live);
                self.state = if elapsed < timing.pre {
                    CueState::PlayingPre
                } else if timing.action_is_infinite() || elapsed - timing.pre < timing.action {
                    CueState::PlayingAction
                } else if timing.trigger != PostTrigger::None && !self.post_has_run {
                    CueState::PlayingPost
                } else {
                    // Let the next pulse finish the action phase.
                    CueState::PlayingAction
                };
                true
            }
            other => {
                log::debug!("Cue {} cannot play from {}", self.id, other);
                false
            }
        }
    }

    /// Pause a playing cue. Returns false unless a playing state was active.
    pub fn pause(&mut self, now: ClockTime) -> bool {
        if !self.state.is_playing() {
            return false;
        }
        self.pause_time = now;
        self.pause_paused_time = self.paused_time;
        self.state = CueState::Paused;
        true
    }

    /// Reset the runtime fields and go to `Stopped`.
    pub fn stop(&mut self) {
        self.start_time = 0;
        self.pause_time = 0;
        self.paused_time = 0;
        self.pause_paused_time = 0;
        self.post_has_run = false;
        self.state = CueState::Stopped;
    }

    /// Move between `Stopped` and `Error` as the configuration changes.
    /// Running cues are left alone.
    pub(crate) fn update_error(&mut self, in_error: bool) {
        match (self.state, in_error) {
            (CueState::Stopped | CueState::Prepared, true) => self.state = CueState::Error,
            (CueState::Error, false) => self.state = CueState::Stopped,
            _ => {}
        }
    }

    /// Advance the timing state machine to `now`.
    pub fn pulse(&mut self, now: ClockTime) -> PulseOutcome {
        let mut outcome = PulseOutcome::default();
        if !self.state.is_playing() {
            return outcome;
        }

        let timing = self.timing(PropertyVersion::Live);
        let elapsed = self.elapsed(now);

        if !self.post_has_run {
            if let Some(start) = timing.post_start() {
                if elapsed >= start.saturating_add(timing.post) {
                    self.post_has_run = true;
                    outcome.post_wait_fired = true;
                }
            }
        }

        match self.state {
            CueState::PlayingPre => {
                // No fall-through: the action phase always gets its own pulse.
                if elapsed >= timing.pre {
                    self.state = CueState::PlayingAction;
                }
            }
            CueState::PlayingAction => {
                let action_done = !timing.action_is_infinite() && elapsed - timing.pre >= timing.action;
                if action_done {
                    if timing.trigger != PostTrigger::None && !self.post_has_run {
                        self.state = CueState::PlayingPost;
                    } else {
                        self.stop();
                        outcome.stopped = true;
                    }
                }
            }
            CueState::PlayingPost => {
                if self.post_has_run {
                    self.stop();
                    outcome.stopped = true;
                }
            }
            _ => {}
        }

        outcome
    }

    /// Progress through each phase at `now`. Has no side effects.
    pub fn running_times(&self, now: ClockTime) -> RunningTimes {
        if !self.state.is_running() {
            return RunningTimes::default();
        }
        let timing = self.timing(PropertyVersion::Live);
        let elapsed = self.elapsed(now);

        let pre = elapsed.min(timing.pre);
        let mut action = (elapsed - timing.pre).max(0);
        if !timing.action_is_infinite() {
            action = action.min(timing.action);
        }
        let post = match timing.post_start() {
            Some(start) => (elapsed - start).clamp(0, timing.post),
            None => 0,
        };
        let paused = if self.state == CueState::Paused {
            self.pause_paused_time + (now - self.pause_time).max(0)
        } else {
            self.paused_time
        };

        RunningTimes {
            pre,
            action,
            post,
            paused,
            real: elapsed,
            total: elapsed + paused,
        }
    }

    /// Live action duration, negative when infinite.
    pub fn live_action_time(&self) -> ClockTime {
        self.properties.get_or("action_time", PropertyVersion::Live, 0i64)
    }

    /// Default column text for the base fields.
    pub fn base_field(&self, name: &str) -> Option<String> {
        let v = PropertyVersion::Defined;
        match name {
            "id" => Some(self.id.to_string()),
            "name" => Some(self.name()),
            "pre_time" | "action_time" | "post_time" => {
                Some(timing::format_time(self.properties.get_or(name, v, 0i64)))
            }
            "post_trigger" => Some(
                match PostTrigger::from_i32(self.properties.get_or(name, v, 0i32)) {
                    PostTrigger::None => "none",
                    PostTrigger::Immediate => "immediate",
                    PostTrigger::AfterPre => "after pre",
                    PostTrigger::AfterAction => "after action",
                }
                .to_string(),
            ),
            "state" => Some(self.state.to_string()),
            _ => None,
        }
    }
}

/// A cue: core state plus class behaviour and triggers.
pub struct Cue {
    pub core: CueCore,
    pub kind: Box<dyn CueKind>,
    pub triggers: Vec<Trigger>,
}

impl Cue {
    /// Build a cue, letting the kind add its properties.
    pub fn new(uid: CueUid, id: CueId, kind: Box<dyn CueKind>) -> Self {
        let mut core = CueCore::new(uid, id);
        kind.define_properties(&mut core.properties);
        let mut cue = Self {
            core,
            kind,
            triggers: Vec::new(),
        };
        cue.refresh_error();
        cue
    }

    pub fn uid(&self) -> CueUid {
        self.core.uid()
    }

    pub fn state(&self) -> CueState {
        self.core.state()
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    /// The configuration error of this cue, if any.
    pub fn error(&self) -> Option<String> {
        self.kind.error(&self.core)
    }

    /// Re-evaluate the configuration error and move between `Stopped` and `Error`.
    pub fn refresh_error(&mut self) {
        let in_error = self.kind.error(&self.core).is_some();
        self.core.update_error(in_error);
    }

    /// Column text for a named field.
    pub fn field(&self, name: &str) -> Option<String> {
        self.kind.field(&self.core, name)
    }

    pub fn icon(&self) -> &'static str {
        self.kind.icon(&self.core)
    }
}

impl fmt::Debug for Cue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cue")
            .field("class", &self.class_name())
            .field("core", &self.core)
            .field("triggers", &self.triggers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{millis, seconds};

    fn core(pre: ClockTime, action: ClockTime, post: ClockTime, trigger: PostTrigger) -> CueCore {
        let mut core = CueCore::new(CueUid(1), CueId(1000));
        core.set_timing(pre, action, post, trigger);
        core
    }

    #[test]
    fn test_cue_id_parse_and_display() {
        assert_eq!(CueId::parse("1.250"), Some(CueId(1250)));
        assert_eq!(CueId::parse("2"), Some(CueId(2000)));
        assert_eq!(CueId::parse("1.5"), Some(CueId(1500)));
        assert_eq!(CueId::parse("1.2345"), None);
        assert_eq!(CueId::parse("x"), None);
        assert_eq!(CueId(1250).to_string(), "1.250");
        assert_eq!(CueId(1250).next_whole(), Some(CueId(2000)));
        assert_eq!(CueId(4_294_967_000).next_whole(), None);
    }

    #[test]
    fn test_uid_registry_never_issues_zero_or_duplicates() {
        let mut registry = UidRegistry::new();
        let uids: HashSet<CueUid> = (0..1000).map(|_| registry.generate()).collect();
        assert_eq!(uids.len(), 1000);
        assert!(!uids.contains(&CueUid(0)));
        let first = *uids.iter().next().unwrap();
        registry.release(first);
        assert!(!registry.contains(first));
        assert_eq!(registry.len(), 999);
    }

    #[test]
    fn test_zero_length_action_gets_one_pulse() {
        let mut c = core(0, 0, 0, PostTrigger::None);
        assert!(c.play(0));
        assert_eq!(c.state(), CueState::PlayingAction);
        let outcome = c.pulse(0);
        assert!(outcome.stopped);
        assert_eq!(c.state(), CueState::Stopped);
    }

    #[test]
    fn test_play_with_pre_wait_enters_pre() {
        let mut c = core(millis(100), millis(100), 0, PostTrigger::None);
        c.play(0);
        assert_eq!(c.state(), CueState::PlayingPre);
        c.pulse(millis(50));
        assert_eq!(c.state(), CueState::PlayingPre);
        c.pulse(millis(100));
        assert_eq!(c.state(), CueState::PlayingAction);
        c.pulse(millis(150));
        assert_eq!(c.state(), CueState::PlayingAction);
        assert!(c.pulse(millis(200)).stopped);
    }

    #[test]
    fn test_play_only_from_rest_or_paused() {
        let mut c = core(0, seconds(1.0), 0, PostTrigger::None);
        assert!(c.play(0));
        assert!(!c.play(10));
        c.update_error(true); // running cues ignore error updates
        assert_eq!(c.state(), CueState::PlayingAction);
        c.stop();
        c.update_error(true);
        assert_eq!(c.state(), CueState::Error);
        assert!(!c.play(0));
        c.update_error(false);
        assert_eq!(c.state(), CueState::Stopped);
    }

    #[test]
    fn test_pause_only_while_playing() {
        let mut c = core(0, seconds(1.0), 0, PostTrigger::None);
        assert!(!c.pause(0));
        c.play(0);
        assert!(c.pause(10));
        assert!(!c.pause(20));
    }

    #[test]
    fn test_post_wait_fires_once() {
        let mut c = core(0, seconds(10.0), millis(100), PostTrigger::Immediate);
        c.play(0);
        let fired: usize = (0..500)
            .map(|ms| c.pulse(millis(ms)).post_wait_fired as usize)
            .sum();
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_after_action_enters_post_then_stops() {
        let mut c = core(0, millis(100), millis(50), PostTrigger::AfterAction);
        c.play(0);
        let outcome = c.pulse(millis(100));
        assert!(!outcome.post_wait_fired);
        assert_eq!(c.state(), CueState::PlayingPost);
        let outcome = c.pulse(millis(150));
        assert!(outcome.post_wait_fired);
        assert!(outcome.stopped);
    }

    #[test]
    fn test_after_action_with_zero_post_fires_and_stops_together() {
        let mut c = core(0, seconds(1.0), 0, PostTrigger::AfterAction);
        c.play(0);
        assert_eq!(c.pulse(millis(999)), PulseOutcome::default());
        let outcome = c.pulse(seconds(1.0));
        assert!(outcome.post_wait_fired);
        assert!(outcome.stopped);
    }

    #[test]
    fn test_infinite_action_never_fires_after_action() {
        let mut c = core(0, -1, 0, PostTrigger::AfterAction);
        c.play(0);
        for s in 0..100 {
            let outcome = c.pulse(seconds(s as f64));
            assert!(!outcome.post_wait_fired);
            assert!(!outcome.stopped);
        }
        assert_eq!(c.state(), CueState::PlayingAction);
        assert_eq!(c.running_times(seconds(100.0)).action, seconds(100.0));
    }

    #[test]
    fn test_pause_and_immediate_resume_keeps_times() {
        let mut c = core(millis(100), seconds(1.0), millis(200), PostTrigger::AfterPre);
        c.play(0);
        c.pulse(millis(300));
        let before = c.running_times(millis(300));
        c.pause(millis(300));
        c.play(millis(300));
        let after = c.running_times(millis(300));
        assert_eq!(before, after);
    }

    #[test]
    fn test_pause_excludes_paused_time() {
        let mut c = core(0, seconds(1.0), 0, PostTrigger::None);
        c.play(0);
        c.pause(millis(400));
        let paused = c.running_times(millis(900));
        assert_eq!(paused.action, millis(400));
        assert_eq!(paused.paused, millis(500));

        c.play(millis(900));
        assert_eq!(c.state(), CueState::PlayingAction);
        assert!(!c.pulse(millis(1400)).stopped);
        assert!(c.pulse(millis(1500)).stopped);
    }

    #[test]
    fn test_resume_reenters_pre_phase() {
        let mut c = core(millis(500), seconds(1.0), 0, PostTrigger::None);
        c.play(0);
        c.pause(millis(200));
        c.play(millis(1000));
        assert_eq!(c.state(), CueState::PlayingPre);
        assert_eq!(c.running_times(millis(1000)).pre, millis(200));
    }

    #[test]
    fn test_resume_during_post_wait_fires_once() {
        let mut c = core(0, millis(100), millis(200), PostTrigger::AfterAction);
        c.play(0);
        assert!(!c.pulse(millis(100)).post_wait_fired);
        assert_eq!(c.state(), CueState::PlayingPost);

        c.pause(millis(150));
        assert!(c.play(millis(1000)));
        assert_eq!(c.state(), CueState::PlayingPost);
        assert_eq!(c.running_times(millis(1000)).post, millis(50));

        assert!(!c.pulse(millis(1149)).post_wait_fired);
        let outcome = c.pulse(millis(1150));
        assert!(outcome.post_wait_fired);
        assert!(outcome.stopped);
        assert_eq!(c.pulse(millis(1200)), PulseOutcome::default());
    }

    #[test]
    fn test_resume_past_action_end_finishes_on_next_pulse() {
        let mut c = core(0, millis(100), 0, PostTrigger::None);
        c.play(0);
        c.pause(millis(150));
        assert!(c.play(millis(200)));
        assert_eq!(c.state(), CueState::PlayingAction);
        assert!(c.pulse(millis(200)).stopped);
    }

    #[test]
    fn test_huge_times_saturate() {
        let half = i64::MAX / 2 + 1;
        let mut c = core(half, half, millis(1), PostTrigger::AfterAction);
        c.play(0);
        assert_eq!(c.pulse(1), PulseOutcome::default());
        assert_eq!(c.state(), CueState::PlayingPre);
        assert_eq!(c.running_times(1).post, 0);
    }

    #[test]
    fn test_live_timing_is_snapshot_at_play() {
        let mut c = core(0, seconds(1.0), 0, PostTrigger::None);
        c.play(0);
        // Editing the defined value mid-playback does not move the live one.
        c.properties.set("action_time", PropertyVersion::Defined, seconds(5.0));
        assert!(c.pulse(seconds(1.0)).stopped);
    }

    #[test]
    fn test_stop_resets_running_times() {
        let mut c = core(0, seconds(1.0), 0, PostTrigger::None);
        c.play(0);
        c.stop();
        assert_eq!(c.running_times(millis(500)), RunningTimes::default());
        assert_eq!(c.state(), CueState::Stopped);
    }

    #[test]
    fn test_base_fields() {
        let mut c = core(0, seconds(1.5), 0, PostTrigger::AfterAction);
        c.properties.set("name", PropertyVersion::Defined, "Intro".to_string());
        assert_eq!(c.base_field("id").as_deref(), Some("1.000"));
        assert_eq!(c.base_field("name").as_deref(), Some("Intro"));
        assert_eq!(c.base_field("action_time").as_deref(), Some("0:01.500"));
        assert_eq!(c.base_field("post_trigger").as_deref(), Some("after action"));
        assert_eq!(c.base_field("nope"), None);
    }
}
