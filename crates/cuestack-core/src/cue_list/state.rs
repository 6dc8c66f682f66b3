//! Cue collection and every operation performed under the list lock.

use std::collections::HashMap;
use std::sync::Arc;

use super::mixer::RmsData;
use super::ring_buffer::RingBuffer;
use super::CueListConfig;
use crate::config::MAX_CHANNELS;
use crate::cue::{Cue, CueAction, CueClassRegistry, CueContext, CueId, CueState, CueUid, UidRegistry};
use crate::midi::MidiEventSource;
use crate::property::{PropertyValue, PropertyVersion};
use crate::show::ShowInfo;
use crate::timing::ClockTime;
use crate::trigger::{Trigger, TriggerSpec};

/// Everything the cue list lock protects.
pub struct CueListState {
    pub(super) cues: HashMap<CueUid, Cue>,
    pub(super) order: Vec<CueUid>,
    uids: UidRegistry,
    classes: CueClassRegistry,
    pub(super) channels: usize,
    pub(super) sample_rate: u32,
    pub(super) ring_capacity: usize,
    pub(super) buffers: Vec<RingBuffer>,
    pub(super) master_rms: RmsData,
    pub(super) rms: HashMap<CueUid, RmsData>,
    cursor: usize,
    pub info: ShowInfo,
    pub(crate) midi_source: Option<Arc<dyn MidiEventSource>>,
    pub(super) retired_triggers: Vec<Trigger>,
}

impl CueListState {
    pub(super) fn new(config: &CueListConfig) -> Self {
        let channels = config.channels.clamp(1, MAX_CHANNELS);
        Self {
            cues: HashMap::new(),
            order: Vec::new(),
            uids: UidRegistry::new(),
            classes: CueClassRegistry::with_builtin(),
            channels,
            sample_rate: config.sample_rate,
            ring_capacity: config.ring_capacity,
            buffers: (0..channels).map(|_| RingBuffer::new(config.ring_capacity)).collect(),
            master_rms: RmsData::new(channels),
            rms: HashMap::new(),
            cursor: 0,
            info: ShowInfo::default(),
            midi_source: None,
            retired_triggers: Vec::new(),
        }
    }

    pub fn classes(&self) -> &CueClassRegistry {
        &self.classes
    }

    pub fn classes_mut(&mut self) -> &mut CueClassRegistry {
        &mut self.classes
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Top-level cues in list order.
    pub fn top_level(&self) -> &[CueUid] {
        &self.order
    }

    pub fn cue(&self, uid: CueUid) -> Option<&Cue> {
        self.cues.get(&uid)
    }

    pub fn cue_mut(&mut self, uid: CueUid) -> Option<&mut Cue> {
        self.cues.get_mut(&uid)
    }

    pub fn contains(&self, uid: CueUid) -> bool {
        self.cues.contains_key(&uid)
    }

    /// Every cue, depth first in list order.
    pub fn walk(&self) -> Vec<CueUid> {
        fn visit(state: &CueListState, uid: CueUid, out: &mut Vec<CueUid>) {
            out.push(uid);
            if let Some(cue) = state.cues.get(&uid) {
                for child in cue.kind.children() {
                    visit(state, *child, out);
                }
            }
        }
        let mut out = Vec::with_capacity(self.cues.len());
        for uid in &self.order {
            visit(self, *uid, &mut out);
        }
        out
    }

    /// Find a cue by display id, top-level cues first.
    pub fn find_by_id(&self, id: CueId) -> Option<CueUid> {
        self.order
            .iter()
            .copied()
            .find(|uid| self.cues.get(uid).is_some_and(|c| c.core.id == id))
            .or_else(|| self.walk().into_iter().find(|uid| self.cues[uid].core.id == id))
    }

    /// None once the highest top-level id has no whole successor.
    fn next_top_level_id(&self) -> Option<CueId> {
        match self.order.iter().filter_map(|uid| self.cues.get(uid)).map(|c| c.core.id).max() {
            Some(highest) => highest.next_whole(),
            None => Some(CueId(1000)),
        }
    }

    fn create(&mut self, class: &str, id: CueId) -> Option<Cue> {
        let Some(kind) = self.classes.create(class) else {
            log::error!("Unknown cue class '{}'", class);
            return None;
        };
        let uid = self.uids.generate();
        Some(Cue::new(uid, id, kind))
    }

    /// Append a new top-level cue of `class`.
    pub fn append(&mut self, class: &str) -> Option<CueUid> {
        let Some(id) = self.next_top_level_id() else {
            log::error!("No cue id left after the last top-level cue");
            return None;
        };
        let cue = self.create(class, id)?;
        let uid = cue.uid();
        self.cues.insert(uid, cue);
        self.order.push(uid);
        log::debug!("Appended {} cue {} ({})", class, id, uid);
        Some(uid)
    }

    /// Append a new cue as the last child of `parent`.
    pub fn append_child(&mut self, parent: CueUid, class: &str) -> Option<CueUid> {
        let (parent_id, siblings) = match self.cues.get_mut(&parent) {
            Some(p) => match p.kind.children_mut() {
                Some(children) => (p.core.id, children.len() as u32),
                None => {
                    log::error!("Cue {} cannot hold children", p.core.id);
                    return None;
                }
            },
            None => {
                log::error!("Parent cue {} not found", parent);
                return None;
            }
        };
        let offset = siblings.saturating_add(1);
        let id = match parent_id.0.checked_add(offset) {
            Some(id) if parent_id.minor().saturating_add(offset) <= 999 => CueId(id),
            _ => {
                log::error!("Cue {} has no free child id left", parent_id);
                return None;
            }
        };
        let mut cue = self.create(class, id)?;
        cue.core.set_parent(Some(parent));
        let uid = cue.uid();
        self.cues.insert(uid, cue);
        if let Some(children) = self.cues.get_mut(&parent).and_then(|p| p.kind.children_mut()) {
            children.push(uid);
        }
        Some(uid)
    }

    /// Insert a cue made by [`CueListState::build`] (show loading).
    pub(crate) fn adopt(&mut self, mut cue: Cue, parent: Option<CueUid>) -> bool {
        let uid = cue.uid();
        if !self.uids.contains(uid) || self.cues.contains_key(&uid) {
            log::error!("Refusing to adopt cue with unregistered or duplicate UID {}", uid);
            return false;
        }
        match parent {
            Some(parent_uid) => {
                let Some(children) = self.cues.get_mut(&parent_uid).and_then(|p| p.kind.children_mut()) else {
                    log::error!("Cue {} cannot adopt children", parent_uid);
                    self.uids.release(uid);
                    return false;
                };
                children.push(uid);
                cue.core.set_parent(Some(parent_uid));
            }
            None => self.order.push(uid),
        }
        cue.refresh_error();
        self.cues.insert(uid, cue);
        true
    }

    /// Create a cue of `class` without inserting it.
    pub(crate) fn build(&mut self, class: &str, id: CueId) -> Option<Cue> {
        self.create(class, id)
    }

    /// Remove a cue and its descendants, stopping them first.
    pub fn remove(&mut self, uid: CueUid, now: ClockTime) -> bool {
        if !self.cues.contains_key(&uid) {
            log::error!("Cannot remove unknown cue {}", uid);
            return false;
        }
        if self.cues[&uid].state().is_running() {
            self.perform(uid, CueAction::Stop, now);
        }

        let parent = self.cues[&uid].core.parent();
        match parent {
            Some(p) => {
                if let Some(children) = self.cues.get_mut(&p).and_then(|c| c.kind.children_mut()) {
                    children.retain(|c| *c != uid);
                }
            }
            None => {
                if let Some(index) = self.order.iter().position(|c| *c == uid) {
                    self.order.remove(index);
                    if index < self.cursor {
                        self.cursor -= 1;
                    }
                }
            }
        }
        self.discard(uid);
        true
    }

    fn discard(&mut self, uid: CueUid) {
        let Some(mut cue) = self.cues.remove(&uid) else {
            return;
        };
        for child in cue.kind.children().to_vec() {
            self.discard(child);
        }
        self.retired_triggers.append(&mut cue.triggers);
        self.rms.remove(&uid);
        self.uids.release(uid);
    }

    /// Remove every cue.
    pub fn clear(&mut self, now: ClockTime) {
        self.stop_all(now);
        for uid in self.order.clone() {
            self.remove(uid, now);
        }
        self.cursor = 0;
    }

    /// Move a cue to `index` among its siblings.
    pub fn move_cue(&mut self, uid: CueUid, index: usize) -> bool {
        let Some(parent) = self.cues.get(&uid).map(|c| c.core.parent()) else {
            log::error!("Cannot move unknown cue {}", uid);
            return false;
        };
        let siblings = match parent {
            Some(p) => match self.cues.get_mut(&p).and_then(|c| c.kind.children_mut()) {
                Some(children) => children,
                None => return false,
            },
            None => &mut self.order,
        };
        let Some(from) = siblings.iter().position(|c| *c == uid) else {
            return false;
        };
        siblings.remove(from);
        let to = index.min(siblings.len());
        siblings.insert(to, uid);
        true
    }

    /// The sibling after `uid` in its parent's child order or the top-level order.
    pub fn next_sibling(&self, uid: CueUid) -> Option<CueUid> {
        let parent = self.cues.get(&uid)?.core.parent();
        let siblings: &[CueUid] = match parent {
            Some(p) => self.cues.get(&p)?.kind.children(),
            None => &self.order,
        };
        let index = siblings.iter().position(|c| *c == uid)?;
        siblings.get(index + 1).copied()
    }

    /// Play, pause or stop a cue at `now`.
    pub fn perform(&mut self, uid: CueUid, action: CueAction, now: ClockTime) -> bool {
        let Some(mut cue) = self.cues.remove(&uid) else {
            log::error!("Cannot {} unknown cue {}", action, uid);
            return false;
        };

        let mut ctx = CueContext::new(now, self.channels, &mut self.cues);
        let done = match action {
            CueAction::Play => {
                let resumed = cue.state() == CueState::Paused;
                if cue.core.play(now) {
                    cue.kind.on_play(&mut cue.core, resumed, &mut ctx);
                    log::info!("Cue {} {}", cue.core.id, if resumed { "resumed" } else { "started" });
                    true
                } else {
                    false
                }
            }
            CueAction::Pause => {
                if cue.core.pause(now) {
                    cue.kind.on_pause(&mut cue.core, &mut ctx);
                    log::info!("Cue {} paused", cue.core.id);
                    true
                } else {
                    false
                }
            }
            CueAction::Stop => {
                let was_running = cue.state().is_running();
                cue.core.stop();
                if was_running {
                    cue.kind.on_stop(&mut cue.core, &mut ctx);
                    log::info!("Cue {} stopped", cue.core.id);
                }
                cue.refresh_error();
                true
            }
        };
        let requests = ctx.into_requests();
        self.cues.insert(uid, cue);

        if action == CueAction::Stop {
            self.rms.remove(&uid);
        }
        self.apply_requests(requests, now);
        done
    }

    fn apply_requests(&mut self, requests: Vec<(CueUid, CueAction)>, now: ClockTime) {
        for (uid, action) in requests {
            self.perform(uid, action, now);
        }
    }

    /// Stop every running cue.
    pub fn stop_all(&mut self, now: ClockTime) {
        let running: Vec<CueUid> = self
            .walk()
            .into_iter()
            .filter(|uid| self.cues[uid].state().is_running())
            .collect();
        for uid in running {
            self.perform(uid, CueAction::Stop, now);
        }
    }

    /// Advance every playing cue to `now`.
    pub fn pulse_all(&mut self, now: ClockTime) {
        let playing: Vec<CueUid> = self
            .order
            .iter()
            .copied()
            .filter(|uid| self.cues.get(uid).is_some_and(|c| c.state().is_running()))
            .collect();
        for uid in playing {
            self.pulse_cue(uid, now);
        }
    }

    fn pulse_cue(&mut self, uid: CueUid, now: ClockTime) {
        let Some(mut cue) = self.cues.remove(&uid) else {
            return;
        };
        let children = cue.kind.children().to_vec();

        if cue.state().is_playing() {
            let mut ctx = CueContext::new(now, self.channels, &mut self.cues);
            cue.kind.pulse(&mut cue.core, &mut ctx);
            let outcome = cue.core.pulse(now);
            if outcome.stopped {
                cue.kind.on_stop(&mut cue.core, &mut ctx);
                cue.refresh_error();
                log::debug!("Cue {} finished", cue.core.id);
            }
            let next = if outcome.post_wait_fired {
                cue.kind.next_cue(&cue.core)
            } else {
                None
            };
            let requests = ctx.into_requests();
            self.cues.insert(uid, cue);

            if outcome.stopped {
                self.rms.remove(&uid);
            }
            self.apply_requests(requests, now);
            if outcome.post_wait_fired {
                if let Some(next) = next.or_else(|| self.next_sibling(uid)) {
                    log::debug!("Post-wait of {} plays {}", uid, next);
                    self.perform(next, CueAction::Play, now);
                }
            }
        } else {
            self.cues.insert(uid, cue);
        }

        for child in children {
            if self.cues.get(&child).is_some_and(|c| c.state().is_running()) {
                self.pulse_cue(child, now);
            }
        }
    }

    /// Edit a property and re-evaluate the cue's configuration error.
    ///
    /// Live values belong to the playback path and cannot be set here.
    pub fn set_property(&mut self, uid: CueUid, name: &str, version: PropertyVersion, value: PropertyValue) -> bool {
        if version == PropertyVersion::Live {
            log::error!("Live value of '{}' is owned by playback", name);
            return false;
        }
        let Some(cue) = self.cues.get_mut(&uid) else {
            log::error!("Cannot set '{}' on unknown cue {}", name, uid);
            return false;
        };
        let ok = cue.core.properties.set_value(name, version, value);
        cue.refresh_error();
        ok
    }

    /// Set or clear the null bit of a property and re-evaluate the error state.
    pub fn set_property_null(&mut self, uid: CueUid, name: &str, null: bool) -> bool {
        let Some(cue) = self.cues.get_mut(&uid) else {
            log::error!("Cannot set '{}' on unknown cue {}", name, uid);
            return false;
        };
        let ok = cue.core.properties.set_null(name, PropertyVersion::Defined, null);
        cue.refresh_error();
        ok
    }

    /// Cue the playback cursor points at.
    pub fn cursor(&self) -> Option<CueUid> {
        self.order.get(self.cursor).copied()
    }

    /// Play the cursor cue and advance the cursor.
    pub fn go(&mut self, now: ClockTime) -> bool {
        let Some(uid) = self.cursor() else {
            log::info!("Go: end of cue list");
            return false;
        };
        self.cursor += 1;
        self.perform(uid, CueAction::Play, now)
    }

    pub fn next(&mut self) -> Option<CueUid> {
        if self.cursor < self.order.len() {
            self.cursor += 1;
        }
        self.cursor()
    }

    pub fn previous(&mut self) -> Option<CueUid> {
        self.cursor = self.cursor.saturating_sub(1);
        self.cursor()
    }

    /// Point the cursor at the top-level cue with `id`.
    pub fn goto(&mut self, id: CueId) -> bool {
        match self
            .order
            .iter()
            .position(|uid| self.cues.get(uid).is_some_and(|c| c.core.id == id))
        {
            Some(index) => {
                self.cursor = index;
                true
            }
            None => {
                log::warn!("Goto: no top-level cue {}", id);
                false
            }
        }
    }

    /// Resize the output channel count, rebuilding ring buffers and levels together.
    /// Resize the mix to `channels`, clamped to 1..=[`MAX_CHANNELS`].
    pub fn set_channels(&mut self, channels: usize) {
        let channels = channels.clamp(1, MAX_CHANNELS);
        self.channels = channels;
        self.buffers = (0..channels).map(|_| RingBuffer::new(self.ring_capacity)).collect();
        self.master_rms = RmsData::new(channels);
        self.rms.clear();
        log::info!("Cue list now has {} output channels", channels);
    }

    pub fn master_rms(&self) -> &RmsData {
        &self.master_rms
    }

    pub fn cue_rms(&self, uid: CueUid) -> Option<&RmsData> {
        self.rms.get(&uid)
    }

    /// Forget peak and clip state, both master and per cue.
    pub fn reset_peaks(&mut self) {
        self.master_rms.reset_peaks();
        for data in self.rms.values_mut() {
            data.reset_peaks();
        }
    }

    /// Fire the key triggers bound to `key`. Returns how many fired.
    pub fn dispatch_key(&mut self, key: &str, now: ClockTime) -> usize {
        let matches: Vec<(CueUid, CueAction)> = self
            .walk()
            .into_iter()
            .flat_map(|uid| {
                self.cues[&uid]
                    .triggers
                    .iter()
                    .filter_map(move |t| match t.spec() {
                        TriggerSpec::Key(spec) if spec.matches(key) => Some((uid, spec.action)),
                        _ => None,
                    })
            })
            .collect();
        for (uid, action) in &matches {
            log::debug!("Key '{}' triggers {} on {}", key, action, uid);
            self.perform(*uid, *action, now);
        }
        matches.len()
    }

    pub(crate) fn take_all_triggers(&mut self) -> Vec<Trigger> {
        let mut triggers = std::mem::take(&mut self.retired_triggers);
        for cue in self.cues.values_mut() {
            triggers.append(&mut cue.triggers);
        }
        triggers
    }
}
