//! The cue class contract and the class registry.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::{kinds, Cue, CueAction, CueCore, CueUid, BASE_CLASS};
use crate::property::PropertyStore;
use crate::timing::ClockTime;

/// Parameters of one audio pull.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioRequest {
    pub frames: usize,
    pub sample_rate: u32,
}

/// Access to the rest of the cue list while a cue hook runs.
///
/// The cue whose hook is running is not reachable through the context. Play,
/// pause and stop on other cues are queued with [`CueContext::request`] and
/// applied by the list after the hook returns, at the same clock time.
pub struct CueContext<'a> {
    pub now: ClockTime,
    pub channel_count: usize,
    cues: &'a mut HashMap<CueUid, Cue>,
    requests: Vec<(CueUid, CueAction)>,
}

impl<'a> CueContext<'a> {
    pub(crate) fn new(now: ClockTime, channel_count: usize, cues: &'a mut HashMap<CueUid, Cue>) -> Self {
        Self {
            now,
            channel_count,
            cues,
            requests: Vec::new(),
        }
    }

    pub fn cue(&self, uid: CueUid) -> Option<&Cue> {
        self.cues.get(&uid)
    }

    pub fn cue_mut(&mut self, uid: CueUid) -> Option<&mut Cue> {
        self.cues.get_mut(&uid)
    }

    /// Queue an action on another cue (or on the running cue itself).
    pub fn request(&mut self, uid: CueUid, action: CueAction) {
        self.requests.push((uid, action));
    }

    pub(crate) fn into_requests(self) -> Vec<(CueUid, CueAction)> {
        self.requests
    }
}

/// Class-specific cue behaviour.
///
/// Every method has a default, so a class only overrides what differs from a
/// plain timing-only cue. The timing state machine in [`CueCore`] has already
/// transitioned by the time `on_play`, `on_pause` and `on_stop` run.
pub trait CueKind: Send {
    /// Name used in show documents and the class registry.
    fn class_name(&self) -> &'static str;

    /// Add class properties to a freshly created cue.
    fn define_properties(&self, _properties: &mut PropertyStore) {}

    /// Called after the cue started (`resumed == false`) or resumed from pause.
    fn on_play(&mut self, _core: &mut CueCore, _resumed: bool, _ctx: &mut CueContext<'_>) {}

    fn on_pause(&mut self, _core: &mut CueCore, _ctx: &mut CueContext<'_>) {}

    fn on_stop(&mut self, _core: &mut CueCore, _ctx: &mut CueContext<'_>) {}

    /// Called every scheduler tick while playing, before the timing state advances.
    fn pulse(&mut self, _core: &mut CueCore, _ctx: &mut CueContext<'_>) {}

    /// Human-readable configuration error; `Some` puts a resting cue in `Error`.
    fn error(&self, _core: &CueCore) -> Option<String> {
        None
    }

    /// Output channels this cue sends audio to right now.
    fn active_channels(&self, _core: &CueCore, _channel_count: usize) -> Vec<usize> {
        Vec::new()
    }

    /// Fill `out` with `request.frames` interleaved frames, one sample per
    /// entry of `channels`. Returns the frames written.
    fn audio(&mut self, _core: &CueCore, _request: &AudioRequest, _channels: &[usize], _out: &mut [f32]) -> usize {
        0
    }

    /// Linear gain applied to the mix of this cue's children.
    fn output_gain(&self, _core: &CueCore) -> f64 {
        1.0
    }

    fn field(&self, core: &CueCore, name: &str) -> Option<String> {
        core.base_field(name)
    }

    fn icon(&self, core: &CueCore) -> &'static str {
        use super::CueState::*;
        match core.state() {
            Error => "dialog-error",
            Stopped | Prepared => "media-playback-stop",
            Paused => "media-playback-pause",
            PlayingPre | PlayingAction | PlayingPost => "media-playback-start",
        }
    }

    /// Ordered child cues.
    fn children(&self) -> &[CueUid] {
        &[]
    }

    /// Mutable child list, for kinds that hold children.
    fn children_mut(&mut self) -> Option<&mut Vec<CueUid>> {
        None
    }

    /// Cue to play when this cue's post-wait fires; `None` uses list order.
    fn next_cue(&self, _core: &CueCore) -> Option<CueUid> {
        None
    }

    /// Rewrite stored cue references after a show load assigned fresh UIDs.
    fn remap_uids(&mut self, _core: &mut CueCore, _map: &HashMap<CueUid, CueUid>) {}

    /// Serialize the class sections of this cue.
    fn to_json(&self, core: &CueCore) -> Map<String, Value> {
        let mut sections = Map::new();
        for class in [BASE_CLASS, self.class_name()] {
            if !sections.contains_key(class) {
                sections.insert(class.to_string(), Value::Object(core.properties.section_to_json(class)));
            }
        }
        sections
    }

    /// Apply class sections read from a show document.
    fn from_json(&mut self, core: &mut CueCore, sections: &Map<String, Value>) {
        for class in [BASE_CLASS, self.class_name()] {
            if let Some(Value::Object(section)) = sections.get(class) {
                core.properties.apply_json_section(class, section);
            }
        }
    }
}

/// Constructor for a cue class.
pub type CueConstructor = fn() -> Box<dyn CueKind>;

/// String-keyed table of cue classes.
pub struct CueClassRegistry {
    classes: HashMap<String, CueConstructor>,
}

impl CueClassRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            classes: HashMap::new(),
        }
    }

    /// A registry with every built-in class.
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(BASE_CLASS, || Box::new(kinds::BaseCue));
        registry.register(kinds::SignalCue::CLASS, || Box::new(kinds::SignalCue::default()));
        registry.register(kinds::GroupCue::CLASS, || Box::new(kinds::GroupCue::default()));
        registry.register(kinds::ActionCue::CLASS, || Box::new(kinds::ActionCue::default()));
        registry.register(kinds::FadeCue::CLASS, || Box::new(kinds::FadeCue::default()));
        registry
    }

    /// Register a class. Returns false if the name is taken.
    pub fn register(&mut self, name: &str, constructor: CueConstructor) -> bool {
        if self.classes.contains_key(name) {
            log::error!("Cue class '{}' is already registered", name);
            return false;
        }
        self.classes.insert(name.to_string(), constructor);
        true
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn CueKind>> {
        self.classes.get(name).map(|constructor| constructor())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Registered class names, sorted.
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for CueClassRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
