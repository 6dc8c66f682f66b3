//! Group cue: plays its children and stops once they are all done.

use crate::cue::{CueAction, CueContext, CueCore, CueKind, CueState, CueUid};
use crate::property::{Property, PropertyStore, PropertyValue, PropertyVersion};

/// How a group starts its children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupAction {
    /// Play every child at once.
    TriggerAll,
    /// Play the first child; the rest follow through post-wait chaining.
    TriggerFirst,
}

impl GroupAction {
    fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::TriggerFirst,
            _ => Self::TriggerAll,
        }
    }
}

#[derive(Debug, Default)]
pub struct GroupCue {
    children: Vec<CueUid>,
    launched: bool,
}

impl GroupCue {
    pub const CLASS: &'static str = "GroupCue";

    fn children_where(&self, ctx: &CueContext<'_>, pred: impl Fn(CueState) -> bool) -> Vec<CueUid> {
        self.children
            .iter()
            .copied()
            .filter(|uid| ctx.cue(*uid).is_some_and(|c| pred(c.state())))
            .collect()
    }
}

impl CueKind for GroupCue {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn define_properties(&self, properties: &mut PropertyStore) {
        properties.add(Property::new("group_action", Self::CLASS, PropertyValue::Int32(0)));
        properties.add(Property::new("play_volume", Self::CLASS, PropertyValue::Double(1.0)));
        properties.set("action_time", PropertyVersion::Defined, -1i64);
    }

    fn on_play(&mut self, core: &mut CueCore, resumed: bool, ctx: &mut CueContext<'_>) {
        if resumed {
            for child in self.children_where(ctx, |s| s == CueState::Paused) {
                ctx.request(child, CueAction::Play);
            }
            return;
        }
        core.properties.copy_to_live(&["group_action", "play_volume"]);
        // A group runs until its children are done, whatever was configured.
        core.properties.set("action_time", PropertyVersion::Live, -1i64);
        self.launched = false;
    }

    fn on_pause(&mut self, _core: &mut CueCore, ctx: &mut CueContext<'_>) {
        for child in self.children_where(ctx, CueState::is_playing) {
            ctx.request(child, CueAction::Pause);
        }
    }

    fn on_stop(&mut self, _core: &mut CueCore, ctx: &mut CueContext<'_>) {
        self.launched = false;
        for child in self.children_where(ctx, CueState::is_running) {
            ctx.request(child, CueAction::Stop);
        }
    }

    fn pulse(&mut self, core: &mut CueCore, ctx: &mut CueContext<'_>) {
        if core.state() != CueState::PlayingAction {
            return;
        }
        if !self.launched {
            self.launched = true;
            let action = GroupAction::from_i32(core.properties.get_or("group_action", PropertyVersion::Live, 0));
            match action {
                GroupAction::TriggerAll => {
                    for child in &self.children {
                        ctx.request(*child, CueAction::Play);
                    }
                }
                GroupAction::TriggerFirst => {
                    if let Some(first) = self.children.first() {
                        ctx.request(*first, CueAction::Play);
                    }
                }
            }
            if self.children.is_empty() {
                ctx.request(core.uid(), CueAction::Stop);
            }
            return;
        }
        if self.children_where(ctx, CueState::is_running).is_empty() {
            log::debug!("Group {} finished", core.id);
            ctx.request(core.uid(), CueAction::Stop);
        }
    }

    fn output_gain(&self, core: &CueCore) -> f64 {
        core.properties.get_or("play_volume", PropertyVersion::Live, 1.0)
    }

    fn field(&self, core: &CueCore, name: &str) -> Option<String> {
        match name {
            "children" => Some(self.children.len().to_string()),
            _ => core.base_field(name),
        }
    }

    fn icon(&self, core: &CueCore) -> &'static str {
        if core.state().is_running() {
            "folder-open"
        } else {
            "folder"
        }
    }

    fn children(&self) -> &[CueUid] {
        &self.children
    }

    fn children_mut(&mut self) -> Option<&mut Vec<CueUid>> {
        Some(&mut self.children)
    }
}
