//! Action cue: plays, pauses or stops another cue.

use std::collections::HashMap;

use super::{remap_target, target, target_field, target_property, NO_TARGET};
use crate::cue::{CueAction, CueContext, CueCore, CueKind, CueState, CueUid};
use crate::property::{Property, PropertyStore, PropertyValue, PropertyVersion};

#[derive(Debug, Default)]
pub struct ActionCue {
    performed: bool,
}

impl ActionCue {
    pub const CLASS: &'static str = "ActionCue";
}

impl CueKind for ActionCue {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn define_properties(&self, properties: &mut PropertyStore) {
        properties.add(target_property(Self::CLASS));
        properties.add(Property::new("action", Self::CLASS, PropertyValue::Int32(CueAction::Play.as_i32())));
    }

    fn on_play(&mut self, core: &mut CueCore, resumed: bool, _ctx: &mut CueContext<'_>) {
        if !resumed {
            core.properties.copy_to_live(&["target", "action"]);
            self.performed = false;
        }
    }

    fn pulse(&mut self, core: &mut CueCore, ctx: &mut CueContext<'_>) {
        if self.performed || core.state() != CueState::PlayingAction {
            return;
        }
        self.performed = true;

        let Some(target) = target(core, PropertyVersion::Live) else {
            log::warn!("Action cue {} has no target", core.id);
            return;
        };
        let raw = core.properties.get_or("action", PropertyVersion::Live, 0);
        let Some(action) = CueAction::from_i32(raw) else {
            log::error!("Action cue {} has invalid action {}", core.id, raw);
            return;
        };
        log::debug!("Action cue {}: {} {}", core.id, action, target);
        ctx.request(target, action);
    }

    fn error(&self, core: &CueCore) -> Option<String> {
        target(core, PropertyVersion::Defined)
            .is_none()
            .then(|| NO_TARGET.to_string())
    }

    fn remap_uids(&mut self, core: &mut CueCore, map: &HashMap<CueUid, CueUid>) {
        remap_target(core, map);
    }

    fn field(&self, core: &CueCore, name: &str) -> Option<String> {
        match name {
            "target" => Some(target_field(core)),
            "action" => CueAction::from_i32(core.properties.get_or("action", PropertyVersion::Defined, 0))
                .map(|a| a.to_string()),
            _ => core.base_field(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue::{Cue, CueId};

    #[test]
    fn test_missing_target_is_error_until_set() {
        let mut cue = Cue::new(CueUid(5), CueId(1000), Box::new(ActionCue::default()));
        assert_eq!(cue.state(), CueState::Error);
        assert_eq!(cue.error().as_deref(), Some("No target cue chosen"));

        cue.core.properties.set("target", PropertyVersion::Defined, 9u64);
        cue.refresh_error();
        assert_eq!(cue.state(), CueState::Stopped);
        assert_eq!(cue.field("target").as_deref(), Some("0000000000000009"));
    }

    #[test]
    fn test_performs_action_once() {
        let mut cue = Cue::new(CueUid(5), CueId(1000), Box::new(ActionCue::default()));
        let v = PropertyVersion::Defined;
        cue.core.properties.set("target", v, 9u64);
        cue.core.properties.set("action", v, CueAction::Stop.as_i32());
        cue.core.set_timing(0, -1, 0, crate::cue::PostTrigger::None);
        cue.refresh_error();

        let mut others = HashMap::new();
        let mut ctx = CueContext::new(0, 2, &mut others);
        assert!(cue.core.play(0));
        cue.kind.on_play(&mut cue.core, false, &mut ctx);
        cue.kind.pulse(&mut cue.core, &mut ctx);
        cue.kind.pulse(&mut cue.core, &mut ctx);
        assert_eq!(ctx.into_requests(), vec![(CueUid(9), CueAction::Stop)]);
    }

    #[test]
    fn test_remap_rewrites_target() {
        let mut cue = Cue::new(CueUid(5), CueId(1000), Box::new(ActionCue::default()));
        cue.core.properties.set("target", PropertyVersion::Defined, 9u64);
        let map = HashMap::from([(CueUid(9), CueUid(77))]);
        cue.kind.remap_uids(&mut cue.core, &map);
        assert_eq!(target(&cue.core, PropertyVersion::Defined), Some(CueUid(77)));
    }
}
