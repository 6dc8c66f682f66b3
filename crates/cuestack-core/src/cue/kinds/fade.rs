//! Fade cue: ramps another cue's live play volume.

use std::collections::HashMap;

use super::{remap_target, target, target_field, target_property, NO_TARGET};
use crate::cue::{CueAction, CueContext, CueCore, CueKind, CueState, CueUid};
use crate::property::{db_to_linear, decibel_validator, Property, PropertyStore, PropertyValue, PropertyVersion};
use crate::timing::ClockTime;

#[derive(Debug, Default)]
pub struct FadeCue {
    start_volume: Option<f64>,
    finished: bool,
}

impl FadeCue {
    pub const CLASS: &'static str = "FadeCue";

    fn progress(core: &CueCore, now: ClockTime) -> f64 {
        let duration = core.live_action_time();
        if duration <= 0 {
            return 1.0;
        }
        let done = core.running_times(now).action;
        (done as f64 / duration as f64).clamp(0.0, 1.0)
    }
}

impl CueKind for FadeCue {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn define_properties(&self, properties: &mut PropertyStore) {
        properties.add(target_property(Self::CLASS));
        properties.add(
            Property::new("target_volume", Self::CLASS, PropertyValue::Double(f64::NEG_INFINITY))
                .with_validator(decibel_validator),
        );
        properties.add(Property::new("stop_target", Self::CLASS, PropertyValue::Bool(false)));
    }

    fn on_play(&mut self, core: &mut CueCore, resumed: bool, _ctx: &mut CueContext<'_>) {
        if !resumed {
            core.properties.copy_to_live(&["target", "target_volume", "stop_target"]);
            self.start_volume = None;
            self.finished = false;
        }
    }

    fn pulse(&mut self, core: &mut CueCore, ctx: &mut CueContext<'_>) {
        if self.finished || core.state() != CueState::PlayingAction {
            return;
        }
        let live = PropertyVersion::Live;
        let Some(target) = target(core, live) else {
            self.finished = true;
            return;
        };
        let now = ctx.now;
        let Some(target_cue) = ctx.cue_mut(target) else {
            log::warn!("Fade cue {} targets missing cue {}", core.id, target);
            self.finished = true;
            return;
        };

        let start = match self.start_volume {
            Some(volume) => volume,
            None => match target_cue.core.properties.get::<f64>("play_volume", live) {
                Ok(volume) => *self.start_volume.insert(volume),
                Err(e) => {
                    log::warn!("Fade cue {} cannot fade {}: {}", core.id, target, e);
                    self.finished = true;
                    return;
                }
            },
        };
        let end = db_to_linear(core.properties.get_or("target_volume", live, f64::NEG_INFINITY));
        let progress = Self::progress(core, now);
        let volume = start + (end - start) * progress;
        target_cue.core.properties.set("play_volume", live, volume);
        log::trace!("Fade {} -> {}: {:.3}", core.id, target, volume);

        if progress >= 1.0 {
            self.finished = true;
            if core.properties.get_or("stop_target", live, false) {
                ctx.request(target, CueAction::Stop);
            }
        }
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
            _ => core.base_field(name),
        }
    }
}
