//! Built-in cue classes.

mod action;
mod fade;
mod group;
mod signal;

use std::collections::HashMap;

pub use action::ActionCue;
pub use fade::FadeCue;
pub use group::GroupCue;
pub use signal::SignalCue;

use super::{CueCore, CueKind, CueUid, BASE_CLASS};
use crate::property::{Property, PropertyValue, PropertyVersion};

/// Plain cue: timing only, no audio.
pub struct BaseCue;

impl CueKind for BaseCue {
    fn class_name(&self) -> &'static str {
        BASE_CLASS
    }
}

const NO_TARGET: &str = "No target cue chosen";

/// Nullable `target` property referencing another cue by UID.
fn target_property(class: &'static str) -> Property {
    Property::new("target", class, PropertyValue::UInt64(0)).nullable()
}

fn target(core: &CueCore, version: PropertyVersion) -> Option<CueUid> {
    core.properties
        .get_nullable::<u64>("target", version)
        .map(CueUid)
}

fn remap_target(core: &mut CueCore, map: &HashMap<CueUid, CueUid>) {
    let Some(old) = target(core, PropertyVersion::Defined) else {
        return;
    };
    match map.get(&old) {
        Some(new) => {
            core.properties.set("target", PropertyVersion::Defined, new.0);
        }
        None => {
            log::warn!("Cue {} targets unknown cue {}, clearing target", core.id, old);
            core.properties.set_null("target", PropertyVersion::Defined, true);
        }
    }
}

fn target_field(core: &CueCore) -> String {
    target(core, PropertyVersion::Defined)
        .map(|uid| uid.to_string())
        .unwrap_or_default()
}
