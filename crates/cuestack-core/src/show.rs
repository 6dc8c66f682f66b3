//! Show documents: the JSON form of a cue list.
//!
//! ```json
//! {
//!   "show_name": "Hamlet", "designer": "", "revision": 3, "channels": 2,
//!   "cues": [
//!     { "class": "GroupCue",
//!       "Cue": { "name": "Storm", "pre_time": 0, ... },
//!       "GroupCue": { "group_action": 0, "play_volume": 1.0, "cues": [ ... ] },
//!       "id": "1.000", "uid": 1234567,
//!       "triggers": [ { "class": "KeyTrigger", "KeyTrigger": { "key": "s", "action": "play" } } ] }
//!   ]
//! }
//! ```
//!
//! UIDs in a document only link cues within that document. Loading gives
//! every cue a fresh UID and rewrites references through the old-to-new map.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::MAX_CHANNELS;
use crate::cue::{CueId, CueUid};
use crate::cue_list::{CueListGuard, CueListState};
use crate::error::{Error, Result};
use crate::trigger::TriggerSpec;

/// Descriptive fields of a show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowInfo {
    pub show_name: String,
    pub designer: String,
    pub revision: u32,
}

impl Default for ShowInfo {
    fn default() -> Self {
        Self {
            show_name: "Untitled show".to_string(),
            designer: String::new(),
            revision: 0,
        }
    }
}

/// Outcome of loading a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub cues: usize,
    pub triggers: usize,
    /// Cues and triggers left out because they could not be read
    pub skipped: usize,
}

/// Serialize the whole list.
pub fn to_json(list: &CueListState) -> Result<Value> {
    let cues = list
        .top_level()
        .iter()
        .map(|uid| cue_to_json(list, *uid))
        .collect::<Result<Vec<_>>>()?;
    Ok(json!({
        "show_name": list.info.show_name,
        "designer": list.info.designer,
        "revision": list.info.revision,
        "channels": list.channels(),
        "cues": cues,
    }))
}

fn cue_to_json(list: &CueListState, uid: CueUid) -> Result<Value> {
    let cue = list.cue(uid).ok_or(Error::CueNotFound(uid))?;
    let class = cue.class_name();

    let mut entry = Map::new();
    entry.insert("class".to_string(), Value::from(class));
    entry.extend(cue.kind.to_json(&cue.core));

    let children = cue.kind.children();
    if !children.is_empty() {
        let nested = children
            .iter()
            .map(|child| cue_to_json(list, *child))
            .collect::<Result<Vec<_>>>()?;
        if let Some(Value::Object(section)) = entry.get_mut(class) {
            section.insert("cues".to_string(), Value::Array(nested));
        }
    }

    entry.insert("id".to_string(), Value::from(cue.core.id.to_string()));
    entry.insert("uid".to_string(), serde_json::to_value(uid)?);
    let triggers = cue
        .triggers
        .iter()
        .map(|t| t.spec().to_json())
        .collect::<Result<Vec<_>>>()?;
    entry.insert("triggers".to_string(), Value::Array(triggers));
    Ok(Value::Object(entry))
}

/// Write the list to `path` as pretty-printed JSON.
pub fn save(list: &CueListState, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(&to_json(list)?)?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, text)?;
    log::info!("Saved show '{}' to {}", list.info.show_name, path.display());
    Ok(())
}

/// An empty document.
pub fn empty_document(info: &ShowInfo, channels: usize) -> Value {
    json!({
        "show_name": info.show_name,
        "designer": info.designer,
        "revision": info.revision,
        "channels": channels,
        "cues": [],
    })
}

/// Write an empty document to `path`.
pub fn write_empty(path: &Path, info: &ShowInfo, channels: usize) -> Result<()> {
    let text = serde_json::to_string_pretty(&empty_document(info, channels))?;
    fs::write(path, text)?;
    Ok(())
}

/// Replace the list's contents with the show in `path`.
pub fn load(list: &mut CueListGuard<'_>, path: &Path) -> Result<LoadReport> {
    let text = fs::read_to_string(path)?;
    let report = load_str(list, &text)?;
    log::info!(
        "Loaded show '{}' from {}: {} cue(s), {} trigger(s), {} skipped",
        list.info.show_name,
        path.display(),
        report.cues,
        report.triggers,
        report.skipped
    );
    Ok(report)
}

/// Replace the list's contents with the show in `text`.
///
/// A document that is not a JSON object fails as a whole. A cue or
/// trigger that cannot be read is logged and skipped.
pub fn load_str(list: &mut CueListGuard<'_>, text: &str) -> Result<LoadReport> {
    let document: Value = serde_json::from_str(text)?;
    let Value::Object(document) = document else {
        return Err(Error::Show("show document must be a JSON object".to_string()));
    };

    list.clear();
    list.info = ShowInfo {
        show_name: document
            .get("show_name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| ShowInfo::default().show_name),
        designer: document
            .get("designer")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        revision: document
            .get("revision")
            .and_then(Value::as_u64)
            .and_then(|r| u32::try_from(r).ok())
            .unwrap_or(0),
    };
    match document.get("channels").map(|v| v.as_u64().and_then(|c| usize::try_from(c).ok())) {
        None => {}
        Some(Some(channels)) if (1..=MAX_CHANNELS).contains(&channels) => {
            if channels != list.channels() {
                list.set_channels(channels);
            }
        }
        Some(_) => log::warn!(
            "Ignoring channel count {} (must be 1-{}), keeping {}",
            document["channels"],
            MAX_CHANNELS,
            list.channels()
        ),
    }

    let mut loader = Loader::default();
    if let Some(Value::Array(cues)) = document.get("cues") {
        loader.load_cues(list, cues, None);
    }

    // References can point forward, so remap once every cue exists.
    for uid in list.walk() {
        if let Some(cue) = list.cue_mut(uid) {
            cue.kind.remap_uids(&mut cue.core, &loader.uid_map);
            cue.refresh_error();
        }
    }

    for (uid, specs) in std::mem::take(&mut loader.triggers) {
        for spec in specs {
            match TriggerSpec::from_json(&spec) {
                Ok(spec) => {
                    if list.add_trigger(uid, spec) {
                        loader.report.triggers += 1;
                    }
                }
                Err(e) => {
                    log::warn!("Skipping trigger on cue {}: {}", uid, e);
                    loader.report.skipped += 1;
                }
            }
        }
    }
    Ok(loader.report)
}

#[derive(Default)]
struct Loader {
    uid_map: HashMap<CueUid, CueUid>,
    triggers: Vec<(CueUid, Vec<Value>)>,
    report: LoadReport,
}

impl Loader {
    fn load_cues(&mut self, list: &mut CueListGuard<'_>, entries: &[Value], parent: Option<CueUid>) {
        for entry in entries {
            if let Err(e) = self.load_cue(list, entry, parent) {
                log::warn!("Skipping cue: {}", e);
                self.report.skipped += 1;
            }
        }
    }

    fn load_cue(&mut self, list: &mut CueListGuard<'_>, entry: &Value, parent: Option<CueUid>) -> Result<()> {
        let Value::Object(entry) = entry else {
            return Err(Error::Show("cue entry is not an object".to_string()));
        };
        let class = entry
            .get("class")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Show("cue entry without class".to_string()))?;
        let id = match entry.get("id") {
            Some(Value::String(s)) => CueId::parse(s),
            Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()).map(CueId),
            _ => None,
        }
        .ok_or_else(|| Error::Show(format!("{} cue without a valid id", class)))?;

        let mut cue = list
            .build(class, id)
            .ok_or_else(|| Error::Show(format!("unknown cue class '{}'", class)))?;
        cue.kind.from_json(&mut cue.core, entry);
        let uid = cue.uid();
        if !list.adopt(cue, parent) {
            return Err(Error::Show(format!("cue {} could not be added", id)));
        }
        self.report.cues += 1;

        match entry.get("uid").map(|v| serde_json::from_value::<CueUid>(v.clone())) {
            Some(Ok(old)) => {
                if self.uid_map.insert(old, uid).is_some() {
                    log::warn!("UID {} appears twice in the show, keeping the later cue", old);
                }
            }
            _ => log::debug!("Cue {} has no stored UID", id),
        }

        if let Some(Value::Array(specs)) = entry.get("triggers") {
            self.triggers.push((uid, specs.clone()));
        }

        if let Some(Value::Array(children)) = entry.get(class).and_then(|section| section.get("cues")) {
            self.load_cues(list, children, Some(uid));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue_list::{CueList, CueListConfig};
    use crate::property::{PropertyValue, PropertyVersion};

    #[test]
    fn test_empty_document_loads() {
        let list = CueList::without_scheduler(CueListConfig::default());
        let info = ShowInfo {
            show_name: "Hamlet".to_string(),
            designer: "Sound".to_string(),
            revision: 2,
        };
        let text = empty_document(&info, 4).to_string();
        let report = load_str(&mut list.lock(), &text).unwrap();
        assert_eq!(report, LoadReport::default());
        let guard = list.lock();
        assert_eq!(guard.info, info);
        assert_eq!(guard.channels(), 4);
    }

    #[test]
    fn test_bad_cue_is_skipped() {
        let list = CueList::without_scheduler(CueListConfig::default());
        let text = r#"{
            "show_name": "x",
            "cues": [
                {"class": "NoSuchCue", "id": "1.000", "uid": 5},
                {"class": "Cue", "Cue": {"name": "ok"}, "id": "2.000", "uid": 6},
                "garbage"
            ]
        }"#;
        let report = load_str(&mut list.lock(), text).unwrap();
        assert_eq!(report.cues, 1);
        assert_eq!(report.skipped, 2);
        let guard = list.lock();
        let uid = guard.top_level()[0];
        assert_eq!(guard.cue(uid).unwrap().core.name(), "ok");
        assert_eq!(guard.cue(uid).unwrap().core.id, CueId(2000));
    }

    #[test]
    fn test_out_of_range_channel_count_is_ignored() {
        let list = CueList::without_scheduler(CueListConfig::default());
        for channels in ["1099511627776", "0", "65", "-2", "\"six\""] {
            let text = format!(r#"{{"channels": {}, "cues": []}}"#, channels);
            load_str(&mut list.lock(), &text).unwrap();
            assert_eq!(list.lock().channels(), 2, "channels = {}", channels);
        }
        load_str(&mut list.lock(), r#"{"channels": 64, "cues": []}"#).unwrap();
        assert_eq!(list.lock().channels(), 64);
    }

    #[test]
    fn test_append_after_largest_id_fails_cleanly() {
        let list = CueList::without_scheduler(CueListConfig::default());
        let mut guard = list.lock();
        let text = r#"{"cues": [{"class": "Cue", "id": "4294967", "uid": 1}]}"#;
        assert_eq!(load_str(&mut guard, text).unwrap().cues, 1);
        assert!(guard.append("Cue").is_none());
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_not_an_object_is_an_error() {
        let list = CueList::without_scheduler(CueListConfig::default());
        assert!(load_str(&mut list.lock(), "[1, 2]").is_err());
        assert!(load_str(&mut list.lock(), "{").is_err());
    }

    #[test]
    fn test_targets_are_remapped() {
        let list = CueList::without_scheduler(CueListConfig::default());
        let text = r#"{
            "cues": [
                {"class": "ActionCue", "ActionCue": {"target": 77, "action": 2}, "id": "1", "uid": 10},
                {"class": "Cue", "id": "2", "uid": 77}
            ]
        }"#;
        load_str(&mut list.lock(), text).unwrap();
        let guard = list.lock();
        let action = guard.top_level()[0];
        let target = guard.top_level()[1];
        let stored: u64 = guard
            .cue(action)
            .unwrap()
            .core
            .properties
            .get("target", PropertyVersion::Defined)
            .unwrap();
        assert_eq!(CueUid(stored), target);
        assert!(guard.cue(action).unwrap().error().is_none());
    }

    #[test]
    fn test_dangling_target_is_cleared() {
        let list = CueList::without_scheduler(CueListConfig::default());
        let text = r#"{"cues": [{"class": "FadeCue", "FadeCue": {"target": 99}, "id": "1", "uid": 10}]}"#;
        load_str(&mut list.lock(), text).unwrap();
        let guard = list.lock();
        let fade = guard.cue(guard.top_level()[0]).unwrap();
        assert!(fade.error().is_some());
    }

    #[test]
    fn test_negative_infinity_is_written_as_string() {
        let list = CueList::without_scheduler(CueListConfig::default());
        let mut guard = list.lock();
        let fade = guard.append("FadeCue").unwrap();
        guard.set_property(fade, "target_volume", PropertyVersion::Defined, PropertyValue::Double(-80.0));
        let value = to_json(&guard).unwrap();
        assert_eq!(value["cues"][0]["FadeCue"]["target_volume"], "-Infinite");
        assert!(value["cues"][0]["FadeCue"]["target"].is_null());
    }
}
