//! Triggers: independent conditions that play, pause or stop a cue.
//!
//! Time and MIDI triggers each run a watcher thread. Key triggers have no
//! thread; the embedding application forwards key presses through
//! [`CueListState::dispatch_key`](crate::cue_list::CueListState::dispatch_key).
//! Every firing goes through [`do_action`], the same locked path a UI or OSC
//! action takes.

mod key;
mod midi;
mod time;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use serde_json::{json, Value};

pub use key::KeyTrigger;
pub use midi::{MidiEventKind, MidiEventPattern, MidiTrigger};
pub use time::TimeTrigger;

use crate::cue::{CueAction, CueUid};
use crate::cue_list::CueListHandle;
use crate::error::{Error, Result};
use crate::midi::MidiEventSource;

/// Configuration of one trigger, as stored in show documents.
#[derive(Clone, Debug, PartialEq)]
pub enum TriggerSpec {
    Time(TimeTrigger),
    Midi(MidiTrigger),
    Key(KeyTrigger),
}

impl TriggerSpec {
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Time(_) => TimeTrigger::CLASS,
            Self::Midi(_) => MidiTrigger::CLASS,
            Self::Key(_) => KeyTrigger::CLASS,
        }
    }

    pub fn action(&self) -> CueAction {
        match self {
            Self::Time(t) => t.action,
            Self::Midi(t) => t.action,
            Self::Key(t) => t.action,
        }
    }

    /// `{"class": "TimeTrigger", "TimeTrigger": {...}}`
    pub fn to_json(&self) -> Result<Value> {
        let body = match self {
            Self::Time(t) => serde_json::to_value(t)?,
            Self::Midi(t) => serde_json::to_value(t)?,
            Self::Key(t) => serde_json::to_value(t)?,
        };
        let class = self.class_name();
        Ok(json!({ "class": class, class: body }))
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let class = value
            .get("class")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Show("trigger without class".to_string()))?;
        let body = value
            .get(class)
            .cloned()
            .ok_or_else(|| Error::Show(format!("trigger has no '{}' section", class)))?;
        match class {
            TimeTrigger::CLASS => Ok(Self::Time(serde_json::from_value(body)?)),
            MidiTrigger::CLASS => Ok(Self::Midi(serde_json::from_value(body)?)),
            KeyTrigger::CLASS => Ok(Self::Key(serde_json::from_value(body)?)),
            other => Err(Error::Show(format!("unknown trigger class '{}'", other))),
        }
    }
}

/// What a watcher needs from its cue list.
#[derive(Clone)]
pub struct TriggerEnv {
    pub midi_source: Option<Arc<dyn MidiEventSource>>,
    pub time_poll: Duration,
}

/// Play, pause or stop `cue` through the list lock.
pub fn do_action(handle: &CueListHandle, cue: CueUid, action: CueAction) -> bool {
    match handle.with_lock(|list| list.perform(cue, action)) {
        Some(done) => done,
        None => {
            log::debug!("Trigger fired after its cue list was closed");
            false
        }
    }
}

/// A running watcher thread.
struct Watcher {
    running: Arc<AtomicBool>,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Watcher {
    fn spawn(name: &str, body: impl FnOnce(Arc<AtomicBool>, Receiver<()>) + Send + 'static) -> Option<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = bounded(1);
        let thread_running = running.clone();
        match std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_running, stop_rx))
        {
            Ok(thread) => Some(Self {
                running,
                stop_tx,
                thread: Some(thread),
            }),
            Err(e) => {
                log::error!("Failed to spawn {} watcher: {}", name, e);
                None
            }
        }
    }

    fn signal(&self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.stop_tx.try_send(());
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.signal();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Trigger watcher panicked");
            }
        }
    }
}

/// A trigger bound to one cue.
pub struct Trigger {
    spec: TriggerSpec,
    watcher: Option<Watcher>,
}

impl Trigger {
    /// Bind `spec` to `cue` and start its watcher, if it has one.
    pub(crate) fn start(spec: TriggerSpec, cue: CueUid, handle: CueListHandle, env: &TriggerEnv) -> Self {
        let watcher = match &spec {
            TriggerSpec::Time(t) => time::watch(t.clone(), cue, handle, env.time_poll),
            TriggerSpec::Midi(t) => midi::watch(t.clone(), cue, handle, env.midi_source.clone()),
            TriggerSpec::Key(_) => None,
        };
        Self { spec, watcher }
    }

    pub fn spec(&self) -> &TriggerSpec {
        &self.spec
    }

    pub fn action(&self) -> CueAction {
        self.spec.action()
    }

    /// Whether a watcher thread is running for this trigger.
    pub fn is_watching(&self) -> bool {
        self.watcher
            .as_ref()
            .is_some_and(|w| w.running.load(Ordering::Relaxed))
    }

    /// Ask the watcher to stop without waiting for it.
    pub(crate) fn signal(&self) {
        if let Some(watcher) = &self.watcher {
            watcher.signal();
        }
    }
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("spec", &self.spec)
            .field("watching", &self.is_watching())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_envelope() {
        let spec = TriggerSpec::Key(KeyTrigger {
            key: "space".to_string(),
            action: CueAction::Pause,
        });
        let value = spec.to_json().unwrap();
        assert_eq!(value["class"], "KeyTrigger");
        assert_eq!(value["KeyTrigger"]["key"], "space");
        assert_eq!(value["KeyTrigger"]["action"], "pause");
        assert_eq!(TriggerSpec::from_json(&value).unwrap(), spec);
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let value = json!({"class": "ExecTrigger", "ExecTrigger": {}});
        assert!(TriggerSpec::from_json(&value).is_err());
        assert!(TriggerSpec::from_json(&json!({"KeyTrigger": {}})).is_err());
    }
}
