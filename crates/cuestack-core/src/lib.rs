//! cuestack core - the engine behind a live show-cueing tool.
//!
//! This crate provides:
//!
//! - **Properties** - typed values with defined, live and target versions
//! - **Cues** - the pre/action/post timing state machine and built-in cue classes
//! - **Cue lists** - cue ownership, the scheduler thread and the audio mix
//! - **Triggers** - time, MIDI and key conditions that play, pause or stop a cue
//! - **OSC** - datagram codec and remote control endpoint
//! - **Shows** - JSON documents with UID remapping on load
//!
//! # Architecture
//!
//! A [`CueList`] owns every cue behind one mutex. The scheduler thread, the
//! audio callback, the OSC receiver and trigger watchers all take the same
//! lock through a [`CueListGuard`] and release it before doing anything
//! else, so no path ever nests it.
//!
//! # Feature Flags
//!
//! - `native` (default) - midir MIDI input and cpal audio output

pub mod config;
pub mod cue;
pub mod cue_list;
pub mod error;
pub mod midi;
pub mod osc;
pub mod property;
pub mod show;
pub mod timing;
pub mod trigger;

#[cfg(feature = "native")]
pub mod audio_device;

pub use config::EngineConfig;
pub use cue::{
    Cue, CueAction, CueClassRegistry, CueContext, CueCore, CueId, CueKind, CueState, CueUid, PostTrigger, RunningTimes,
};
pub use cue_list::{CueList, CueListConfig, CueListGuard, CueListHandle, CueListState, RmsData};
pub use error::{Error, Result};
pub use midi::{MidiEventSource, MidiMessage};
pub use osc::{OscArg, OscClient, OscDispatcher, OscMessage, OscServer};
pub use property::{Property, PropertyStore, PropertyValue, PropertyVersion};
pub use show::{LoadReport, ShowInfo};
pub use timing::{Clock, ClockTime};
pub use trigger::{KeyTrigger, MidiEventPattern, MidiTrigger, TimeTrigger, Trigger, TriggerSpec};

#[cfg(feature = "native")]
pub use audio_device::{list_output_devices, AudioDeviceInfo, AudioOutput};
#[cfg(feature = "native")]
pub use midi::MidiInputManager;
