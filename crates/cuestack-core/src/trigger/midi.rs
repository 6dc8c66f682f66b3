use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{select, Receiver};
use serde::{Deserialize, Serialize};

use super::{do_action, Watcher};
use crate::cue::{CueAction, CueUid};
use crate::cue_list::CueListHandle;
use crate::midi::{MidiEventSource, MidiMessage};

/// Kind of channel voice message a pattern listens for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidiEventKind {
    NoteOn,
    NoteOff,
    PolyAftertouch,
    ControlChange,
    ProgramChange,
    ChannelAftertouch,
    PitchBend,
}

impl MidiEventKind {
    pub fn of(msg: &MidiMessage) -> Self {
        match msg {
            MidiMessage::NoteOn { .. } => Self::NoteOn,
            MidiMessage::NoteOff { .. } => Self::NoteOff,
            MidiMessage::PolyAftertouch { .. } => Self::PolyAftertouch,
            MidiMessage::ControlChange { .. } => Self::ControlChange,
            MidiMessage::ProgramChange { .. } => Self::ProgramChange,
            MidiMessage::ChannelAftertouch { .. } => Self::ChannelAftertouch,
            MidiMessage::PitchBend { .. } => Self::PitchBend,
        }
    }
}

/// Message filter. `None` fields match anything.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiEventPattern {
    pub kind: MidiEventKind,
    #[serde(default)]
    pub channel: Option<u8>,
    #[serde(default)]
    pub param1: Option<u8>,
    #[serde(default)]
    pub param2: Option<u8>,
}

impl MidiEventPattern {
    pub fn new(kind: MidiEventKind) -> Self {
        Self {
            kind,
            channel: None,
            param1: None,
            param2: None,
        }
    }

    pub fn matches(&self, msg: &MidiMessage) -> bool {
        let (p1, p2) = msg.params();
        MidiEventKind::of(msg) == self.kind
            && self.channel.map_or(true, |c| c == msg.channel())
            && self.param1.map_or(true, |p| p == p1)
            && self.param2.map_or(true, |p| p == p2)
    }

    /// Listen for one exact 14-bit pitch bend value.
    ///
    /// Sets the kind and both data bytes at once, so the result does not
    /// depend on the order fields were edited in.
    pub fn set_pitch_bend(&mut self, value: u16) {
        let value = value.min(0x3FFF);
        self.kind = MidiEventKind::PitchBend;
        self.param1 = Some((value & 0x7F) as u8);
        self.param2 = Some((value >> 7) as u8);
    }

    /// The exact pitch bend value matched, if this is a fully specified pitch bend pattern.
    pub fn pitch_bend(&self) -> Option<u16> {
        match (self.kind, self.param1, self.param2) {
            (MidiEventKind::PitchBend, Some(lsb), Some(msb)) => Some((u16::from(msb) << 7) | u16::from(lsb)),
            _ => None,
        }
    }
}

/// Fires when a matching message arrives from a MIDI device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MidiTrigger {
    /// Device name substring; the configured default device when absent
    #[serde(default)]
    pub device: Option<String>,
    pub event: MidiEventPattern,
    pub action: CueAction,
}

impl MidiTrigger {
    pub const CLASS: &'static str = "MidiTrigger";
}

pub(super) fn watch(
    spec: MidiTrigger,
    cue: CueUid,
    handle: CueListHandle,
    source: Option<Arc<dyn MidiEventSource>>,
) -> Option<Watcher> {
    let Some(source) = source else {
        log::warn!("No MIDI input available; trigger on cue {} is inactive", cue);
        return None;
    };
    let subscription = match source.open(spec.device.as_deref()) {
        Ok(subscription) => subscription,
        Err(e) => {
            log::warn!("MIDI trigger on cue {} is inactive: {}", cue, e);
            return None;
        }
    };
    Watcher::spawn("cuestack-midi-trigger", move |running, stop_rx| {
        let _connection = subscription.keep_alive;
        run(&spec, cue, &handle, &subscription.events, &running, &stop_rx);
    })
}

fn run(
    spec: &MidiTrigger,
    cue: CueUid,
    handle: &CueListHandle,
    events: &Receiver<MidiMessage>,
    running: &AtomicBool,
    stop_rx: &Receiver<()>,
) {
    while running.load(Ordering::Relaxed) {
        select! {
            recv(events) -> msg => match msg {
                Ok(msg) => {
                    if spec.event.matches(&msg) && running.load(Ordering::Relaxed) {
                        log::info!("MIDI trigger fired: {} cue {}", spec.action, cue);
                        do_action(handle, cue, spec.action);
                    }
                }
                Err(_) => {
                    log::debug!("MIDI device for cue {} closed", cue);
                    break;
                }
            },
            recv(stop_rx) -> _ => break,
        }
    }
    running.store(false, Ordering::Relaxed);
}
