//! MIDI input for cue triggers.
//!
//! This module provides:
//! - MIDI message parsing from raw bytes
//! - [`MidiEventSource`], the per-device event queue MIDI triggers listen on
//! - [`MidiInputManager`], the midir-backed source (native builds)

use crossbeam_channel::Receiver;

use crate::error::Result;

/// Channel voice messages parsed from raw MIDI bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note on event (channel 0-15, note 0-127, velocity 1-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note off event; note on with velocity 0 is reported as this
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Polyphonic aftertouch (per-note pressure)
    PolyAftertouch { channel: u8, note: u8, pressure: u8 },
    /// Control change (channel, controller number, value)
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// Channel aftertouch (channel pressure)
    ChannelAftertouch { channel: u8, pressure: u8 },
    /// Pitch bend, raw 14-bit value (8192 is centre)
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    /// Parse raw MIDI bytes. System messages are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        let channel = status & 0x0F;
        let d1 = data.first().copied();
        let d2 = data.get(1).copied();

        match (status & 0xF0, d1, d2) {
            (0x90, Some(note), Some(0)) => Some(Self::NoteOff {
                channel,
                note,
                velocity: 0,
            }),
            (0x90, Some(note), Some(velocity)) => Some(Self::NoteOn {
                channel,
                note,
                velocity,
            }),
            (0x80, Some(note), Some(velocity)) => Some(Self::NoteOff {
                channel,
                note,
                velocity,
            }),
            (0xA0, Some(note), Some(pressure)) => Some(Self::PolyAftertouch {
                channel,
                note,
                pressure,
            }),
            (0xB0, Some(controller), Some(value)) => Some(Self::ControlChange {
                channel,
                controller,
                value,
            }),
            (0xC0, Some(program), _) => Some(Self::ProgramChange { channel, program }),
            (0xD0, Some(pressure), _) => Some(Self::ChannelAftertouch { channel, pressure }),
            // Pitch bend is 14-bit: LSB + MSB
            (0xE0, Some(lsb), Some(msb)) => Some(Self::PitchBend {
                channel,
                value: (u16::from(msb & 0x7F) << 7) | u16::from(lsb & 0x7F),
            }),
            _ => None,
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            Self::NoteOn { channel, .. }
            | Self::NoteOff { channel, .. }
            | Self::PolyAftertouch { channel, .. }
            | Self::ControlChange { channel, .. }
            | Self::ProgramChange { channel, .. }
            | Self::ChannelAftertouch { channel, .. }
            | Self::PitchBend { channel, .. } => channel,
        }
    }

    /// The message's two data bytes as parameters (pitch bend split into LSB, MSB).
    pub fn params(&self) -> (u8, u8) {
        match *self {
            Self::NoteOn { note, velocity, .. } | Self::NoteOff { note, velocity, .. } => (note, velocity),
            Self::PolyAftertouch { note, pressure, .. } => (note, pressure),
            Self::ControlChange { controller, value, .. } => (controller, value),
            Self::ProgramChange { program, .. } => (program, 0),
            Self::ChannelAftertouch { pressure, .. } => (pressure, 0),
            Self::PitchBend { value, .. } => ((value & 0x7F) as u8, (value >> 7) as u8),
        }
    }
}

/// Live subscription to one device's messages.
///
/// Dropping `keep_alive` closes the device connection.
pub struct MidiSubscription {
    pub events: Receiver<MidiMessage>,
    pub keep_alive: Box<dyn Send>,
}

/// Something MIDI triggers can listen to.
pub trait MidiEventSource: Send + Sync {
    /// Open the device whose name contains `device` (any device when None).
    fn open(&self, device: Option<&str>) -> Result<MidiSubscription>;
}

/// Information about a MIDI input port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiDeviceInfo {
    /// Device name (as reported by the system)
    pub name: String,
    /// Port index (for opening)
    pub port_index: usize,
}

#[cfg(feature = "native")]
pub use native::MidiInputManager;

#[cfg(feature = "native")]
mod native {
    use crossbeam_channel::unbounded;
    use midir::MidiInput;

    use super::{MidiDeviceInfo, MidiEventSource, MidiMessage, MidiSubscription};
    use crate::error::{Error, Result};

    /// midir-backed MIDI input. Each [`MidiEventSource::open`] makes its own
    /// connection, so every trigger gets a private event queue.
    #[derive(Debug, Default)]
    pub struct MidiInputManager {
        /// Device used when a trigger does not name one
        default_device: Option<String>,
    }

    impl MidiInputManager {
        pub fn new(default_device: Option<String>) -> Self {
            Self { default_device }
        }

        /// List available MIDI input devices.
        pub fn list_devices() -> Result<Vec<MidiDeviceInfo>> {
            let midi_in = MidiInput::new("cuestack-probe")
                .map_err(|e| Error::Midi(format!("Failed to create MIDI input: {}", e)))?;

            let devices = midi_in
                .ports()
                .iter()
                .enumerate()
                .map(|(index, port)| MidiDeviceInfo {
                    name: midi_in
                        .port_name(port)
                        .unwrap_or_else(|_| format!("Unknown Device {}", index)),
                    port_index: index,
                })
                .collect();
            Ok(devices)
        }

        fn find(&self, device: Option<&str>) -> Result<MidiDeviceInfo> {
            let devices = Self::list_devices()?;
            match device.or(self.default_device.as_deref()) {
                Some(name) => {
                    let name_lower = name.to_lowercase();
                    devices
                        .into_iter()
                        .find(|d| d.name.to_lowercase().contains(&name_lower))
                        .ok_or_else(|| Error::Midi(format!("No MIDI device found matching '{}'", name)))
                }
                None => devices
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::Midi("No MIDI devices available".to_string())),
            }
        }
    }

    impl MidiEventSource for MidiInputManager {
        fn open(&self, device: Option<&str>) -> Result<MidiSubscription> {
            let info = self.find(device)?;
            let midi_in = MidiInput::new("cuestack")
                .map_err(|e| Error::Midi(format!("Failed to create MIDI input: {}", e)))?;
            let ports = midi_in.ports();
            let port = ports
                .get(info.port_index)
                .ok_or_else(|| Error::Midi(format!("Invalid MIDI port index: {}", info.port_index)))?;

            let (tx, rx) = unbounded();
            let connection = midi_in
                .connect(
                    port,
                    "cuestack-trigger",
                    move |_timestamp, bytes, _| {
                        log::trace!("[MIDI RAW] bytes={:?}", bytes);
                        if let Some(msg) = MidiMessage::from_bytes(bytes) {
                            let _ = tx.send(msg);
                        }
                    },
                    (),
                )
                .map_err(|e| Error::Midi(format!("Failed to connect to MIDI device: {}", e)))?;

            log::info!("Connected to MIDI device: {} (port {})", info.name, info.port_index);
            Ok(MidiSubscription {
                events: rx,
                keep_alive: Box::new(connection),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note_on() {
        let msg = MidiMessage::from_bytes(&[0x91, 60, 100]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::NoteOn {
                channel: 1,
                note: 60,
                velocity: 100
            }
        );
        assert_eq!(msg.params(), (60, 100));
    }

    #[test]
    fn test_parse_note_on_velocity_zero() {
        let msg = MidiMessage::from_bytes(&[0x90, 60, 0]).unwrap();
        assert!(matches!(msg, MidiMessage::NoteOff { note: 60, .. }));
    }

    #[test]
    fn test_parse_cc() {
        let msg = MidiMessage::from_bytes(&[0xB0, 1, 64]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::ControlChange {
                channel: 0,
                controller: 1,
                value: 64
            }
        );
    }

    #[test]
    fn test_parse_pitch_bend() {
        let msg = MidiMessage::from_bytes(&[0xE0, 0, 64]).unwrap();
        assert_eq!(msg, MidiMessage::PitchBend { channel: 0, value: 8192 });
        assert_eq!(msg.params(), (0, 64));
    }

    #[test]
    fn test_short_and_system_messages_are_ignored() {
        assert_eq!(MidiMessage::from_bytes(&[]), None);
        assert_eq!(MidiMessage::from_bytes(&[0x90, 60]), None);
        assert_eq!(MidiMessage::from_bytes(&[0xF8]), None);
        assert!(MidiMessage::from_bytes(&[0xC5, 3]).is_some());
    }
}
