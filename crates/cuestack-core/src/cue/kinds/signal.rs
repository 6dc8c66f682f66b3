//! Test-signal audio source.

use std::f64::consts::TAU;

use crate::cue::{AudioRequest, CueContext, CueCore, CueKind, CueState};
use crate::property::{
    db_to_linear, decibel_validator, Property, PropertyStore, PropertyValue, PropertyVersion,
};

const PLAYBACK_PROPERTIES: [&str; 6] = [
    "waveform",
    "frequency",
    "amplitude",
    "play_volume",
    "first_channel",
    "channel_count",
];

/// Waveform of a [`SignalCue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Waveform {
    Constant,
    Sine,
}

impl Waveform {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "constant" => Some(Self::Constant),
            "sine" => Some(Self::Sine),
            _ => None,
        }
    }
}

/// Generates a constant level or a sine tone on a block of output channels.
#[derive(Debug, Default)]
pub struct SignalCue {
    phase: f64,
}

impl SignalCue {
    pub const CLASS: &'static str = "SignalCue";

    fn channel_range(core: &CueCore, version: PropertyVersion) -> (usize, usize) {
        let first = core.properties.get_or("first_channel", version, 0u32) as usize;
        let count = core.properties.get_or("channel_count", version, 0u32) as usize;
        (first, count)
    }
}

impl CueKind for SignalCue {
    fn class_name(&self) -> &'static str {
        Self::CLASS
    }

    fn define_properties(&self, properties: &mut PropertyStore) {
        properties.add(
            Property::new("waveform", Self::CLASS, PropertyValue::String("sine".into())).with_validator(
                |_, value| match value {
                    PropertyValue::String(name) => {
                        let name = name.to_lowercase();
                        if Waveform::parse(&name).is_some() {
                            PropertyValue::String(name)
                        } else {
                            log::warn!("Unknown waveform '{}', using sine", name);
                            PropertyValue::String("sine".into())
                        }
                    }
                    other => other,
                },
            ),
        );
        properties.add(Property::new("frequency", Self::CLASS, PropertyValue::Double(440.0)));
        properties.add(
            Property::new("amplitude", Self::CLASS, PropertyValue::Double(0.0)).with_validator(decibel_validator),
        );
        properties.add(Property::new("play_volume", Self::CLASS, PropertyValue::Double(1.0)));
        properties.add(Property::new("first_channel", Self::CLASS, PropertyValue::UInt32(0)));
        properties.add(Property::new("channel_count", Self::CLASS, PropertyValue::UInt32(2)));
    }

    fn on_play(&mut self, core: &mut CueCore, resumed: bool, _ctx: &mut CueContext<'_>) {
        if !resumed {
            core.properties.copy_to_live(&PLAYBACK_PROPERTIES);
            self.phase = 0.0;
        }
    }

    fn error(&self, core: &CueCore) -> Option<String> {
        let (_, count) = Self::channel_range(core, PropertyVersion::Defined);
        (count == 0).then(|| "No output channels".to_string())
    }

    fn active_channels(&self, core: &CueCore, channel_count: usize) -> Vec<usize> {
        if core.state() != CueState::PlayingAction {
            return Vec::new();
        }
        let (first, count) = Self::channel_range(core, PropertyVersion::Live);
        (first..first.saturating_add(count).min(channel_count)).collect()
    }

    fn audio(&mut self, core: &CueCore, request: &AudioRequest, channels: &[usize], out: &mut [f32]) -> usize {
        let live = PropertyVersion::Live;
        let waveform = core
            .properties
            .get::<String>("waveform", live)
            .ok()
            .and_then(|name| Waveform::parse(&name))
            .unwrap_or(Waveform::Sine);
        let gain = db_to_linear(core.properties.get_or("amplitude", live, 0.0))
            * core.properties.get_or("play_volume", live, 1.0);
        let step = TAU * core.properties.get_or("frequency", live, 440.0) / request.sample_rate.max(1) as f64;

        let width = channels.len();
        if width == 0 {
            return 0;
        }
        let frames = request.frames.min(out.len() / width);
        for frame in out.chunks_exact_mut(width).take(frames) {
            let sample = match waveform {
                Waveform::Constant => gain,
                Waveform::Sine => gain * self.phase.sin(),
            } as f32;
            frame.fill(sample);
            self.phase = (self.phase + step) % TAU;
        }
        frames
    }

    fn field(&self, core: &CueCore, name: &str) -> Option<String> {
        match name {
            "channels" => {
                let (first, count) = Self::channel_range(core, PropertyVersion::Defined);
                Some(format!("{}-{}", first + 1, first + count))
            }
            _ => core.base_field(name),
        }
    }

    fn icon(&self, core: &CueCore) -> &'static str {
        match core.state() {
            CueState::PlayingAction => "audio-volume-high",
            CueState::Error => "dialog-error",
            _ => "audio-x-generic",
        }
    }
}
