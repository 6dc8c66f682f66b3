//! Audio mixing and level telemetry.
//!
//! The mixer pulls interleaved audio from every cue that currently has active
//! channels, sums it into a flat per-channel buffer and pushes the result into
//! the per-channel ring buffers. Level data is kept for the whole mix and for
//! each source cue.

use std::collections::BTreeSet;

use super::state::CueListState;
use crate::cue::{AudioRequest, Cue, CueState, CueUid};
use crate::property::linear_to_db;
use crate::timing::ClockTime;

/// Level of one channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelLevel {
    /// RMS of the last mixed block, in dB.
    pub rms_db: f64,
    /// Highest RMS seen since the last reset, in dB.
    pub peak_db: f64,
    /// Clock time at which `peak_db` was reached, for peak-hold decay.
    pub peak_time: ClockTime,
    /// Sticky flag: a sample exceeded unity magnitude.
    pub clipped: bool,
}

impl Default for ChannelLevel {
    fn default() -> Self {
        Self {
            rms_db: f64::NEG_INFINITY,
            peak_db: f64::NEG_INFINITY,
            peak_time: 0,
            clipped: false,
        }
    }
}

/// Per-channel RMS, peak and clip state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RmsData {
    channels: Vec<ChannelLevel>,
}

impl RmsData {
    pub fn new(channels: usize) -> Self {
        Self {
            channels: vec![ChannelLevel::default(); channels],
        }
    }

    pub fn channels(&self) -> &[ChannelLevel] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelLevel> {
        self.channels.get(index)
    }

    fn update(&mut self, channel: usize, sum_squares: f64, frames: usize, clipped: bool, now: ClockTime) {
        let Some(level) = self.channels.get_mut(channel) else {
            return;
        };
        let rms = if frames == 0 {
            0.0
        } else {
            (sum_squares / frames as f64).sqrt()
        };
        level.rms_db = linear_to_db(rms);
        if level.rms_db > level.peak_db {
            level.peak_db = level.rms_db;
            level.peak_time = now;
        }
        level.clipped |= clipped;
    }

    pub fn reset_peaks(&mut self) {
        for level in &mut self.channels {
            level.peak_db = level.rms_db;
            level.peak_time = 0;
            level.clipped = false;
        }
    }
}

/// Interleaved audio of one cue and the channels it maps to.
struct Rendered {
    channels: Vec<usize>,
    samples: Vec<f32>,
}

impl CueListState {
    /// Output channels a cue sends audio to right now. Groups report the union
    /// of their children.
    pub fn active_channels(&self, uid: CueUid) -> Vec<usize> {
        let Some(cue) = self.cues.get(&uid) else {
            return Vec::new();
        };
        if cue.kind.children().is_empty() {
            return cue.kind.active_channels(&cue.core, self.channels);
        }
        if cue.state() != CueState::PlayingAction {
            return Vec::new();
        }
        let union: BTreeSet<usize> = cue
            .kind
            .children()
            .iter()
            .flat_map(|child| self.active_channels(*child))
            .collect();
        union.into_iter().collect()
    }

    fn render(&mut self, uid: CueUid, request: &AudioRequest) -> Option<Rendered> {
        let channels = self.active_channels(uid);
        if channels.is_empty() {
            return None;
        }
        let children = self.cues.get(&uid)?.kind.children().to_vec();
        let mut samples = vec![0.0f32; request.frames * channels.len()];

        if children.is_empty() {
            let Cue { core, kind, .. } = self.cues.get_mut(&uid)?;
            let written = kind.audio(core, request, &channels, &mut samples);
            if written < request.frames {
                log::trace!("Cue {} delivered {} of {} frames", core.id, written, request.frames);
            }
            return Some(Rendered { channels, samples });
        }

        let gain = {
            let cue = self.cues.get(&uid)?;
            cue.kind.output_gain(&cue.core) as f32
        };
        let width = channels.len();
        for child in children {
            let Some(part) = self.render(child, request) else {
                continue;
            };
            let slots: Vec<usize> = part
                .channels
                .iter()
                .filter_map(|ch| channels.iter().position(|c| c == ch))
                .collect();
            for (frame, src) in part.samples.chunks_exact(part.channels.len()).enumerate() {
                for (sample, slot) in src.iter().zip(&slots) {
                    samples[frame * width + slot] += sample * gain;
                }
            }
        }
        Some(Rendered { channels, samples })
    }

    /// Mix `frames` frames from every active cue into the ring buffers.
    pub fn populate_buffers(&mut self, frames: usize, now: ClockTime) {
        let channel_count = self.channels;
        let request = AudioRequest {
            frames,
            sample_rate: self.sample_rate,
        };
        // Flat layout: channel `c` occupies mix[c * frames..(c + 1) * frames].
        let mut mix = vec![0.0f32; channel_count * frames];

        for uid in self.order.clone() {
            let Some(rendered) = self.render(uid, &request) else {
                continue;
            };
            let width = rendered.channels.len();
            let mut sums = vec![0.0f64; channel_count];
            let mut clipped = vec![false; channel_count];
            for (frame, src) in rendered.samples.chunks_exact(width).enumerate() {
                for (&sample, &channel) in src.iter().zip(&rendered.channels) {
                    sums[channel] += f64::from(sample) * f64::from(sample);
                    clipped[channel] |= sample.abs() > 1.0;
                    mix[channel * frames + frame] += sample;
                }
            }

            let data = self.rms.entry(uid).or_insert_with(|| RmsData::new(channel_count));
            for &channel in &rendered.channels {
                data.update(channel, sums[channel], frames, clipped[channel], now);
            }
        }

        for channel in 0..channel_count {
            let block = &mix[channel * frames..(channel + 1) * frames];
            let sum_squares: f64 = block.iter().map(|s| f64::from(*s) * f64::from(*s)).sum();
            let clipped = block.iter().any(|s| s.abs() > 1.0);
            self.master_rms.update(channel, sum_squares, frames, clipped, now);
            self.buffers[channel].write(block);
        }
    }

    /// Read `samples` frames of the requested channels into `out`, interleaved
    /// in the order of `channels`.
    ///
    /// Mixes more audio first if any requested channel is short. Returns the
    /// number of frames every requested channel could supply; the remainder
    /// of `out` is zero-filled.
    pub fn get_audio(&mut self, out: &mut [f32], samples: usize, channels: &[usize], now: ClockTime) -> usize {
        let width = channels.len();
        if width == 0 {
            return 0;
        }
        let samples = samples.min(out.len() / width);
        if let Some(bad) = channels.iter().find(|c| **c >= self.channels) {
            log::error!("Requested channel {} of a {}-channel list", bad, self.channels);
        }

        let short = channels
            .iter()
            .filter(|c| **c < self.channels)
            .any(|c| self.buffers[*c].available() < samples);
        if short {
            self.populate_buffers(samples, now);
        }

        let mut block = vec![0.0f32; samples];
        let mut available = samples;
        for (slot, &channel) in channels.iter().enumerate() {
            block.fill(0.0);
            let read = match self.buffers.get_mut(channel) {
                Some(ring) => ring.read(&mut block),
                None => 0,
            };
            available = available.min(read);
            for (frame, sample) in block.iter().enumerate() {
                out[frame * width + slot] = *sample;
            }
        }
        available
    }

    /// Mix one block and drain every channel. Returns one sample vector per channel.
    pub fn render_offline(&mut self, frames: usize, now: ClockTime) -> Vec<Vec<f32>> {
        self.populate_buffers(frames, now);
        self.buffers
            .iter_mut()
            .map(|ring| {
                let mut samples = vec![0.0f32; ring.available()];
                ring.read(&mut samples);
                samples
            })
            .collect()
    }
}
