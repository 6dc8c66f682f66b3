//! Audio device enumeration and output.
//!
//! The cue list never pushes audio. An [`AudioOutput`] opens a cpal output
//! stream whose callback pulls interleaved frames through
//! [`CueListGuard::get_audio`](crate::cue_list::CueListGuard::get_audio).

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::cue_list::CueListHandle;
use crate::error::{Error, Result};

const COMMON_RATES: [u32; 7] = [22050, 44100, 48000, 88200, 96000, 176400, 192000];

/// Information about an output device.
#[derive(Clone, Debug)]
pub struct AudioDeviceInfo {
    /// Device name (as reported by the system)
    pub name: String,
    pub max_output_channels: u32,
    /// Supported sample rates among the common ones (sorted)
    pub sample_rates: Vec<u32>,
    pub is_default_output: bool,
}

/// List output devices, the default one first.
pub fn list_output_devices() -> Result<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    for device in host
        .output_devices()
        .map_err(|e| Error::Audio(format!("Failed to enumerate devices: {}", e)))?
    {
        let Ok(name) = device.name() else {
            continue;
        };
        let Ok(configs) = device.supported_output_configs() else {
            continue;
        };
        let mut max_output_channels = 0;
        let mut sample_rates = Vec::new();
        for config in configs {
            max_output_channels = max_output_channels.max(u32::from(config.channels()));
            let (min, max) = (config.min_sample_rate(), config.max_sample_rate());
            for rate in COMMON_RATES {
                if rate >= min && rate <= max && !sample_rates.contains(&rate) {
                    sample_rates.push(rate);
                }
            }
        }
        if max_output_channels == 0 {
            continue;
        }
        sample_rates.sort_unstable();
        let is_default_output = default_name.as_ref().is_some_and(|d| d == &name);
        devices.push(AudioDeviceInfo {
            name,
            max_output_channels,
            sample_rates,
            is_default_output,
        });
    }

    devices.sort_by(|a, b| {
        b.is_default_output
            .cmp(&a.is_default_output)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(devices)
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| Error::Audio("No default output device".to_string())),
        Some(name) => {
            let needle = name.to_lowercase();
            host.output_devices()
                .map_err(|e| Error::Audio(format!("Failed to enumerate devices: {}", e)))?
                .find(|d| d.name().is_ok_and(|n| n.to_lowercase().contains(&needle)))
                .ok_or_else(|| Error::Audio(format!("No output device matching '{}'", name)))
        }
    }
}

/// A running output stream fed by a cue list.
///
/// The stream stops when this is dropped.
pub struct AudioOutput {
    stream: cpal::Stream,
    device_name: String,
    channels: usize,
    sample_rate: u32,
}

impl AudioOutput {
    /// Open `device` (default output when None) with `channels` channels and
    /// start pulling audio from the list behind `handle`.
    pub fn start(handle: CueListHandle, device: Option<&str>, channels: usize, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(Error::Audio("Output needs at least one channel".to_string()));
        }
        let device = find_output_device(device)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        let channel_count =
            u16::try_from(channels).map_err(|_| Error::Audio(format!("Too many channels: {}", channels)))?;
        let config = cpal::StreamConfig {
            channels: channel_count,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let channel_map: Vec<usize> = (0..channels).collect();
        let mut underruns: u64 = 0;
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    let filled = handle
                        .with_lock(|list| list.get_audio(data, frames, &channel_map))
                        .unwrap_or(0);
                    if filled < frames {
                        underruns += 1;
                        log::trace!("Audio underrun #{} ({} of {} frames)", underruns, filled, frames);
                    }
                    data[filled * channels..].fill(0.0);
                },
                |err| log::error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| Error::Audio(format!("Failed to open output stream on {}: {}", device_name, e)))?;
        stream
            .play()
            .map_err(|e| Error::Audio(format!("Failed to start output stream: {}", e)))?;

        log::info!(
            "Audio output on {} ({} channels, {} Hz)",
            device_name,
            channels,
            sample_rate
        );
        Ok(Self {
            stream,
            device_name,
            channels,
            sample_rate,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn pause(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| Error::Audio(format!("Failed to pause output stream: {}", e)))
    }
}
