//! Moving normalized interleaved samples in and out of PCM buffers.

use pullgraph_core::{PcmBuffer, PcmFormat, Sample};

/// Value of 1.0 in 8.24 fixed point
const FIXED_824_ONE: f64 = 16_777_216.0;

/// Sample types convertible to and from a nominal -1.0..=1.0 range
pub(crate) trait Normalized: Sample {
    fn from_normalized(value: f64) -> Self;
    fn to_normalized(self) -> f64;
}

impl Normalized for f32 {
    fn from_normalized(value: f64) -> Self {
        value as Self
    }

    fn to_normalized(self) -> f64 {
        f64::from(self)
    }
}

impl Normalized for f64 {
    fn from_normalized(value: f64) -> Self {
        value
    }

    fn to_normalized(self) -> f64 {
        self
    }
}

impl Normalized for i16 {
    fn from_normalized(value: f64) -> Self {
        (value.clamp(-1.0, 1.0) * f64::from(Self::MAX)).round() as Self
    }

    fn to_normalized(self) -> f64 {
        f64::from(self) / f64::from(Self::MAX)
    }
}

impl Normalized for i32 {
    fn from_normalized(value: f64) -> Self {
        (value * FIXED_824_ONE)
            .round()
            .clamp(f64::from(Self::MIN), f64::from(Self::MAX)) as Self
    }

    fn to_normalized(self) -> f64 {
        f64::from(self) / FIXED_824_ONE
    }
}

/// Distribute interleaved samples over the buffer's valid frames
pub(crate) fn scatter(buffer: &mut PcmBuffer<'_>, interleaved: &[f64]) {
    match buffer.format().pcm_format() {
        PcmFormat::Float32 => scatter_as::<f32>(buffer, interleaved),
        PcmFormat::Float64 => scatter_as::<f64>(buffer, interleaved),
        PcmFormat::Int16 => scatter_as::<i16>(buffer, interleaved),
        PcmFormat::Fixed824 => scatter_as::<i32>(buffer, interleaved),
    }
}

/// Collect the buffer's valid frames as interleaved samples
pub(crate) fn gather(buffer: &PcmBuffer<'_>, interleaved: &mut Vec<f64>) {
    match buffer.format().pcm_format() {
        PcmFormat::Float32 => gather_as::<f32>(buffer, interleaved),
        PcmFormat::Float64 => gather_as::<f64>(buffer, interleaved),
        PcmFormat::Int16 => gather_as::<i16>(buffer, interleaved),
        PcmFormat::Fixed824 => gather_as::<i32>(buffer, interleaved),
    }
}

fn scatter_as<T: Normalized>(buffer: &mut PcmBuffer<'_>, interleaved: &[f64]) {
    let format = *buffer.format();
    let channels = format.channel_count() as usize;

    if format.is_interleaved() {
        if let Some(data) = buffer.data_mut::<T>(0) {
            for (sample, value) in data.iter_mut().zip(interleaved) {
                *sample = T::from_normalized(*value);
            }
        }
        return;
    }

    for ch in 0..channels {
        let Some(data) = buffer.data_mut::<T>(ch as u32) else {
            continue;
        };
        let values = interleaved.iter().skip(ch).step_by(channels);
        for (sample, value) in data.iter_mut().zip(values) {
            *sample = T::from_normalized(*value);
        }
    }
}

fn gather_as<T: Normalized>(buffer: &PcmBuffer<'_>, interleaved: &mut Vec<f64>) {
    let format = *buffer.format();
    let channels = format.channel_count() as usize;
    interleaved.clear();
    interleaved.resize(buffer.frame_length() as usize * channels, 0.0);

    if format.is_interleaved() {
        if let Some(data) = buffer.data::<T>(0) {
            for (value, sample) in interleaved.iter_mut().zip(data) {
                *value = sample.to_normalized();
            }
        }
        return;
    }

    for ch in 0..channels {
        let Some(data) = buffer.data::<T>(ch as u32) else {
            continue;
        };
        for (frame, sample) in data.iter().enumerate() {
            interleaved[frame * channels + ch] = sample.to_normalized();
        }
    }
}
