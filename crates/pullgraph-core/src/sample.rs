//! Typed sample storage.

use crate::format::PcmFormat;
use std::fmt;
use std::ops::Range;

/// Size in bytes of the shared silence region used by remapped buffer views
pub const SILENCE_BYTE_COUNT: usize = 4096 * 4;

static SILENCE_F32: [f32; SILENCE_BYTE_COUNT / 4] = [0.0; SILENCE_BYTE_COUNT / 4];
static SILENCE_F64: [f64; SILENCE_BYTE_COUNT / 8] = [0.0; SILENCE_BYTE_COUNT / 8];
static SILENCE_I16: [i16; SILENCE_BYTE_COUNT / 2] = [0; SILENCE_BYTE_COUNT / 2];
static SILENCE_I32: [i32; SILENCE_BYTE_COUNT / 4] = [0; SILENCE_BYTE_COUNT / 4];

/// Contiguous sample memory of one buffer, tagged with its representation
#[derive(Debug, Clone, PartialEq)]
pub enum SampleData {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Int16(Vec<i16>),
    Fixed824(Vec<i32>),
}

impl SampleData {
    /// Allocate `len` zeroed samples
    #[must_use]
    pub fn zeroed(pcm_format: PcmFormat, len: usize) -> Self {
        match pcm_format {
            PcmFormat::Float32 => Self::Float32(vec![0.0; len]),
            PcmFormat::Float64 => Self::Float64(vec![0.0; len]),
            PcmFormat::Int16 => Self::Int16(vec![0; len]),
            PcmFormat::Fixed824 => Self::Fixed824(vec![0; len]),
        }
    }

    #[must_use]
    pub const fn pcm_format(&self) -> PcmFormat {
        match self {
            Self::Float32(_) => PcmFormat::Float32,
            Self::Float64(_) => PcmFormat::Float64,
            Self::Int16(_) => PcmFormat::Int16,
            Self::Fixed824(_) => PcmFormat::Fixed824,
        }
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Int16(v) => v.len(),
            Self::Fixed824(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the storage in bytes
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.len() * self.pcm_format().sample_byte_count()
    }

    /// Zero every `stride`-th sample starting at `offset` within `frames`
    pub(crate) fn zero_strided(&mut self, frames: Range<usize>, offset: usize, stride: usize) {
        match self {
            Self::Float32(v) => zero_strided(v, frames, offset, stride),
            Self::Float64(v) => zero_strided(v, frames, offset, stride),
            Self::Int16(v) => zero_strided(v, frames, offset, stride),
            Self::Fixed824(v) => zero_strided(v, frames, offset, stride),
        }
    }
}

/// Where one channel lives inside a [`SampleData`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lane {
    pub offset: usize,
    pub stride: usize,
}

/// A frame window over one channel lane
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    pub lane: Lane,
    pub start: usize,
}

/// Copy `frames` frames between two lanes of identically typed storage.
///
/// Returns `false` if the representations differ.
pub(crate) fn copy_lane(
    from: &SampleData,
    from_window: Window,
    to: &mut SampleData,
    to_window: Window,
    frames: usize,
) -> bool {
    match (from, to) {
        (SampleData::Float32(a), SampleData::Float32(b)) => {
            strided_copy(a, from_window, b, to_window, frames);
        }
        (SampleData::Float64(a), SampleData::Float64(b)) => {
            strided_copy(a, from_window, b, to_window, frames);
        }
        (SampleData::Int16(a), SampleData::Int16(b)) => {
            strided_copy(a, from_window, b, to_window, frames);
        }
        (SampleData::Fixed824(a), SampleData::Fixed824(b)) => {
            strided_copy(a, from_window, b, to_window, frames);
        }
        _ => return false,
    }
    true
}

fn strided_copy<T: Copy>(from: &[T], from_window: Window, to: &mut [T], to_window: Window, frames: usize) {
    if frames == 0 {
        return;
    }
    let (fl, tl) = (from_window.lane, to_window.lane);
    if fl.stride == 1 && tl.stride == 1 {
        let src = fl.offset + from_window.start;
        let dst = tl.offset + to_window.start;
        to[dst..dst + frames].copy_from_slice(&from[src..src + frames]);
        return;
    }

    let src = from[fl.offset + from_window.start * fl.stride..]
        .iter()
        .step_by(fl.stride);
    let dst = to[tl.offset + to_window.start * tl.stride..]
        .iter_mut()
        .step_by(tl.stride);
    for (d, s) in dst.zip(src).take(frames) {
        *d = *s;
    }
}

fn zero_strided<T: Copy + Default>(data: &mut [T], frames: Range<usize>, offset: usize, stride: usize) {
    if frames.is_empty() {
        return;
    }
    if stride == 1 {
        data[offset + frames.start..offset + frames.end].fill(T::default());
        return;
    }
    data[offset + frames.start * stride..]
        .iter_mut()
        .step_by(stride)
        .take(frames.len())
        .for_each(|s| *s = T::default());
}

/// A sample type that can be read from and written to [`SampleData`]
pub trait Sample: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Representation this type corresponds to
    const PCM_FORMAT: PcmFormat;

    fn samples(data: &SampleData) -> Option<&[Self]>;

    fn samples_mut(data: &mut SampleData) -> Option<&mut [Self]>;

    /// Shared read-only silence, [`SILENCE_BYTE_COUNT`] bytes long
    fn silence() -> &'static [Self];
}

macro_rules! impl_sample {
    ($ty:ty, $variant:ident, $silence:ident) => {
        impl Sample for $ty {
            const PCM_FORMAT: PcmFormat = PcmFormat::$variant;

            fn samples(data: &SampleData) -> Option<&[Self]> {
                match data {
                    SampleData::$variant(v) => Some(v.as_slice()),
                    _ => None,
                }
            }

            fn samples_mut(data: &mut SampleData) -> Option<&mut [Self]> {
                match data {
                    SampleData::$variant(v) => Some(v.as_mut_slice()),
                    _ => None,
                }
            }

            fn silence() -> &'static [Self] {
                &$silence
            }
        }
    };
}

impl_sample!(f32, Float32, SILENCE_F32);
impl_sample!(f64, Float64, SILENCE_F64);
impl_sample!(i16, Int16, SILENCE_I16);
impl_sample!(i32, Fixed824, SILENCE_I32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_storage() {
        let data = SampleData::zeroed(PcmFormat::Int16, 10);
        assert_eq!(data.len(), 10);
        assert_eq!(data.byte_len(), 20);
        assert_eq!(data.pcm_format(), PcmFormat::Int16);
        assert_eq!(i16::samples(&data).unwrap(), &[0; 10]);
        assert!(f32::samples(&data).is_none());
    }

    #[test]
    fn test_silence_regions_share_byte_size() {
        assert_eq!(f32::silence().len() * 4, SILENCE_BYTE_COUNT);
        assert_eq!(f64::silence().len() * 8, SILENCE_BYTE_COUNT);
        assert_eq!(i16::silence().len() * 2, SILENCE_BYTE_COUNT);
        assert_eq!(i32::silence().len() * 4, SILENCE_BYTE_COUNT);
    }

    #[test]
    fn test_copy_lane_interleaved_to_planar() {
        // 3 frames of interleaved stereo: L = 1,2,3  R = 10,20,30
        let from = SampleData::Float32(vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
        let mut to = SampleData::zeroed(PcmFormat::Float32, 3);

        let copied = copy_lane(
            &from,
            Window {
                lane: Lane { offset: 1, stride: 2 },
                start: 0,
            },
            &mut to,
            Window {
                lane: Lane { offset: 0, stride: 1 },
                start: 0,
            },
            3,
        );

        assert!(copied);
        assert_eq!(f32::samples(&to).unwrap(), &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_copy_lane_rejects_mixed_types() {
        let from = SampleData::Float32(vec![1.0; 4]);
        let mut to = SampleData::Float64(vec![0.0; 4]);
        let window = Window {
            lane: Lane { offset: 0, stride: 1 },
            start: 0,
        };
        assert!(!copy_lane(&from, window, &mut to, window, 4));
    }

    #[test]
    fn test_zero_strided_only_touches_lane() {
        let mut data = SampleData::Int16(vec![1; 8]);
        data.zero_strided(1..3, 1, 2);
        assert_eq!(i16::samples(&data).unwrap(), &[1, 1, 1, 0, 1, 0, 1, 1]);
    }
}
