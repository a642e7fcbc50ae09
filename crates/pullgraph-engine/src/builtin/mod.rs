//! Built-in processing units.
//!
//! These are small, essential units implemented directly in Rust. They
//! implement the same [`Unit`] trait as any other unit and are hosted by a
//! [`crate::nodes::UnitNode`].

pub mod gain;
pub mod mixer;
pub mod tone;

pub use gain::GainUnit;
pub use mixer::MixerUnit;
pub use tone::ToneUnit;

use pullgraph_core::{PcmBuffer, PcmFormat, Sample};
use pullgraph_unit::Unit;
use std::ops::{AddAssign, Mul};

/// Create a built-in unit by name
///
/// Returns `None` if the name doesn't match any known built-in unit.
///
/// # Examples
///
/// ```
/// use pullgraph_engine::builtin;
///
/// let gain = builtin::create_builtin("gain").expect("gain unit exists");
/// assert_eq!(gain.info().name, "Gain");
/// ```
pub fn create_builtin(name: &str) -> Option<Box<dyn Unit>> {
    match name {
        "gain" => Some(Box::new(GainUnit::default())),
        "mixer" => Some(Box::new(MixerUnit::default())),
        "tone" => Some(Box::new(ToneUnit::default())),
        _ => None,
    }
}

/// Multiply every valid sample by `factor`; integer formats are left alone
pub(crate) fn scale(buffer: &mut PcmBuffer<'_>, factor: f32) {
    match buffer.format().pcm_format() {
        PcmFormat::Float32 => scale_as::<f32>(buffer, factor),
        PcmFormat::Float64 => scale_as::<f64>(buffer, factor),
        PcmFormat::Int16 | PcmFormat::Fixed824 => {}
    }
}

fn scale_as<T>(buffer: &mut PcmBuffer<'_>, factor: f32)
where
    T: Sample + Mul<Output = T> + From<f32>,
{
    let factor = T::from(factor);
    for ch in 0..buffer.format().buffer_count() {
        if let Some(data) = buffer.data_mut::<T>(ch) {
            data.iter_mut().for_each(|s| *s = *s * factor);
        }
    }
}

/// Add `input * volume` into `output`
pub(crate) fn accumulate<T>(output: &mut PcmBuffer<'_>, input: &PcmBuffer<'_>, volume: f32)
where
    T: Sample + Mul<Output = T> + AddAssign + From<f32>,
{
    let volume = T::from(volume);
    for ch in 0..output.format().buffer_count() {
        if let (Some(source), Some(destination)) = (input.data::<T>(ch), output.data_mut::<T>(ch)) {
            for (d, s) in destination.iter_mut().zip(source) {
                *d += *s * volume;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pullgraph_core::Format;

    #[test]
    fn test_create_builtins() {
        assert!(create_builtin("gain").is_some());
        assert!(create_builtin("mixer").is_some());
        assert!(create_builtin("tone").is_some());
    }

    #[test]
    fn test_unknown_builtin() {
        assert!(create_builtin("nonexistent").is_none());
    }

    #[test]
    fn test_scale_float64() {
        let format = Format::new(48000.0, 2, PcmFormat::Float64, false).unwrap();
        let mut buffer = PcmBuffer::new(format, 8).unwrap();
        buffer.data_mut::<f64>(1).unwrap().fill(0.5);

        scale(&mut buffer, 0.5);
        assert!(buffer.data::<f64>(1).unwrap().iter().all(|s| *s == 0.25));
    }

    #[test]
    fn test_accumulate_sums() {
        let format = Format::standard(48000.0, 1).unwrap();
        let mut output = PcmBuffer::new(format, 8).unwrap();
        let mut input = PcmBuffer::new(format, 8).unwrap();
        output.data_mut::<f32>(0).unwrap().fill(0.25);
        input.data_mut::<f32>(0).unwrap().fill(0.5);

        accumulate::<f32>(&mut output, &input, 0.5);
        assert!(output.data::<f32>(0).unwrap().iter().all(|s| *s == 0.5));
    }
}
