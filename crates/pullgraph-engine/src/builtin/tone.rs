//! Tone unit - sine generator.

use pullgraph_core::{Bus, Format, Frames, PcmBuffer, PcmFormat, Time};
use pullgraph_unit::{ParameterInfo, Unit, UnitError, UnitInfo, UnitInput, UnitParameters};
use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Sine wave source with no inputs
///
/// Every channel carries the same signal.
///
/// ## Parameters
///
/// - **0**: frequency in Hz (20.0 to 20000.0, default 440.0)
/// - **1**: amplitude (0.0 to 1.0, default 0.5)
pub struct ToneUnit {
    parameters: Arc<ToneParameters>,
    sample_rate: f64,
    phase: f64,
    info: UnitInfo,
}

impl Default for ToneUnit {
    fn default() -> Self {
        Self {
            parameters: Arc::new(ToneParameters {
                frequency: AtomicU32::new(440.0_f32.to_bits()),
                amplitude: AtomicU32::new(0.5_f32.to_bits()),
            }),
            sample_rate: 0.0,
            phase: 0.0,
            info: UnitInfo {
                name: "Tone".to_string(),
                vendor: "pullgraph".to_string(),
                version: "1.0.0".to_string(),
                unique_id: "pullgraph.builtin.tone".to_string(),
            },
        }
    }
}

impl ToneUnit {
    pub const FREQUENCY: u32 = 0;
    pub const AMPLITUDE: u32 = 1;

    /// Write one slice; returns the phase after the last frame
    fn write<T: pullgraph_core::Sample>(
        output: &mut PcmBuffer<'_>,
        phase: f64,
        step: f64,
        amplitude: f64,
        convert: impl Fn(f64) -> T,
    ) -> f64 {
        let stride = output.format().stride() as usize;
        let mut end = phase;
        for ch in 0..output.format().buffer_count() {
            let Some(data) = output.data_mut::<T>(ch) else {
                continue;
            };
            let mut current = phase;
            for frame in data.chunks_mut(stride) {
                frame.fill(convert(amplitude * current.sin()));
                current = (current + step) % TAU;
            }
            end = current;
        }
        end
    }
}

impl Unit for ToneUnit {
    fn info(&self) -> &UnitInfo {
        &self.info
    }

    fn input_bus_count(&self) -> u32 {
        0
    }

    fn output_bus_count(&self) -> u32 {
        1
    }

    fn initialize(&mut self, format: &Format, _maximum_frames: Frames) -> Result<(), UnitError> {
        if !matches!(format.pcm_format(), PcmFormat::Float32 | PcmFormat::Float64) {
            return Err(UnitError::UnsupportedFormat(*format));
        }
        self.sample_rate = format.sample_rate();
        self.phase = 0.0;
        Ok(())
    }

    fn render(
        &mut self,
        output: &mut PcmBuffer<'_>,
        _bus: Bus,
        _when: &Time,
        _input: &mut dyn UnitInput,
    ) -> Result<(), UnitError> {
        if self.sample_rate <= 0.0 {
            return Err(UnitError::NotInitialized);
        }
        let step = TAU * f64::from(load(&self.parameters.frequency)) / self.sample_rate;
        let amplitude = f64::from(load(&self.parameters.amplitude));

        self.phase = match output.format().pcm_format() {
            PcmFormat::Float32 => {
                Self::write::<f32>(output, self.phase, step, amplitude, |v| v as f32)
            }
            PcmFormat::Float64 => Self::write::<f64>(output, self.phase, step, amplitude, |v| v),
            PcmFormat::Int16 | PcmFormat::Fixed824 => {
                return Err(UnitError::UnsupportedFormat(*output.format()));
            }
        };
        Ok(())
    }

    fn parameter_handle(&self) -> Arc<dyn UnitParameters> {
        Arc::clone(&self.parameters) as Arc<dyn UnitParameters>
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// Frequency and amplitude stored as f32 bits, shared with the control thread
struct ToneParameters {
    frequency: AtomicU32,
    amplitude: AtomicU32,
}

fn load(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Acquire))
}

impl UnitParameters for ToneParameters {
    fn set_parameter(&self, id: u32, _element: u32, value: f32) -> Result<(), UnitError> {
        match id {
            ToneUnit::FREQUENCY => self
                .frequency
                .store(value.clamp(20.0, 20000.0).to_bits(), Ordering::Release),
            ToneUnit::AMPLITUDE => self
                .amplitude
                .store(value.clamp(0.0, 1.0).to_bits(), Ordering::Release),
            _ => {
                return Err(UnitError::InvalidParameter(format!(
                    "Unknown parameter ID: {id}"
                )));
            }
        }
        Ok(())
    }

    fn parameter(&self, id: u32, _element: u32) -> Result<f32, UnitError> {
        match id {
            ToneUnit::FREQUENCY => Ok(load(&self.frequency)),
            ToneUnit::AMPLITUDE => Ok(load(&self.amplitude)),
            _ => Err(UnitError::InvalidParameter(format!(
                "Unknown parameter ID: {id}"
            ))),
        }
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![
            ParameterInfo {
                id: ToneUnit::FREQUENCY,
                name: "Frequency".to_string(),
                min_value: 20.0,
                max_value: 20000.0,
                default_value: 440.0,
                per_element: false,
            },
            ParameterInfo {
                id: ToneUnit::AMPLITUDE,
                name: "Amplitude".to_string(),
                min_value: 0.0,
                max_value: 1.0,
                default_value: 0.5,
                per_element: false,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoInput;

    impl UnitInput for NoInput {
        fn pull(&mut self, _bus: Bus, buffer: &mut PcmBuffer<'_>) -> bool {
            buffer.clear();
            false
        }
    }

    #[test]
    fn test_tone_is_continuous_across_slices() {
        let format = Format::standard(48000.0, 2).unwrap();
        let mut tone = ToneUnit::default();
        tone.initialize(&format, 64).unwrap();
        let parameters = tone.parameter_handle();
        parameters.set_parameter(ToneUnit::FREQUENCY, 0, 1000.0).unwrap();
        parameters.set_parameter(ToneUnit::AMPLITUDE, 0, 1.0).unwrap();

        let mut first = PcmBuffer::new(format, 24).unwrap();
        let mut second = PcmBuffer::new(format, 24).unwrap();
        tone.render(&mut first, 0, &Time::default(), &mut NoInput).unwrap();
        tone.render(&mut second, 0, &Time::default(), &mut NoInput).unwrap();

        // 1 kHz at 48 kHz: 48 samples per cycle, so the second slice is the
        // negated first half-cycle
        let a = first.data::<f32>(0).unwrap();
        let b = second.data::<f32>(1).unwrap();
        assert_eq!(a[0], 0.0);
        assert!((a[12] - 1.0).abs() < 1e-5);
        for (x, y) in a.iter().zip(b) {
            assert!((x + y).abs() < 1e-4);
        }
    }

    #[test]
    fn test_tone_interleaved() {
        let format = Format::new(48000.0, 2, PcmFormat::Float32, true).unwrap();
        let mut tone = ToneUnit::default();
        tone.initialize(&format, 64).unwrap();

        let mut output = PcmBuffer::new(format, 16).unwrap();
        tone.render(&mut output, 0, &Time::default(), &mut NoInput).unwrap();

        let data = output.data::<f32>(0).unwrap();
        assert_eq!(data.len(), 32);
        for frame in data.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert!(data.iter().all(|s| s.abs() <= 0.5));
    }

    #[test]
    fn test_render_requires_initialize() {
        let format = Format::standard(48000.0, 1).unwrap();
        let mut tone = ToneUnit::default();
        let mut output = PcmBuffer::new(format, 16).unwrap();
        assert_eq!(
            tone.render(&mut output, 0, &Time::default(), &mut NoInput),
            Err(UnitError::NotInitialized)
        );
    }
}
