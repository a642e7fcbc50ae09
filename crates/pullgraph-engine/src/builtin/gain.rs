//! Gain unit - simple volume control.

use pullgraph_core::{Bus, Format, Frames, PcmBuffer, PcmFormat, Time};
use pullgraph_unit::{ParameterInfo, Unit, UnitError, UnitInfo, UnitInput, UnitParameters};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Simple gain/volume unit
///
/// Pulls its single input in place and multiplies every sample by a gain
/// factor. Works on float32 and float64 streams of any channel count.
///
/// ## Parameter Range
///
/// Gain: 0.0 to 2.0 (linear)
/// - 0.0 = silence (−∞ dB)
/// - 1.0 = unity gain (0 dB, default)
/// - 2.0 = double amplitude (+6 dB)
pub struct GainUnit {
    parameters: Arc<GainParameters>,
    info: UnitInfo,
}

/// Gain stored as f32 bits, shared with the control thread
struct GainParameters {
    gain: AtomicU32,
}

impl Default for GainUnit {
    fn default() -> Self {
        Self {
            parameters: Arc::new(GainParameters {
                gain: AtomicU32::new(1.0_f32.to_bits()),
            }),
            info: UnitInfo {
                name: "Gain".to_string(),
                vendor: "pullgraph".to_string(),
                version: "1.0.0".to_string(),
                unique_id: "pullgraph.builtin.gain".to_string(),
            },
        }
    }
}

impl GainUnit {
    /// Parameter ID of the gain
    pub const GAIN: u32 = 0;

    fn gain(&self) -> f32 {
        self.parameters.gain()
    }
}

impl GainParameters {
    fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Acquire))
    }
}

impl UnitParameters for GainParameters {
    fn set_parameter(&self, id: u32, _element: u32, value: f32) -> Result<(), UnitError> {
        match id {
            GainUnit::GAIN => {
                self.gain
                    .store(value.clamp(0.0, 2.0).to_bits(), Ordering::Release);
                Ok(())
            }
            _ => Err(UnitError::InvalidParameter(format!(
                "Unknown parameter ID: {id}"
            ))),
        }
    }

    fn parameter(&self, id: u32, _element: u32) -> Result<f32, UnitError> {
        match id {
            GainUnit::GAIN => Ok(self.gain()),
            _ => Err(UnitError::InvalidParameter(format!(
                "Unknown parameter ID: {id}"
            ))),
        }
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![ParameterInfo {
            id: GainUnit::GAIN,
            name: "Gain".to_string(),
            min_value: 0.0,
            max_value: 2.0,
            default_value: 1.0,
            per_element: false,
        }]
    }
}

impl Unit for GainUnit {
    fn info(&self) -> &UnitInfo {
        &self.info
    }

    fn input_bus_count(&self) -> u32 {
        1
    }

    fn output_bus_count(&self) -> u32 {
        1
    }

    fn initialize(&mut self, format: &Format, _maximum_frames: Frames) -> Result<(), UnitError> {
        match format.pcm_format() {
            PcmFormat::Float32 | PcmFormat::Float64 => Ok(()),
            PcmFormat::Int16 | PcmFormat::Fixed824 => Err(UnitError::UnsupportedFormat(*format)),
        }
    }

    fn render(
        &mut self,
        output: &mut PcmBuffer<'_>,
        _bus: Bus,
        _when: &Time,
        input: &mut dyn UnitInput,
    ) -> Result<(), UnitError> {
        if input.pull(0, output) {
            super::scale(output, self.gain());
        }
        Ok(())
    }

    fn parameter_handle(&self) -> Arc<dyn UnitParameters> {
        Arc::clone(&self.parameters) as Arc<dyn UnitParameters>
    }

    fn reset(&mut self) {}
}
