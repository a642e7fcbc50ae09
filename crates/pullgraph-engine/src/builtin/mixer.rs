//! Mixer unit - sums any number of input buses.

use pullgraph_core::{Bus, Format, Frames, PcmBuffer, PcmFormat, Time};
use pullgraph_unit::{ParameterInfo, Unit, UnitError, UnitInfo, UnitInput, UnitParameters};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// N-input mixer
///
/// Pulls every input bus into a scratch buffer and adds it to the output
/// with a per-input volume, then applies the output volume.
///
/// ```text
/// Input 0 --[volume 0]--\
/// Input 1 --[volume 1]---+--[output volume]--> Output
/// Input n --[volume n]--/
/// ```
///
/// ## Parameters
///
/// All volumes range from 0.0 to 2.0 (linear, default 1.0):
/// - **0**: input volume, per element (the element is the input bus)
/// - **1**: output volume
pub struct MixerUnit {
    volumes: Arc<MixerVolumes>,
    scratch: Option<PcmBuffer<'static>>,
    info: UnitInfo,
}

/// Volumes stored as f32 bits, shared with the control thread
struct MixerVolumes {
    inputs: Vec<AtomicU32>,
    output: AtomicU32,
}

impl Default for MixerUnit {
    fn default() -> Self {
        Self::new(2)
    }
}

impl MixerUnit {
    /// Parameter ID of the per-input volume
    pub const INPUT_VOLUME: u32 = 0;
    /// Parameter ID of the output volume
    pub const OUTPUT_VOLUME: u32 = 1;

    #[must_use]
    pub fn new(input_count: u32) -> Self {
        Self {
            volumes: Arc::new(MixerVolumes {
                inputs: (0..input_count.max(1))
                    .map(|_| AtomicU32::new(1.0_f32.to_bits()))
                    .collect(),
                output: AtomicU32::new(1.0_f32.to_bits()),
            }),
            scratch: None,
            info: UnitInfo {
                name: "Mixer".to_string(),
                vendor: "pullgraph".to_string(),
                version: "1.0.0".to_string(),
                unique_id: "pullgraph.builtin.mixer".to_string(),
            },
        }
    }
}

impl MixerVolumes {
    fn volume(cell: &AtomicU32) -> f32 {
        f32::from_bits(cell.load(Ordering::Acquire))
    }

    fn cell(&self, id: u32, element: u32) -> Result<&AtomicU32, UnitError> {
        match id {
            MixerUnit::INPUT_VOLUME => self.inputs.get(element as usize).ok_or_else(|| {
                UnitError::InvalidParameter(format!("Unknown input element: {element}"))
            }),
            MixerUnit::OUTPUT_VOLUME => Ok(&self.output),
            _ => Err(UnitError::InvalidParameter(format!(
                "Unknown parameter ID: {id}"
            ))),
        }
    }
}

impl UnitParameters for MixerVolumes {
    fn set_parameter(&self, id: u32, element: u32, value: f32) -> Result<(), UnitError> {
        self.cell(id, element)?
            .store(value.clamp(0.0, 2.0).to_bits(), Ordering::Release);
        Ok(())
    }

    fn parameter(&self, id: u32, element: u32) -> Result<f32, UnitError> {
        self.cell(id, element).map(Self::volume)
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        vec![
            ParameterInfo {
                id: MixerUnit::INPUT_VOLUME,
                name: "Input Volume".to_string(),
                min_value: 0.0,
                max_value: 2.0,
                default_value: 1.0,
                per_element: true,
            },
            ParameterInfo {
                id: MixerUnit::OUTPUT_VOLUME,
                name: "Output Volume".to_string(),
                min_value: 0.0,
                max_value: 2.0,
                default_value: 1.0,
                per_element: false,
            },
        ]
    }
}

impl Unit for MixerUnit {
    fn info(&self) -> &UnitInfo {
        &self.info
    }

    fn input_bus_count(&self) -> u32 {
        self.volumes.inputs.len() as u32
    }

    fn output_bus_count(&self) -> u32 {
        1
    }

    fn initialize(&mut self, format: &Format, maximum_frames: Frames) -> Result<(), UnitError> {
        if !matches!(format.pcm_format(), PcmFormat::Float32 | PcmFormat::Float64) {
            return Err(UnitError::UnsupportedFormat(*format));
        }
        let scratch = PcmBuffer::new(*format, maximum_frames)
            .map_err(|e| UnitError::InitializationFailed(e.to_string()))?;
        self.scratch = Some(scratch);
        Ok(())
    }

    fn render(
        &mut self,
        output: &mut PcmBuffer<'_>,
        _bus: Bus,
        _when: &Time,
        input: &mut dyn UnitInput,
    ) -> Result<(), UnitError> {
        let scratch = self.scratch.as_mut().ok_or(UnitError::NotInitialized)?;
        if scratch.format() != output.format() {
            return Err(UnitError::RenderFailed(
                "output format differs from the initialized format",
            ));
        }
        scratch
            .set_frame_length(output.frame_length())
            .map_err(|_| UnitError::RenderFailed("slice exceeds maximum frames"))?;

        output.clear();
        for (bus, cell) in self.volumes.inputs.iter().enumerate() {
            if !input.pull(bus as Bus, scratch) {
                continue;
            }
            let volume = MixerVolumes::volume(cell);
            match output.format().pcm_format() {
                PcmFormat::Float64 => super::accumulate::<f64>(output, scratch, volume),
                _ => super::accumulate::<f32>(output, scratch, volume),
            }
        }

        super::scale(output, MixerVolumes::volume(&self.volumes.output));
        Ok(())
    }

    fn parameter_handle(&self) -> Arc<dyn UnitParameters> {
        Arc::clone(&self.volumes) as Arc<dyn UnitParameters>
    }

    fn reset(&mut self) {
        if let Some(scratch) = self.scratch.as_mut() {
            scratch.reset();
        }
    }
}
