//! Audio unit abstraction layer.
//!
//! This crate defines the [`Unit`] trait that processing units wrapped by a
//! unit node implement. A unit does not know about the graph: it receives
//! its output buffer and a [`UnitInput`] through which it pulls whatever is
//! connected to its input buses.
//!
//! Parameters live behind a separate [`UnitParameters`] handle so the
//! control thread can edit them while the unit renders.

use pullgraph_core::{Bus, Format, Frames, PcmBuffer, Time};
use std::sync::Arc;

/// Source of input audio handed to [`Unit::render`]
pub trait UnitInput {
    /// Render input bus `bus` into `buffer`.
    ///
    /// Returns `false` and leaves `buffer` silent when nothing renderable is
    /// connected to that bus.
    fn pull(&mut self, bus: Bus, buffer: &mut PcmBuffer<'_>) -> bool;
}

/// Information about a parameter
#[derive(Debug, Clone)]
pub struct ParameterInfo {
    pub id: u32,
    pub name: String,
    pub min_value: f32,
    pub max_value: f32,
    pub default_value: f32,
    /// Whether the parameter exists once per input bus
    pub per_element: bool,
}

/// Unit metadata
#[derive(Debug, Clone)]
pub struct UnitInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub unique_id: String,
}

/// Processing unit driven by a unit node
pub trait Unit: Send {
    /// Get unit information
    fn info(&self) -> &UnitInfo;

    /// Number of input buses the unit pulls from
    fn input_bus_count(&self) -> u32;

    /// Number of output buses the unit renders
    fn output_bus_count(&self) -> u32;

    /// Prepare for rendering `format` in slices of at most `maximum_frames`.
    ///
    /// Called on the control thread whenever the node's connections change;
    /// any scratch memory must be allocated here, never in `render`.
    fn initialize(&mut self, format: &Format, maximum_frames: Frames) -> Result<(), UnitError>;

    /// Render output bus `bus` into `output`
    fn render(
        &mut self,
        output: &mut PcmBuffer<'_>,
        bus: Bus,
        when: &Time,
        input: &mut dyn UnitInput,
    ) -> Result<(), UnitError>;

    /// Handle to the unit's parameters, shared with the control thread
    fn parameter_handle(&self) -> Arc<dyn UnitParameters>;

    /// Drop transient render state
    fn reset(&mut self);
}

/// Parameter access that never blocks a render in progress.
///
/// Implementations store values in atomics; edits become visible to the
/// unit on its next render.
pub trait UnitParameters: Send + Sync {
    /// Set a parameter value; `element` selects the bus for per-element parameters
    fn set_parameter(&self, id: u32, element: u32, value: f32) -> Result<(), UnitError>;

    /// Get a parameter value
    fn parameter(&self, id: u32, element: u32) -> Result<f32, UnitError>;

    /// Get all parameters
    fn parameters(&self) -> Vec<ParameterInfo>;
}

/// Parameter handle of a unit without parameters
#[derive(Debug, Default, Clone, Copy)]
pub struct NoParameters;

impl UnitParameters for NoParameters {
    fn set_parameter(&self, id: u32, _element: u32, _value: f32) -> Result<(), UnitError> {
        Err(UnitError::InvalidParameter(format!("Unknown parameter ID: {id}")))
    }

    fn parameter(&self, id: u32, _element: u32) -> Result<f32, UnitError> {
        Err(UnitError::InvalidParameter(format!("Unknown parameter ID: {id}")))
    }

    fn parameters(&self) -> Vec<ParameterInfo> {
        Vec::new()
    }
}

/// Unit-related errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnitError {
    #[error("Unit initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(Format),

    #[error("Unit is not initialized")]
    NotInitialized,

    #[error("Unit render failed: {0}")]
    RenderFailed(&'static str),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ConstantInput(f32);

    impl UnitInput for ConstantInput {
        fn pull(&mut self, _bus: Bus, buffer: &mut PcmBuffer<'_>) -> bool {
            for ch in 0..buffer.format().buffer_count() {
                if let Some(data) = buffer.data_mut::<f32>(ch) {
                    data.fill(self.0);
                }
            }
            true
        }
    }

    struct Invert {
        info: UnitInfo,
    }

    impl Unit for Invert {
        fn info(&self) -> &UnitInfo {
            &self.info
        }

        fn input_bus_count(&self) -> u32 {
            1
        }

        fn output_bus_count(&self) -> u32 {
            1
        }

        fn initialize(&mut self, _format: &Format, _maximum_frames: Frames) -> Result<(), UnitError> {
            Ok(())
        }

        fn render(
            &mut self,
            output: &mut PcmBuffer<'_>,
            bus: Bus,
            _when: &Time,
            input: &mut dyn UnitInput,
        ) -> Result<(), UnitError> {
            if !input.pull(bus, output) {
                return Err(UnitError::RenderFailed("input not connected"));
            }
            for ch in 0..output.format().buffer_count() {
                let data = output
                    .data_mut::<f32>(ch)
                    .ok_or(UnitError::RenderFailed("expected float32 samples"))?;
                data.iter_mut().for_each(|s| *s = -*s);
            }
            Ok(())
        }

        fn parameter_handle(&self) -> Arc<dyn UnitParameters> {
            Arc::new(NoParameters)
        }

        fn reset(&mut self) {}
    }

    #[test]
    fn test_unit_pulls_through_input() {
        let mut unit = Invert {
            info: UnitInfo {
                name: "Invert".to_string(),
                vendor: "pullgraph".to_string(),
                version: "1.0.0".to_string(),
                unique_id: "pullgraph.test.invert".to_string(),
            },
        };
        let format = Format::standard(48000.0, 2).unwrap();
        let mut output = PcmBuffer::new(format, 64).unwrap();

        unit.initialize(&format, 64).unwrap();
        unit.render(&mut output, 0, &Time::default(), &mut ConstantInput(0.5))
            .unwrap();

        assert!(output.data::<f32>(1).unwrap().iter().all(|s| *s == -0.5));
        let parameters = unit.parameter_handle();
        assert!(parameters.set_parameter(3, 0, 1.0).is_err());
        assert!(parameters.parameter(3, 0).is_err());
        assert!(parameters.parameters().is_empty());
    }
}
