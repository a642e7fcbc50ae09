//! Hardware device abstraction.
//!
//! A [`Device`] owns a real-time callback that periodically asks for output
//! samples and hands over captured input. The device I/O node installs that
//! callback; backends (cpal, or [`ManualDevice`] for tests and hosts that
//! drive rendering themselves) only need to invoke it.

use parking_lot::Mutex;
use pullgraph_comms::{Observer, Subject};
use pullgraph_core::{Format, PcmBuffer, Time};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Buffers for one device render cycle
pub struct DeviceRenderArgs<'r, 'b> {
    /// Output to fill, absent for input-only devices
    pub output: Option<&'r mut PcmBuffer<'b>>,
    /// Captured input, absent for output-only devices
    pub input: Option<&'r mut PcmBuffer<'b>>,
    pub when: &'r Time,
}

/// Callback a device invokes on its render thread
pub type DeviceRenderCallback = Arc<dyn Fn(DeviceRenderArgs<'_, '_>) + Send + Sync>;

/// An audio device
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    /// Format of captured input, `None` without input channels
    fn input_format(&self) -> Option<Format>;

    /// Format the device expects to render, `None` without output channels
    fn output_format(&self) -> Option<Format>;

    fn sample_rate(&self) -> f64;

    /// Install or remove the render callback
    fn set_render_callback(&self, callback: Option<DeviceRenderCallback>);

    fn start(&self) -> Result<(), DeviceError>;

    fn stop(&self);

    fn is_running(&self) -> bool;
}

/// Device-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device has no render callback")]
    NotArmed,

    #[error("Device failed to start: {0}")]
    StartFailed(String),

    #[error("Audio backend error: {0}")]
    Backend(String),
}

/// Source of devices for a [`DeviceRegistry`]
pub trait DeviceProvider: Send + Sync {
    /// Enumerate the devices currently present
    fn devices(&self) -> Vec<Arc<dyn Device>>;

    /// The device output should go to when nothing else was chosen
    fn default_output_device(&self) -> Option<Arc<dyn Device>> {
        self.devices()
            .into_iter()
            .find(|device| device.output_format().is_some())
    }
}

/// Notifications emitted by a [`DeviceRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMethod {
    HardwareDidChange,
}

/// Cached device enumeration with change notification
pub struct DeviceRegistry {
    provider: Box<dyn DeviceProvider>,
    devices: Mutex<Option<Vec<Arc<dyn Device>>>>,
    subject: Subject<DeviceMethod, ()>,
}

impl DeviceRegistry {
    pub fn new(provider: impl DeviceProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            devices: Mutex::new(None),
            subject: Subject::new(),
        }
    }

    /// All devices, enumerated on first use
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        let mut devices = self.devices.lock();
        devices
            .get_or_insert_with(|| {
                let found = self.provider.devices();
                tracing::debug!("Enumerated {} audio devices", found.len());
                found
            })
            .clone()
    }

    pub fn device_named(&self, name: &str) -> Option<Arc<dyn Device>> {
        self.devices().into_iter().find(|device| device.name() == name)
    }

    pub fn default_output_device(&self) -> Option<Arc<dyn Device>> {
        self.provider.default_output_device()
    }

    /// Drop the cached enumeration and notify [`DeviceMethod::HardwareDidChange`]
    pub fn invalidate(&self) {
        *self.devices.lock() = None;
        tracing::info!("Audio hardware changed");
        self.subject.notify(&DeviceMethod::HardwareDidChange, &());
    }

    pub fn observe<F>(&self, method: DeviceMethod, handler: F) -> Observer
    where
        F: Fn(&DeviceMethod, &()) + Send + Sync + 'static,
    {
        self.subject.observe(method, handler)
    }
}

/// Device whose render cycles are driven by the caller.
///
/// Useful for tests and for hosts that own their own audio thread.
pub struct ManualDevice {
    name: String,
    input_format: Option<Format>,
    output_format: Option<Format>,
    callback: Mutex<Option<DeviceRenderCallback>>,
    running: AtomicBool,
}

impl ManualDevice {
    pub fn new(
        name: impl Into<String>,
        input_format: Option<Format>,
        output_format: Option<Format>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            input_format,
            output_format,
            callback: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Whether a render callback is installed
    pub fn has_render_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Run one render cycle; returns `false` if stopped or unarmed
    pub fn render_cycle<'b>(
        &self,
        output: Option<&mut PcmBuffer<'b>>,
        input: Option<&mut PcmBuffer<'b>>,
        when: &Time,
    ) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        let Some(callback) = self.callback.lock().clone() else {
            return false;
        };

        callback(DeviceRenderArgs {
            output,
            input,
            when,
        });
        true
    }
}

impl Device for ManualDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_format(&self) -> Option<Format> {
        self.input_format
    }

    fn output_format(&self) -> Option<Format> {
        self.output_format
    }

    fn sample_rate(&self) -> f64 {
        self.output_format
            .or(self.input_format)
            .map_or(0.0, |format| format.sample_rate())
    }

    fn set_render_callback(&self, callback: Option<DeviceRenderCallback>) {
        *self.callback.lock() = callback;
    }

    fn start(&self) -> Result<(), DeviceError> {
        if !self.has_render_callback() {
            return Err(DeviceError::NotArmed);
        }
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingProvider {
        enumerations: Arc<AtomicUsize>,
        device: Arc<ManualDevice>,
    }

    impl DeviceProvider for CountingProvider {
        fn devices(&self) -> Vec<Arc<dyn Device>> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            vec![self.device.clone() as Arc<dyn Device>]
        }
    }

    fn stereo() -> Format {
        Format::standard(48000.0, 2).unwrap()
    }

    #[test]
    fn test_registry_caches_until_invalidated() {
        let enumerations = Arc::new(AtomicUsize::new(0));
        let registry = DeviceRegistry::new(CountingProvider {
            enumerations: Arc::clone(&enumerations),
            device: ManualDevice::new("speakers", None, Some(stereo())),
        });

        let changes = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&changes);
        let _observer = registry.observe(DeviceMethod::HardwareDidChange, move |_, ()| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.devices().len(), 1);
        assert!(registry.device_named("speakers").is_some());
        assert!(registry.device_named("microphone").is_none());
        assert_eq!(enumerations.load(Ordering::SeqCst), 1);

        registry.invalidate();
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        let _ = registry.devices();
        assert_eq!(enumerations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_output_device_requires_output() {
        let registry = DeviceRegistry::new(CountingProvider {
            enumerations: Arc::new(AtomicUsize::new(0)),
            device: ManualDevice::new("microphone", Some(stereo()), None),
        });
        assert!(registry.default_output_device().is_none());
    }

    #[test]
    fn test_manual_device_requires_callback() {
        let device = ManualDevice::new("manual", None, Some(stereo()));
        assert!(matches!(device.start(), Err(DeviceError::NotArmed)));
        assert_eq!(device.sample_rate(), 48000.0);

        let cycles = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&cycles);
        device.set_render_callback(Some(Arc::new(move |args: DeviceRenderArgs<'_, '_>| {
            if let Some(output) = args.output {
                output.clear();
            }
            c.fetch_add(1, Ordering::SeqCst);
        })));
        device.start().unwrap();

        let mut buffer = PcmBuffer::new(stereo(), 32).unwrap();
        assert!(device.render_cycle(Some(&mut buffer), None, &Time::default()));
        device.stop();
        assert!(!device.render_cycle(Some(&mut buffer), None, &Time::default()));
        assert_eq!(cycles.load(Ordering::SeqCst), 1);
    }
}
