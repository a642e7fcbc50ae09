//! Hardware output through cpal.
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! platform) and is driven by commands over a channel. The stream callback
//! renders into a preallocated non-interleaved buffer through the installed
//! render callback and interleaves the result into cpal's output.

use crate::device::{
    Device, DeviceError, DeviceProvider, DeviceRenderArgs, DeviceRenderCallback,
};
use arc_swap::ArcSwapOption;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use pullgraph_core::{Format, Frames, PcmBuffer, Time, time::host_time_now};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

/// Largest slice rendered per callback chunk
const MAXIMUM_CALLBACK_FRAMES: Frames = 4096;

struct CallbackSlot(DeviceRenderCallback);

struct Shared {
    callback: ArcSwapOption<CallbackSlot>,
    running: AtomicBool,
}

enum StreamCommand {
    Play(Sender<Result<(), DeviceError>>),
    Pause,
    Shutdown,
}

/// The default cpal output device
pub struct CpalDevice {
    name: String,
    format: Format,
    shared: Arc<Shared>,
    commands: Sender<StreamCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CpalDevice {
    /// Open the default output device of the default host
    pub fn default_output() -> Result<Arc<Self>, DeviceError> {
        let shared = Arc::new(Shared {
            callback: ArcSwapOption::empty(),
            running: AtomicBool::new(false),
        });
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let stream_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("pullgraph-cpal".to_string())
            .spawn(move || stream_thread(&stream_shared, &command_rx, &ready_tx))
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        let (name, format) = ready_rx
            .recv()
            .map_err(|_| DeviceError::Backend("cpal stream thread exited".to_string()))??;
        tracing::info!("Using output device: {} ({})", name, format);

        Ok(Arc::new(Self {
            name,
            format,
            shared,
            commands: command_tx,
            thread: Mutex::new(Some(handle)),
        }))
    }
}

impl Device for CpalDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_format(&self) -> Option<Format> {
        None
    }

    fn output_format(&self) -> Option<Format> {
        Some(self.format)
    }

    fn sample_rate(&self) -> f64 {
        self.format.sample_rate()
    }

    fn set_render_callback(&self, callback: Option<DeviceRenderCallback>) {
        self.shared
            .callback
            .store(callback.map(|callback| Arc::new(CallbackSlot(callback))));
    }

    fn start(&self) -> Result<(), DeviceError> {
        if self.shared.callback.load().is_none() {
            return Err(DeviceError::NotArmed);
        }
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.commands
            .send(StreamCommand::Play(reply_tx))
            .map_err(|_| DeviceError::Backend("cpal stream thread exited".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| DeviceError::Backend("cpal stream thread exited".to_string()))?
    }

    fn stop(&self) {
        if self.commands.send(StreamCommand::Pause).is_err() {
            self.shared.running.store(false, Ordering::Release);
        }
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        let _ = self.commands.send(StreamCommand::Shutdown);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!("cpal stream thread panicked");
            }
        }
    }
}

fn stream_thread(
    shared: &Arc<Shared>,
    commands: &Receiver<StreamCommand>,
    ready: &Sender<Result<(String, Format), DeviceError>>,
) {
    let (stream, name, format) = match open_default_output(shared) {
        Ok(opened) => opened,
        Err(e) => {
            tracing::error!("Failed to open output device: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok((name, format)));

    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| DeviceError::StartFailed(e.to_string()));
                if result.is_ok() {
                    shared.running.store(true, Ordering::Release);
                    tracing::info!("Audio stream started");
                }
                let _ = reply.send(result);
            }
            StreamCommand::Pause => {
                shared.running.store(false, Ordering::Release);
                if let Err(e) = stream.pause() {
                    tracing::error!("Failed to pause audio stream: {}", e);
                }
                tracing::info!("Audio stream stopped");
            }
            StreamCommand::Shutdown => break,
        }
    }

    shared.running.store(false, Ordering::Release);
    drop(stream);
}

fn open_default_output(
    shared: &Arc<Shared>,
) -> Result<(cpal::Stream, String, Format), DeviceError> {
    let host = cpal::default_host();
    tracing::debug!("Using audio host: {}", host.id().name());

    let device = host
        .default_output_device()
        .ok_or_else(|| DeviceError::NotFound("no default output device".to_string()))?;
    let name = device
        .name()
        .map_err(|e| DeviceError::Backend(e.to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| DeviceError::Backend(e.to_string()))?;
    if supported.sample_format() != cpal::SampleFormat::F32 {
        tracing::warn!(
            "Device {} prefers {:?}, requesting f32",
            name,
            supported.sample_format()
        );
    }

    let config: cpal::StreamConfig = supported.config();
    let channels = u32::from(config.channels);
    let sample_rate = f64::from(config.sample_rate.0);
    let format = Format::standard(sample_rate, channels)
        .map_err(|e| DeviceError::Backend(e.to_string()))?;
    tracing::debug!("Stream config: {:?}", config);

    let mut buffer = PcmBuffer::new(format, MAXIMUM_CALLBACK_FRAMES)
        .map_err(|e| DeviceError::Backend(e.to_string()))?;
    let callback_shared = Arc::clone(shared);
    let mut sample_time: i64 = 0;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                // No logging or allocation past this point
                let slot = callback_shared.callback.load();
                let callback = match &*slot {
                    Some(slot) if callback_shared.running.load(Ordering::Acquire) => &slot.0,
                    _ => {
                        data.fill(0.0);
                        return;
                    }
                };

                let stride = channels as usize;
                for chunk in data.chunks_mut(stride * MAXIMUM_CALLBACK_FRAMES as usize) {
                    let frames = chunk.len() / stride;
                    if buffer.set_frame_length(frames as Frames).is_err() {
                        chunk.fill(0.0);
                        continue;
                    }

                    let when = Time::new(host_time_now(), sample_time, sample_rate);
                    callback(DeviceRenderArgs {
                        output: Some(&mut buffer),
                        input: None,
                        when: &when,
                    });
                    sample_time += frames as i64;

                    for ch in 0..channels {
                        let Some(samples) = buffer.data::<f32>(ch) else {
                            continue;
                        };
                        for (frame, sample) in samples.iter().enumerate() {
                            chunk[frame * stride + ch as usize] = *sample;
                        }
                    }
                }
            },
            move |err| {
                tracing::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| DeviceError::Backend(e.to_string()))?;

    Ok((stream, name, format))
}

/// [`DeviceProvider`] exposing the default cpal output device
#[derive(Debug, Default)]
pub struct CpalProvider;

impl DeviceProvider for CpalProvider {
    fn devices(&self) -> Vec<Arc<dyn Device>> {
        match CpalDevice::default_output() {
            Ok(device) => vec![device as Arc<dyn Device>],
            Err(e) => {
                tracing::warn!("No cpal output device: {}", e);
                Vec::new()
            }
        }
    }
}
