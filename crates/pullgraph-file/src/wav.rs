//! WAV files through hound.

use crate::convert;
use crate::{
    AudioFile, CreateArgs, CreateError, FileSettings, OpenArgs, OpenError, ReadError, WriteError,
};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use pullgraph_core::{Format, Frames, PcmBuffer, StreamDescription};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

enum Handle {
    Reader(WavReader<BufReader<File>>),
    Writer(WavWriter<BufWriter<File>>),
}

/// WAV file handle
#[derive(Default)]
pub struct WavFile {
    handle: Option<Handle>,
    path: Option<PathBuf>,
    spec: Option<WavSpec>,
    processing_format: Option<Format>,
    length: u64,
    position: u64,
    scratch: Vec<f64>,
}

impl WavFile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A new handle opened with `args`
    pub fn opened(args: OpenArgs) -> Result<Self, OpenError> {
        let mut file = Self::new();
        file.open(args)?;
        Ok(file)
    }

    /// A new handle created with `args`
    pub fn created(args: CreateArgs) -> Result<Self, CreateError> {
        let mut file = Self::new();
        file.create(args)?;
        Ok(file)
    }

    /// Path of the open file
    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

fn is_supported(spec: &WavSpec) -> bool {
    match spec.sample_format {
        SampleFormat::Float => spec.bits_per_sample == 32,
        SampleFormat::Int => matches!(spec.bits_per_sample, 8 | 16 | 24 | 32),
    }
}

/// Full scale of an integer sample of `bits` bits
fn int_scale(bits: u16) -> f64 {
    (1_i64 << (bits - 1)) as f64
}

impl AudioFile for WavFile {
    fn open(&mut self, args: OpenArgs) -> Result<(), OpenError> {
        if self.handle.is_some() {
            return Err(OpenError::Opened);
        }
        if args.path.as_os_str().is_empty() {
            return Err(OpenError::InvalidArgument("path is empty"));
        }

        let reader =
            WavReader::open(&args.path).map_err(|e| OpenError::OpenFailed(e.to_string()))?;
        let spec = reader.spec();
        if !is_supported(&spec) {
            return Err(OpenError::OpenFailed(format!(
                "unsupported sample layout: {} bit {:?}",
                spec.bits_per_sample, spec.sample_format
            )));
        }
        let format = Format::new(
            f64::from(spec.sample_rate),
            u32::from(spec.channels),
            args.pcm_format,
            args.interleaved,
        )
        .map_err(|e| OpenError::OpenFailed(e.to_string()))?;

        self.length = u64::from(reader.duration());
        self.position = 0;
        self.spec = Some(spec);
        self.processing_format = Some(format);
        self.handle = Some(Handle::Reader(reader));
        tracing::debug!(
            "Opened {} ({} frames, processing {})",
            args.path.display(),
            self.length,
            format
        );
        self.path = Some(args.path);
        Ok(())
    }

    fn create(&mut self, args: CreateArgs) -> Result<(), CreateError> {
        if self.handle.is_some() {
            return Err(CreateError::Created);
        }
        if args.path.as_os_str().is_empty() {
            return Err(CreateError::InvalidArgument("path is empty"));
        }

        let FileSettings {
            sample_rate,
            channel_count,
            bits_per_sample,
            is_float,
        } = args.settings;
        let spec = WavSpec {
            channels: channel_count,
            sample_rate,
            bits_per_sample,
            sample_format: if is_float {
                SampleFormat::Float
            } else {
                SampleFormat::Int
            },
        };
        if sample_rate == 0 || channel_count == 0 || !is_supported(&spec) {
            return Err(CreateError::InvalidArgument("unsupported file settings"));
        }
        let format = Format::new(
            f64::from(sample_rate),
            u32::from(channel_count),
            args.pcm_format,
            args.interleaved,
        )
        .map_err(|_| CreateError::InvalidArgument("invalid processing format"))?;

        let writer = WavWriter::create(&args.path, spec)
            .map_err(|e| CreateError::CreateFailed(e.to_string()))?;

        self.length = 0;
        self.position = 0;
        self.spec = Some(spec);
        self.processing_format = Some(format);
        self.handle = Some(Handle::Writer(writer));
        tracing::debug!("Created {} (processing {})", args.path.display(), format);
        self.path = Some(args.path);
        Ok(())
    }

    fn close(&mut self) {
        match self.handle.take() {
            Some(Handle::Writer(writer)) => {
                if let Err(e) = writer.finalize() {
                    tracing::error!("Failed to finalize WAV file: {}", e);
                }
            }
            Some(Handle::Reader(_)) | None => {}
        }
        if let Some(path) = self.path.take() {
            tracing::debug!("Closed {}", path.display());
        }
        self.spec = None;
        self.processing_format = None;
        self.length = 0;
        self.position = 0;
    }

    fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn file_format(&self) -> Option<StreamDescription> {
        self.spec.map(|spec| {
            FileSettings {
                sample_rate: spec.sample_rate,
                channel_count: spec.channels,
                bits_per_sample: spec.bits_per_sample,
                is_float: spec.sample_format == SampleFormat::Float,
            }
            .stream_description()
        })
    }

    fn processing_format(&self) -> Option<Format> {
        self.processing_format
    }

    fn processing_length(&self) -> u64 {
        self.length
    }

    fn file_frame_position(&self) -> u64 {
        self.position
    }

    fn set_file_frame_position(&mut self, position: u64) -> Result<(), ReadError> {
        let reader = match self.handle.as_mut() {
            None => return Err(ReadError::Closed),
            Some(Handle::Writer(_)) => {
                return Err(ReadError::InvalidArgument("file was created for writing"));
            }
            Some(Handle::Reader(reader)) => reader,
        };
        if position > self.length {
            return Err(ReadError::InvalidArgument("position is past the end of the file"));
        }
        if position == self.position {
            return Ok(());
        }

        let frame = u32::try_from(position).map_err(|_| ReadError::TellFailed)?;
        reader
            .seek(frame)
            .map_err(|e| ReadError::ReadFailed(e.to_string()))?;
        self.position = position;
        Ok(())
    }

    fn read_into_buffer(
        &mut self,
        buffer: &mut PcmBuffer<'_>,
        frame_length: Frames,
    ) -> Result<(), ReadError> {
        let reader = match self.handle.as_mut() {
            None => return Err(ReadError::Closed),
            Some(Handle::Writer(_)) => {
                return Err(ReadError::InvalidArgument("file was created for writing"));
            }
            Some(Handle::Reader(reader)) => reader,
        };
        if self.processing_format.as_ref() != Some(buffer.format()) {
            return Err(ReadError::InvalidFormat);
        }
        if frame_length > buffer.frame_capacity() {
            return Err(ReadError::FrameLengthOutOfRange);
        }

        let requested = if frame_length > 0 {
            frame_length
        } else {
            buffer.frame_capacity()
        };
        let remaining = self.length.saturating_sub(self.position);
        let frames = u64::from(requested).min(remaining) as usize;
        let spec = reader.spec();
        let channels = usize::from(spec.channels);
        let wanted = frames * channels;

        self.scratch.clear();
        let mut failure = None;
        match spec.sample_format {
            SampleFormat::Float => {
                for sample in reader.samples::<f32>().take(wanted) {
                    match sample {
                        Ok(value) => self.scratch.push(f64::from(value)),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }
            SampleFormat::Int => {
                let scale = int_scale(spec.bits_per_sample);
                for sample in reader.samples::<i32>().take(wanted) {
                    match sample {
                        Ok(value) => self.scratch.push(f64::from(value) / scale),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }
        }

        let read_frames = self.scratch.len() / channels;
        buffer
            .set_frame_length(read_frames as Frames)
            .map_err(|_| ReadError::FrameLengthOutOfRange)?;
        convert::scatter(buffer, &self.scratch[..read_frames * channels]);
        self.position += read_frames as u64;

        match failure {
            Some(e) => Err(ReadError::ReadFailed(e.to_string())),
            None => Ok(()),
        }
    }

    fn write_from_buffer(&mut self, buffer: &PcmBuffer<'_>) -> Result<(), WriteError> {
        let writer = match self.handle.as_mut() {
            None => return Err(WriteError::Closed),
            Some(Handle::Reader(_)) => {
                return Err(WriteError::InvalidArgument("file was opened for reading"));
            }
            Some(Handle::Writer(writer)) => writer,
        };
        if self.processing_format.as_ref() != Some(buffer.format()) {
            return Err(WriteError::InvalidFormat);
        }

        convert::gather(buffer, &mut self.scratch);
        let spec = writer.spec();
        match spec.sample_format {
            SampleFormat::Float => {
                for value in &self.scratch {
                    writer
                        .write_sample(*value as f32)
                        .map_err(|e| WriteError::WriteFailed(e.to_string()))?;
                }
            }
            SampleFormat::Int => {
                let peak = int_scale(spec.bits_per_sample) - 1.0;
                for value in &self.scratch {
                    let sample = (value.clamp(-1.0, 1.0) * peak).round() as i32;
                    writer
                        .write_sample(sample)
                        .map_err(|e| WriteError::WriteFailed(e.to_string()))?;
                }
            }
        }

        let frames = u64::from(buffer.frame_length());
        self.length += frames;
        self.position += frames;
        Ok(())
    }
}

impl Drop for WavFile {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pullgraph_core::PcmFormat;
    use std::path::Path;

    fn ramp(format: Format, frames: u32) -> PcmBuffer<'static> {
        let mut buffer = PcmBuffer::new(format, frames).unwrap();
        for ch in 0..format.channel_count() {
            let data = buffer.data_mut::<f32>(ch).unwrap();
            for (i, sample) in data.iter_mut().enumerate() {
                *sample = (i as f32 / frames as f32) * if ch == 0 { 1.0 } else { -1.0 };
            }
        }
        buffer
    }

    fn write_ramp(path: &Path, settings: FileSettings, frames: u32) {
        let format = Format::standard(f64::from(settings.sample_rate), 2).unwrap();
        let mut file = WavFile::created(CreateArgs::new(path, settings)).unwrap();
        assert_eq!(file.processing_format(), Some(format));
        file.write_from_buffer(&ramp(format, frames)).unwrap();
        assert_eq!(file.processing_length(), u64::from(frames));
        file.close();
    }

    #[test]
    fn test_float_write_then_read_in_slices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        write_ramp(&path, FileSettings::float32(48000, 2), 100);

        let mut file = WavFile::opened(OpenArgs::new(&path)).unwrap();
        assert_eq!(file.processing_length(), 100);
        let desc = file.file_format().unwrap();
        assert!(desc.is_float);
        assert_eq!(desc.bits_per_channel, 32);

        let format = file.processing_format().unwrap();
        let expected = ramp(format, 100);
        let mut buffer = PcmBuffer::new(format, 64).unwrap();

        file.read_into_buffer(&mut buffer, 0).unwrap();
        assert_eq!(buffer.frame_length(), 64);
        assert_eq!(
            buffer.data::<f32>(1).unwrap(),
            &expected.data::<f32>(1).unwrap()[..64]
        );
        assert_eq!(file.file_frame_position(), 64);

        file.read_into_buffer(&mut buffer, 0).unwrap();
        assert_eq!(buffer.frame_length(), 36);
        assert_eq!(
            buffer.data::<f32>(0).unwrap(),
            &expected.data::<f32>(0).unwrap()[64..]
        );

        file.read_into_buffer(&mut buffer, 0).unwrap();
        assert_eq!(buffer.frame_length(), 0);
    }

    #[test]
    fn test_int16_file_into_interleaved_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp16.wav");
        write_ramp(&path, FileSettings::int16(44100, 2), 10);

        let mut file = WavFile::opened(OpenArgs::new(&path).interleaved(true)).unwrap();
        assert_eq!(file.file_format().unwrap().bits_per_channel, 16);
        let format = file.processing_format().unwrap();
        assert!(format.is_interleaved());

        let mut buffer = PcmBuffer::new(format, 10).unwrap();
        file.read_into_buffer(&mut buffer, 4).unwrap();
        assert_eq!(buffer.frame_length(), 4);

        let data = buffer.data::<f32>(0).unwrap();
        assert_eq!(data.len(), 8);
        for frame in 0..4 {
            let want = frame as f32 / 10.0;
            assert!((data[frame * 2] - want).abs() < 1e-3);
            assert!((data[frame * 2 + 1] + want).abs() < 1e-3);
        }
    }

    #[test]
    fn test_seek() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seek.wav");
        write_ramp(&path, FileSettings::float32(48000, 2), 50);

        let mut file = WavFile::opened(OpenArgs::new(&path)).unwrap();
        file.set_file_frame_position(40).unwrap();
        assert_eq!(file.file_frame_position(), 40);

        let format = file.processing_format().unwrap();
        let mut buffer = PcmBuffer::new(format, 32).unwrap();
        file.read_into_buffer(&mut buffer, 0).unwrap();
        assert_eq!(buffer.frame_length(), 10);
        assert!(matches!(
            file.set_file_frame_position(51),
            Err(ReadError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_open_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("open.wav");
        write_ramp(&path, FileSettings::float32(48000, 2), 8);

        let mut file = WavFile::new();
        assert!(matches!(
            file.open(OpenArgs::new("")),
            Err(OpenError::InvalidArgument(_))
        ));
        assert!(matches!(
            file.open(OpenArgs::new(dir.path().join("missing.wav"))),
            Err(OpenError::OpenFailed(_))
        ));
        file.open(OpenArgs::new(&path)).unwrap();
        assert!(matches!(
            file.open(OpenArgs::new(&path)),
            Err(OpenError::Opened)
        ));
        assert!(matches!(
            file.create(CreateArgs::new(&path, FileSettings::float32(48000, 2))),
            Err(CreateError::Created)
        ));
    }

    #[test]
    fn test_create_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = WavFile::new();
        let mut settings = FileSettings::float32(48000, 2);
        settings.bits_per_sample = 64;
        assert!(matches!(
            file.create(CreateArgs::new(dir.path().join("a.wav"), settings)),
            Err(CreateError::InvalidArgument(_))
        ));
        assert!(matches!(
            file.create(CreateArgs::new(
                dir.path().join("missing").join("a.wav"),
                FileSettings::int16(48000, 1)
            )),
            Err(CreateError::CreateFailed(_))
        ));
        assert!(!file.is_open());
    }

    #[test]
    fn test_read_and_write_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rw.wav");
        let format = Format::standard(48000.0, 2).unwrap();
        let mut buffer = PcmBuffer::new(format, 16).unwrap();

        let mut file = WavFile::new();
        assert!(matches!(
            file.read_into_buffer(&mut buffer, 0),
            Err(ReadError::Closed)
        ));
        assert!(matches!(
            file.write_from_buffer(&buffer),
            Err(WriteError::Closed)
        ));

        file.create(CreateArgs::new(&path, FileSettings::float32(48000, 2)))
            .unwrap();
        let other = Format::new(48000.0, 2, PcmFormat::Float64, false).unwrap();
        let wrong = PcmBuffer::new(other, 16).unwrap();
        assert!(matches!(
            file.write_from_buffer(&wrong),
            Err(WriteError::InvalidFormat)
        ));
        assert!(matches!(
            file.read_into_buffer(&mut buffer, 0),
            Err(ReadError::InvalidArgument(_))
        ));
        file.write_from_buffer(&buffer).unwrap();
        file.close();

        file.open(OpenArgs::new(&path)).unwrap();
        assert!(matches!(
            file.read_into_buffer(&mut buffer, 17),
            Err(ReadError::FrameLengthOutOfRange)
        ));
        let mut wrong = PcmBuffer::new(other, 16).unwrap();
        assert!(matches!(
            file.read_into_buffer(&mut wrong, 0),
            Err(ReadError::InvalidFormat)
        ));
        assert!(matches!(
            file.write_from_buffer(&buffer),
            Err(WriteError::InvalidArgument(_))
        ));
    }
}
