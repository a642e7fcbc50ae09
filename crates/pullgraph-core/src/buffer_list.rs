//! External buffer descriptors.
//!
//! A [`BufferList`] is the hand-over shape used by device and file layers:
//! a list of sample buffers, each carrying a channel count and a byte size
//! that tells how much of the storage holds valid frames.

use crate::format::{Format, PcmFormat};
use crate::pcm_buffer::PcmBufferError;
use crate::sample::{Lane, SampleData};
use smallvec::SmallVec;

/// One buffer of a [`BufferList`]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    number_channels: u32,
    data_byte_size: u32,
    data: SampleData,
}

impl AudioBuffer {
    /// Allocate a zeroed buffer holding `frame_capacity` frames
    #[must_use]
    pub fn new(pcm_format: PcmFormat, number_channels: u32, frame_capacity: u32) -> Self {
        let len = number_channels as usize * frame_capacity as usize;
        Self::from_data(number_channels, SampleData::zeroed(pcm_format, len))
    }

    /// Wrap existing samples; the byte size covers all of them
    #[must_use]
    pub fn from_data(number_channels: u32, data: SampleData) -> Self {
        Self {
            number_channels,
            data_byte_size: data.byte_len() as u32,
            data,
        }
    }

    #[must_use]
    pub const fn number_channels(&self) -> u32 {
        self.number_channels
    }

    /// Bytes of valid sample data
    #[must_use]
    pub const fn data_byte_size(&self) -> u32 {
        self.data_byte_size
    }

    pub fn set_data_byte_size(&mut self, size: u32) {
        self.data_byte_size = size;
    }

    #[must_use]
    pub const fn data(&self) -> &SampleData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut SampleData {
        &mut self.data
    }

    #[must_use]
    pub const fn pcm_format(&self) -> PcmFormat {
        self.data.pcm_format()
    }

    /// Frames the underlying storage can hold
    #[must_use]
    pub fn frame_capacity(&self) -> u32 {
        if self.number_channels == 0 {
            return 0;
        }
        (self.data.len() / self.number_channels as usize) as u32
    }

    pub(crate) fn set_frame_length(&mut self, frame_length: u32) {
        let bytes = frame_length as usize
            * self.number_channels as usize
            * self.pcm_format().sample_byte_count();
        self.data_byte_size = bytes as u32;
    }
}

/// A list of sample buffers making up one multi-channel stream
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BufferList {
    buffers: SmallVec<[AudioBuffer; 2]>,
}

impl BufferList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed list laid out for `format`
    #[must_use]
    pub fn allocate(format: &Format, frame_capacity: u32) -> Self {
        let buffers = (0..format.buffer_count())
            .map(|_| AudioBuffer::new(format.pcm_format(), format.stride(), frame_capacity))
            .collect();
        Self { buffers }
    }

    pub fn push(&mut self, buffer: AudioBuffer) {
        self.buffers.push(buffer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    #[must_use]
    pub fn buffers(&self) -> &[AudioBuffer] {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut [AudioBuffer] {
        &mut self.buffers
    }

    /// Total number of channels across all buffers
    #[must_use]
    pub fn channel_count(&self) -> u32 {
        self.buffers.iter().map(AudioBuffer::number_channels).sum()
    }

    /// Frame length implied by the byte sizes of all buffers.
    ///
    /// Every buffer must agree on the frame length and its byte size must be
    /// backed by storage.
    pub fn frame_length(&self) -> Result<u32, PcmBufferError> {
        self.agreed_frames(|buffer| buffer.data_byte_size as usize)
    }

    /// Frame length the list would have with every byte size reset to its
    /// full storage
    pub(crate) fn storage_frame_length(&self) -> Result<u32, PcmBufferError> {
        self.agreed_frames(|buffer| buffer.data.byte_len())
    }

    fn agreed_frames(
        &self,
        byte_size: impl Fn(&AudioBuffer) -> usize,
    ) -> Result<u32, PcmBufferError> {
        let mut frame_length = None;

        for buffer in &self.buffers {
            if buffer.number_channels == 0 {
                return Err(PcmBufferError::InvalidDescriptor("buffer without channels"));
            }
            let bytes = byte_size(buffer);
            if bytes > buffer.data.byte_len() {
                return Err(PcmBufferError::InvalidDescriptor(
                    "byte size exceeds buffer storage",
                ));
            }

            let frames =
                bytes / buffer.number_channels as usize / buffer.pcm_format().sample_byte_count();
            match frame_length {
                None => frame_length = Some(frames as u32),
                Some(length) if length as usize != frames => {
                    return Err(PcmBufferError::InvalidDescriptor(
                        "buffers disagree on frame length",
                    ));
                }
                Some(_) => {}
            }
        }

        frame_length.ok_or(PcmBufferError::InvalidArgument("buffer list is empty"))
    }

    /// Set every buffer's byte size to cover `frame_length` frames
    pub(crate) fn set_frame_length(&mut self, frame_length: u32) {
        for buffer in &mut self.buffers {
            buffer.set_frame_length(frame_length);
        }
    }

    /// Locate a channel by flat index across buffers
    pub(crate) fn lane(&self, channel: u32) -> Option<(usize, Lane)> {
        let mut first = 0;
        for (index, buffer) in self.buffers.iter().enumerate() {
            let count = buffer.number_channels;
            if channel < first + count {
                return Some((
                    index,
                    Lane {
                        offset: (channel - first) as usize,
                        stride: count as usize,
                    },
                ));
            }
            first += count;
        }
        None
    }

    /// Check that this list can back a buffer of `format`
    pub(crate) fn matches_layout(&self, format: &Format) -> bool {
        self.buffers.len() == format.buffer_count() as usize
            && self.buffers.iter().all(|b| {
                b.number_channels == format.stride() && b.pcm_format() == format.pcm_format()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_matches_format() {
        let format = Format::new(48000.0, 2, PcmFormat::Float32, false).unwrap();
        let list = BufferList::allocate(&format, 256);
        assert_eq!(list.len(), 2);
        assert_eq!(list.channel_count(), 2);
        assert_eq!(list.frame_length().unwrap(), 256);
        assert!(list.matches_layout(&format));

        let interleaved = Format::new(48000.0, 2, PcmFormat::Int16, true).unwrap();
        let list = BufferList::allocate(&interleaved, 128);
        assert_eq!(list.len(), 1);
        assert_eq!(list.buffers()[0].data_byte_size(), 128 * 2 * 2);
        assert_eq!(list.frame_length().unwrap(), 128);
    }

    #[test]
    fn test_inconsistent_frame_lengths() {
        let mut list = BufferList::new();
        list.push(AudioBuffer::new(PcmFormat::Float32, 1, 64));
        list.push(AudioBuffer::new(PcmFormat::Float32, 1, 32));
        assert!(matches!(
            list.frame_length(),
            Err(PcmBufferError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_byte_size_beyond_storage() {
        let mut list = BufferList::new();
        let mut buffer = AudioBuffer::new(PcmFormat::Float32, 1, 16);
        buffer.set_data_byte_size(1024);
        list.push(buffer);
        assert!(matches!(
            list.frame_length(),
            Err(PcmBufferError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn test_empty_list() {
        assert!(matches!(
            BufferList::new().frame_length(),
            Err(PcmBufferError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_lane_lookup() {
        let mut list = BufferList::new();
        list.push(AudioBuffer::new(PcmFormat::Float32, 2, 8));
        list.push(AudioBuffer::new(PcmFormat::Float32, 1, 8));

        assert_eq!(list.lane(1), Some((0, Lane { offset: 1, stride: 2 })));
        assert_eq!(list.lane(2), Some((1, Lane { offset: 0, stride: 1 })));
        assert_eq!(list.lane(3), None);
    }
}
