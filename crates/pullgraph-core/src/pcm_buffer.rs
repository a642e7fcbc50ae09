//! PCM buffers.
//!
//! A [`PcmBuffer`] pairs a [`Format`] with sample storage. The storage is
//! one of:
//!
//! - owned, allocated up front with a fixed frame capacity;
//! - borrowed from a caller-owned [`BufferList`] (device callbacks, files);
//! - a channel-remapped view over another buffer's storage, where unmapped
//!   channels read from a shared silence region.
//!
//! Copy and clear operations never allocate, so buffers can be reused on the
//! render thread.

use crate::buffer_list::BufferList;
use crate::format::{Format, PcmFormat};
use crate::sample::{Lane, SILENCE_BYTE_COUNT, Sample, SampleData, Window, copy_lane};
use smallvec::SmallVec;
use std::ops::Range;

/// Channel map of a remapped view: view channel -> source channel, `None` for silence
pub type ChannelMap = SmallVec<[Option<u32>; 8]>;

#[derive(Debug)]
enum Storage<'a> {
    Owned(BufferList),
    Borrowed(&'a mut BufferList),
    View {
        list: &'a mut BufferList,
        /// View channel -> buffer index in `list`
        channel_map: ChannelMap,
    },
}

impl Storage<'_> {
    fn list(&self) -> &BufferList {
        match self {
            Self::Owned(list) => list,
            Self::Borrowed(list) | Self::View { list, .. } => list,
        }
    }

    fn list_mut(&mut self) -> &mut BufferList {
        match self {
            Self::Owned(list) => list,
            Self::Borrowed(list) | Self::View { list, .. } => list,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Location {
    Lane { buffer: usize, lane: Lane },
    Silence,
}

const PLANAR: Lane = Lane {
    offset: 0,
    stride: 1,
};

/// Multi-channel sample buffer with a format
#[derive(Debug)]
pub struct PcmBuffer<'a> {
    format: Format,
    frame_capacity: u32,
    frame_length: u32,
    storage: Storage<'a>,
}

impl PcmBuffer<'static> {
    /// Allocate a zeroed buffer; the frame length starts at `frame_capacity`
    pub fn new(format: Format, frame_capacity: u32) -> Result<Self, PcmBufferError> {
        if frame_capacity == 0 {
            return Err(PcmBufferError::InvalidArgument(
                "frame capacity must be greater than zero",
            ));
        }

        Ok(Self {
            format,
            frame_capacity,
            frame_length: frame_capacity,
            storage: Storage::Owned(BufferList::allocate(&format, frame_capacity)),
        })
    }
}

impl<'a> PcmBuffer<'a> {
    /// Wrap caller-owned storage.
    ///
    /// The frame capacity and length are derived from the byte sizes of the
    /// list's buffers.
    pub fn wrap(format: Format, list: &'a mut BufferList) -> Result<Self, PcmBufferError> {
        if list.is_empty() {
            return Err(PcmBufferError::InvalidArgument("buffer list is empty"));
        }
        if !list.matches_layout(&format) {
            return Err(PcmBufferError::InvalidFormat(
                "buffer list layout does not match format",
            ));
        }
        let frame_length = list.frame_length()?;

        Ok(Self {
            format,
            frame_capacity: frame_length,
            frame_length,
            storage: Storage::Borrowed(list),
        })
    }

    /// Create a channel-remapped view over `source`.
    ///
    /// Channel `i` of the view aliases channel `channel_map[i]` of `source`;
    /// a `None` entry reads silence and discards writes. Both buffers must be
    /// non-interleaved with the same sample representation.
    pub fn remap(
        format: Format,
        source: &'a mut PcmBuffer<'_>,
        channel_map: &[Option<u32>],
    ) -> Result<Self, PcmBufferError> {
        if channel_map.len() != format.channel_count() as usize {
            return Err(PcmBufferError::InvalidArgument(
                "channel map length must equal channel count",
            ));
        }
        if format.is_interleaved() || source.format.is_interleaved() {
            return Err(PcmBufferError::InvalidFormat(
                "remapped views require non-interleaved buffers",
            ));
        }
        if format.pcm_format() != source.format.pcm_format() {
            return Err(PcmBufferError::InvalidFormat(
                "remapped view must share the sample representation",
            ));
        }

        let source_channels = source.format.channel_count();
        let composed = channel_map
            .iter()
            .map(|entry| match *entry {
                Some(channel) if channel >= source_channels => Err(
                    PcmBufferError::InvalidArgument("channel map entry out of range"),
                ),
                Some(channel) => Ok(source.root_buffer(channel)),
                None => Ok(None),
            })
            .collect::<Result<ChannelMap, _>>()?;

        let frame_length = source.frame_length;
        if composed.iter().any(Option::is_none) {
            let required = format.bytes_per_frame() * frame_length as usize;
            if required > SILENCE_BYTE_COUNT {
                return Err(PcmBufferError::Overflow {
                    required,
                    available: SILENCE_BYTE_COUNT,
                });
            }
        }

        Ok(Self {
            format,
            frame_capacity: frame_length,
            frame_length,
            storage: Storage::View {
                list: source.storage.list_mut(),
                channel_map: composed,
            },
        })
    }

    #[must_use]
    pub const fn format(&self) -> &Format {
        &self.format
    }

    #[must_use]
    pub const fn frame_capacity(&self) -> u32 {
        self.frame_capacity
    }

    #[must_use]
    pub const fn frame_length(&self) -> u32 {
        self.frame_length
    }

    /// Whether this buffer is a remapped view over another buffer
    #[must_use]
    pub const fn is_view(&self) -> bool {
        matches!(self.storage, Storage::View { .. })
    }

    /// Change the number of valid frames
    pub fn set_frame_length(&mut self, frame_length: u32) -> Result<(), PcmBufferError> {
        if frame_length > self.frame_capacity {
            return Err(PcmBufferError::OutOfRange("frame length exceeds capacity"));
        }
        self.apply_frame_length(frame_length);
        Ok(())
    }

    /// Restore the full capacity and zero all samples
    pub fn reset(&mut self) {
        self.apply_frame_length(self.frame_capacity);
        self.clear();
    }

    /// Zero all valid frames
    pub fn clear(&mut self) {
        self.zero_frames(0..self.frame_length as usize);
    }

    /// Zero `length` frames starting at `start`
    pub fn clear_range(&mut self, start: u32, length: u32) -> Result<(), PcmBufferError> {
        if u64::from(start) + u64::from(length) > u64::from(self.frame_length) {
            return Err(PcmBufferError::OutOfRange("clear range exceeds frame length"));
        }
        self.zero_frames(start as usize..(start + length) as usize);
        Ok(())
    }

    /// Copy frames from another buffer.
    ///
    /// `length == 0` copies the remaining frames of `source` after
    /// `from_start`. A full default copy (all arguments zero) also sets this
    /// buffer's frame length to the copied length. Returns the frames copied.
    pub fn copy_from(
        &mut self,
        source: &PcmBuffer<'_>,
        from_start: u32,
        to_start: u32,
        length: u32,
    ) -> Result<u32, PcmBufferError> {
        if source.format.pcm_format() != self.format.pcm_format()
            || source.format.channel_count() != self.format.channel_count()
        {
            return Err(PcmBufferError::InvalidFormat(
                "sample representation or channel count differs",
            ));
        }

        let frames = copy_window(
            (source.frame_length, from_start),
            (self.frame_length, to_start),
            length,
        )?;
        transfer(
            &Reader::Buffer(source),
            from_start as usize,
            &mut Writer::Buffer(&mut *self),
            to_start as usize,
            frames as usize,
        )?;

        if from_start == 0 && to_start == 0 && length == 0 {
            self.apply_frame_length(frames);
        }

        Ok(frames)
    }

    /// Copy frames from a caller-supplied buffer list.
    ///
    /// The destination window is measured against the frame capacity; on
    /// success the frame length becomes the copied length. A failed copy
    /// leaves the buffer untouched.
    pub fn copy_from_list(
        &mut self,
        list: &BufferList,
        from_start: u32,
        to_start: u32,
        length: u32,
    ) -> Result<u32, PcmBufferError> {
        check_list_format(list, self.format.pcm_format())?;
        let from_length = list.frame_length()?;
        if list.channel_count() > self.format.channel_count() {
            return Err(PcmBufferError::OutOfRange(
                "source has more channels than destination",
            ));
        }

        let frames = copy_window(
            (from_length, from_start),
            (self.frame_capacity, to_start),
            length,
        )?;
        transfer(
            &Reader::List(list),
            from_start as usize,
            &mut Writer::Buffer(&mut *self),
            to_start as usize,
            frames as usize,
        )?;
        self.apply_frame_length(frames);

        Ok(frames)
    }

    /// Copy frames into a caller-supplied buffer list.
    ///
    /// The destination window is measured against the list's full storage;
    /// on success every byte size covers the copied length. A failed copy
    /// leaves the list untouched.
    pub fn copy_to(
        &self,
        list: &mut BufferList,
        from_start: u32,
        to_start: u32,
        length: u32,
    ) -> Result<u32, PcmBufferError> {
        check_list_format(list, self.format.pcm_format())?;
        if self.format.channel_count() > list.channel_count() {
            return Err(PcmBufferError::OutOfRange(
                "source has more channels than destination",
            ));
        }

        let to_length = list.storage_frame_length()?;
        let frames = copy_window(
            (self.frame_length, from_start),
            (to_length, to_start),
            length,
        )?;
        transfer(
            &Reader::Buffer(self),
            from_start as usize,
            &mut Writer::List(&mut *list),
            to_start as usize,
            frames as usize,
        )?;
        list.set_frame_length(frames);

        Ok(frames)
    }

    /// Valid samples of one buffer, or `None` if `T` does not match the format
    ///
    /// For interleaved formats there is a single buffer holding all channels.
    pub fn data<T: Sample>(&self, buffer: u32) -> Option<&[T]> {
        let len = self.valid_sample_count();
        match self.buffer_location(buffer)? {
            Location::Lane { buffer, .. } => {
                let data = self.storage.list().buffers().get(buffer)?.data();
                T::samples(data)?.get(..len)
            }
            Location::Silence if T::PCM_FORMAT == self.format.pcm_format() => {
                T::silence().get(..len)
            }
            Location::Silence => None,
        }
    }

    /// Mutable valid samples of one buffer.
    ///
    /// Returns `None` for silence channels of a remapped view.
    pub fn data_mut<T: Sample>(&mut self, buffer: u32) -> Option<&mut [T]> {
        let len = self.valid_sample_count();
        match self.buffer_location(buffer)? {
            Location::Lane { buffer, .. } => {
                let data = self.storage.list_mut().buffers_mut().get_mut(buffer)?.data_mut();
                T::samples_mut(data)?.get_mut(..len)
            }
            Location::Silence => None,
        }
    }

    fn valid_sample_count(&self) -> usize {
        self.frame_length as usize * self.format.stride() as usize
    }

    fn apply_frame_length(&mut self, frame_length: u32) {
        self.frame_length = frame_length;
        match &mut self.storage {
            Storage::Owned(list) => list.set_frame_length(frame_length),
            Storage::Borrowed(list) => list.set_frame_length(frame_length),
            Storage::View { .. } => {}
        }
    }

    /// Buffer index in the backing list that holds `channel` of a
    /// non-interleaved buffer
    fn root_buffer(&self, channel: u32) -> Option<u32> {
        match &self.storage {
            Storage::View { channel_map, .. } => {
                channel_map.get(channel as usize).copied().flatten()
            }
            _ => Some(channel),
        }
    }

    fn locate(&self, channel: u32) -> Location {
        if self.format.is_interleaved() {
            return Location::Lane {
                buffer: 0,
                lane: Lane {
                    offset: channel as usize,
                    stride: self.format.stride() as usize,
                },
            };
        }
        match self.root_buffer(channel) {
            Some(buffer) => Location::Lane {
                buffer: buffer as usize,
                lane: PLANAR,
            },
            None => Location::Silence,
        }
    }

    fn buffer_location(&self, buffer: u32) -> Option<Location> {
        if buffer >= self.format.buffer_count() {
            return None;
        }
        if self.format.is_interleaved() {
            return Some(Location::Lane {
                buffer: 0,
                lane: PLANAR,
            });
        }
        Some(self.locate(buffer))
    }

    fn zero_frames(&mut self, frames: Range<usize>) {
        if self.is_view() {
            for channel in 0..self.format.channel_count() {
                if let Location::Lane { buffer, lane } = self.locate(channel) {
                    self.storage.list_mut().buffers_mut()[buffer]
                        .data_mut()
                        .zero_strided(frames.clone(), lane.offset, lane.stride);
                }
            }
            return;
        }

        let stride = self.format.stride() as usize;
        let samples = frames.start * stride..frames.end * stride;
        for buffer in self.storage.list_mut().buffers_mut() {
            buffer.data_mut().zero_strided(samples.clone(), 0, 1);
        }
    }
}

fn check_list_format(list: &BufferList, pcm_format: PcmFormat) -> Result<(), PcmBufferError> {
    if list.buffers().iter().any(|b| b.pcm_format() != pcm_format) {
        return Err(PcmBufferError::InvalidFormat(
            "buffer list sample representation differs",
        ));
    }
    Ok(())
}

/// Resolve the number of frames to copy between two windows
fn copy_window(
    (from_length, from_start): (u32, u32),
    (to_length, to_start): (u32, u32),
    length: u32,
) -> Result<u32, PcmBufferError> {
    let frames = if length == 0 {
        from_length
            .checked_sub(from_start)
            .ok_or(PcmBufferError::OutOfRange("source window exceeds frame length"))?
    } else {
        length
    };

    if u64::from(from_start) + u64::from(frames) > u64::from(from_length) {
        return Err(PcmBufferError::OutOfRange(
            "source window exceeds frame length",
        ));
    }
    if u64::from(to_start) + u64::from(frames) > u64::from(to_length) {
        return Err(PcmBufferError::OutOfRange(
            "destination window exceeds frame length",
        ));
    }

    Ok(frames)
}

enum Reader<'r, 'b> {
    Buffer(&'r PcmBuffer<'b>),
    List(&'r BufferList),
}

impl Reader<'_, '_> {
    fn channel_count(&self) -> u32 {
        match self {
            Self::Buffer(buffer) => buffer.format.channel_count(),
            Self::List(list) => list.channel_count(),
        }
    }

    fn locate(&self, channel: u32) -> Location {
        match self {
            Self::Buffer(buffer) => buffer.locate(channel),
            Self::List(list) => list
                .lane(channel)
                .map_or(Location::Silence, |(buffer, lane)| Location::Lane { buffer, lane }),
        }
    }

    fn data(&self, buffer: usize) -> &SampleData {
        match self {
            Self::Buffer(b) => b.storage.list().buffers()[buffer].data(),
            Self::List(list) => list.buffers()[buffer].data(),
        }
    }
}

enum Writer<'w, 'b> {
    Buffer(&'w mut PcmBuffer<'b>),
    List(&'w mut BufferList),
}

impl Writer<'_, '_> {
    fn locate(&self, channel: u32) -> Location {
        match self {
            Self::Buffer(buffer) => buffer.locate(channel),
            Self::List(list) => list
                .lane(channel)
                .map_or(Location::Silence, |(buffer, lane)| Location::Lane { buffer, lane }),
        }
    }

    fn data_mut(&mut self, buffer: usize) -> &mut SampleData {
        match self {
            Self::Buffer(b) => b.storage.list_mut().buffers_mut()[buffer].data_mut(),
            Self::List(list) => list.buffers_mut()[buffer].data_mut(),
        }
    }
}

/// Channel-by-channel strided copy of a validated frame window
fn transfer(
    from: &Reader<'_, '_>,
    from_start: usize,
    to: &mut Writer<'_, '_>,
    to_start: usize,
    frames: usize,
) -> Result<(), PcmBufferError> {
    for channel in 0..from.channel_count() {
        let Location::Lane {
            buffer: to_buffer,
            lane: to_lane,
        } = to.locate(channel)
        else {
            continue;
        };

        match from.locate(channel) {
            Location::Lane { buffer, lane } => {
                let copied = copy_lane(
                    from.data(buffer),
                    Window {
                        lane,
                        start: from_start,
                    },
                    to.data_mut(to_buffer),
                    Window {
                        lane: to_lane,
                        start: to_start,
                    },
                    frames,
                );
                if !copied {
                    return Err(PcmBufferError::InvalidFormat(
                        "sample representation differs",
                    ));
                }
            }
            Location::Silence => {
                to.data_mut(to_buffer).zero_strided(
                    to_start..to_start + frames,
                    to_lane.offset,
                    to_lane.stride,
                );
            }
        }
    }

    Ok(())
}

/// Errors raised by [`PcmBuffer`] operations
///
/// Messages are static so errors can be produced on the render thread
/// without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PcmBufferError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Invalid format: {0}")]
    InvalidFormat(&'static str),

    #[error("Invalid buffer descriptor: {0}")]
    InvalidDescriptor(&'static str),

    #[error("Out of range: {0}")]
    OutOfRange(&'static str),

    #[error("Silence region overflow: {required} bytes needed, {available} available")]
    Overflow { required: usize, available: usize },
}
