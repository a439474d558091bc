//! The raw container: a fixed header and a tight `u32` array.
//!
//! ```text
//! offset 0:  magic        u32 = 'g','v','r',0
//! offset 4:  range        { offset: i32*3, extent: u32*3 }
//! offset 28: channel_mask u32
//! offset 32: data         u32[channel_n * extent.x * extent.y * extent.z]
//! ```
//!
//! The data array is channel fastest, then x, y, z, so the parse side
//! can serve single-voxel loads with one positioned read.

use crate::adapter::{AdapterContext, AdapterError, ParseAdapter, ParseState, VoxelSampler};
use crate::grid::VoxelGrid;
use crate::region::{
    ChannelId, ChannelMask, Offset3D, Region, RegionRange, REGION_FLAG_UNIFORM,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Seek, SeekFrom, Write};

pub const RAW_MAGIC: u32 = u32::from_le_bytes(*b"gvr\0");
/// Bytes before the data array.
pub const RAW_HEADER_SIZE: u64 = 32;

/// Write the raw container for `range`/`mask`, pulling every sample
/// from `sampler`.
pub fn encode<W: Write, S: VoxelSampler + ?Sized>(
    writer: &mut W,
    range: RegionRange,
    mask: ChannelMask,
    sampler: &S,
) -> Result<(), AdapterError> {
    if range.extent.is_degenerate() {
        return Err(AdapterError::InvalidInput(
            "raw container extent must be non-zero on every axis".into(),
        ));
    }
    writer.write_u32::<LittleEndian>(RAW_MAGIC)?;
    range.write(&mut *writer)?;
    writer.write_u32::<LittleEndian>(mask.bits())?;

    let channel_ids = mask.channel_ids();
    for dz in 0..range.extent.z {
        for dy in 0..range.extent.y {
            for dx in 0..range.extent.x {
                let pos = Offset3D::new(
                    range.offset.x + dx as i32,
                    range.offset.y + dy as i32,
                    range.offset.z + dz as i32,
                );
                for &channel in &channel_ids {
                    writer.write_u32::<LittleEndian>(sampler.sample(pos, channel))?;
                }
            }
        }
    }
    Ok(())
}

/// Read a whole raw container back into a dense grid.
pub fn decode<R: Read + Seek>(reader: &mut R) -> Result<VoxelGrid, AdapterError> {
    let ctx = AdapterContext::new();
    let mut parser = RawParser::new(reader);
    parser.begin(&ctx);
    if let Some(err) = ctx.take_first() {
        return Err(err);
    }
    let grid = parser.read_grid()?;
    parser.end();
    Ok(grid)
}

/// Random-access parse adapter over a seekable raw container.
///
/// `begin` caches the header; each `load_region` then answers one voxel
/// with a single positioned read and returns a UNIFORM region carrying
/// the sample inline.
pub struct RawParser<'r, R: Read + Seek> {
    reader: &'r mut R,
    state: ParseState,
    range: RegionRange,
    channel_mask: ChannelMask,
    channel_n: u32,
    base_offset: u64,
}

impl<'r, R: Read + Seek> RawParser<'r, R> {
    pub fn new(reader: &'r mut R) -> Self {
        Self {
            reader,
            state: ParseState::Created,
            range: RegionRange::default(),
            channel_mask: ChannelMask::default(),
            channel_n: 0,
            base_offset: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn range(&self) -> RegionRange {
        self.range
    }

    pub fn channel_mask(&self) -> ChannelMask {
        self.channel_mask
    }

    /// Read and validate the header.  A bad magic pushes
    /// `InvalidInput` and leaves the parser in the terminal `Errored`
    /// state; loads then return the zero region.
    pub fn begin(&mut self, ctx: &AdapterContext) {
        match self.read_header() {
            Ok(()) => self.state = ParseState::BegunValid,
            Err(err) => {
                self.state = ParseState::Errored;
                ctx.push_error(err);
            }
        }
    }

    fn read_header(&mut self) -> Result<(), AdapterError> {
        self.reader.seek(SeekFrom::Start(0))?;
        let magic = self.reader.read_u32::<LittleEndian>()?;
        if magic != RAW_MAGIC {
            return Err(AdapterError::InvalidInput(
                "raw container must begin with a valid magic number".into(),
            ));
        }
        self.range = RegionRange::read(&mut *self.reader)?;
        if self.range.extent.is_degenerate() {
            return Err(AdapterError::InvalidInput(
                "raw container extent must be non-zero on every axis".into(),
            ));
        }
        self.channel_mask = ChannelMask::from_bits(self.reader.read_u32::<LittleEndian>()?);
        self.channel_n = self.channel_mask.count();
        self.base_offset = RAW_HEADER_SIZE;
        Ok(())
    }

    pub fn query_region_flags(&self, _range: &RegionRange, _channel: ChannelId) -> u32 {
        0
    }

    /// Load the single voxel at `pos` for `channel`.
    ///
    /// Outside the cached range, for an unselected channel, or after an
    /// error this returns the zero region rather than touching the
    /// stream.
    pub fn load_region(&mut self, ctx: &AdapterContext, pos: Offset3D, channel: ChannelId) -> Region {
        let zero = Region {
            range: RegionRange::new(pos, crate::region::Extent3D::new(1, 1, 1)),
            channel,
            flags: 0,
            data: 0,
        };
        match self.state {
            ParseState::BegunValid | ParseState::Loading => self.state = ParseState::Loading,
            _ => return zero,
        }
        let Some(rank) = self.channel_mask.index_of(channel) else {
            return zero;
        };
        if !self.range.contains(pos) {
            return zero;
        }

        let dx = (pos.x - self.range.offset.x) as u64;
        let dy = (pos.y - self.range.offset.y) as u64;
        let dz = (pos.z - self.range.offset.z) as u64;
        let ex = self.range.extent.x as u64;
        let ey = self.range.extent.y as u64;
        let cell = dx + dy * ex + dz * ex * ey;
        let read_offset = self.base_offset + 4 * (rank as u64 + self.channel_n as u64 * cell);

        let result = self
            .reader
            .seek(SeekFrom::Start(read_offset))
            .and_then(|_| self.reader.read_u32::<LittleEndian>());
        let voxel = match result {
            Ok(value) => value,
            Err(err) => {
                self.state = ParseState::Errored;
                ctx.push_error(err.into());
                return zero;
            }
        };
        Region {
            flags: REGION_FLAG_UNIFORM,
            data: voxel,
            ..zero
        }
    }

    /// Sample from a loaded region.  Uniform regions carry the sample
    /// inline, so the position is irrelevant.
    pub fn sample_region(&self, region: &Region, _pos: Offset3D, _channel: ChannelId) -> u32 {
        region.data
    }

    pub fn unload_region(&mut self, _region: Region) {}

    /// Load, sample, and unload in one call.
    pub fn sample_voxel(&mut self, ctx: &AdapterContext, pos: Offset3D, channel: ChannelId) -> u32 {
        let region = self.load_region(ctx, pos, channel);
        let value = self.sample_region(&region, pos, channel);
        self.unload_region(region);
        value
    }

    pub fn end(&mut self) {
        if self.state != ParseState::Errored {
            self.state = ParseState::Ended;
        }
    }

    /// Bulk read of the whole data array, in storage order.
    fn read_grid(&mut self) -> Result<VoxelGrid, AdapterError> {
        let mut grid = VoxelGrid::new(self.range, self.channel_mask)?;
        self.reader.seek(SeekFrom::Start(self.base_offset))?;
        let channel_ids = self.channel_mask.channel_ids();
        for dz in 0..self.range.extent.z {
            for dy in 0..self.range.extent.y {
                for dx in 0..self.range.extent.x {
                    let pos = Offset3D::new(
                        self.range.offset.x + dx as i32,
                        self.range.offset.y + dy as i32,
                        self.range.offset.z + dz as i32,
                    );
                    for &channel in &channel_ids {
                        let value = self.reader.read_u32::<LittleEndian>()?;
                        grid.set(pos, channel, value);
                    }
                }
            }
        }
        Ok(grid)
    }
}

impl<R: Read + Seek> ParseAdapter for RawParser<'_, R> {
    fn load_voxel(&mut self, ctx: &AdapterContext, pos: Offset3D, channel: ChannelId) -> u32 {
        self.sample_voxel(ctx, pos, channel)
    }
}
