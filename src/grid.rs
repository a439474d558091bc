//! Dense in-memory voxel grid.
//!
//! Storage layout matches the raw container's data array: channel
//! fastest, then x, then y, then z.  This makes the raw encoder a
//! header-plus-memcpy and lets both decoders share one reconstruction
//! target.

use crate::adapter::{AdapterError, VoxelSampler};
use crate::region::{ChannelId, ChannelMask, Offset3D, RegionRange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelGrid {
    range: RegionRange,
    channel_mask: ChannelMask,
    channel_n: u32,
    data: Vec<u32>,
}

impl VoxelGrid {
    /// A zero-filled grid covering `range` for the channels in `mask`.
    pub fn new(range: RegionRange, mask: ChannelMask) -> Result<Self, AdapterError> {
        if range.extent.is_degenerate() {
            return Err(AdapterError::InvalidInput(
                "grid extent must be non-zero on every axis".into(),
            ));
        }
        let channel_n = mask.count();
        let cells = usize::try_from(range.extent.volume() * channel_n as u128).map_err(|_| {
            AdapterError::Unrepresentable("grid volume exceeds addressable memory".into())
        })?;
        Ok(Self {
            range,
            channel_mask: mask,
            channel_n,
            data: vec![0; cells],
        })
    }

    /// Build a grid by evaluating `f` at every `(position, channel)`.
    pub fn from_fn<F>(range: RegionRange, mask: ChannelMask, f: F) -> Result<Self, AdapterError>
    where
        F: Fn(Offset3D, ChannelId) -> u32,
    {
        let mut grid = Self::new(range, mask)?;
        let channel_ids = mask.channel_ids();
        let mut at = 0;
        for dz in 0..range.extent.z {
            for dy in 0..range.extent.y {
                for dx in 0..range.extent.x {
                    let pos = Offset3D::new(
                        range.offset.x + dx as i32,
                        range.offset.y + dy as i32,
                        range.offset.z + dz as i32,
                    );
                    for &channel in &channel_ids {
                        grid.data[at] = f(pos, channel);
                        at += 1;
                    }
                }
            }
        }
        Ok(grid)
    }

    pub fn range(&self) -> RegionRange {
        self.range
    }

    pub fn channel_mask(&self) -> ChannelMask {
        self.channel_mask
    }

    /// Backing array: channel fastest, then x, y, z.
    pub fn data(&self) -> &[u32] {
        &self.data
    }

    fn index(&self, pos: Offset3D, channel: ChannelId) -> Option<usize> {
        if !self.range.contains(pos) {
            return None;
        }
        let rank = self.channel_mask.index_of(channel)?;
        let dx = (pos.x - self.range.offset.x) as u64;
        let dy = (pos.y - self.range.offset.y) as u64;
        let dz = (pos.z - self.range.offset.z) as u64;
        let ex = self.range.extent.x as u64;
        let ey = self.range.extent.y as u64;
        let cell = dx + dy * ex + dz * ex * ey;
        Some((rank as u64 + self.channel_n as u64 * cell) as usize)
    }

    /// Sample at `pos`; `0` outside the range or for an unselected channel.
    pub fn get(&self, pos: Offset3D, channel: ChannelId) -> u32 {
        self.index(pos, channel).map_or(0, |i| self.data[i])
    }

    /// Store a sample; silently ignored outside the grid.
    pub fn set(&mut self, pos: Offset3D, channel: ChannelId, value: u32) {
        if let Some(i) = self.index(pos, channel) {
            self.data[i] = value;
        }
    }
}

impl VoxelSampler for VoxelGrid {
    fn sample(&self, pos: Offset3D, channel: ChannelId) -> u32 {
        self.get(pos, channel)
    }
}
