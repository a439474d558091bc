//! Region geometry, channel selection, and the 24-byte range wire form.
//!
//! Both containers carry a [`RegionRange`] directly after the magic and
//! address voxels in world space: a sample lives at `range.offset + d`
//! for `d` inside `range.extent`.  The palette container additionally
//! tiles the extent into cubes of side [`REGION_SIZE`].

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Side length of a palette region cube.  Power of two.
pub const REGION_SIZE: u32 = 8;
/// Samples per region per channel.
pub const REGION_VOLUME: usize = (REGION_SIZE * REGION_SIZE * REGION_SIZE) as usize;
/// Serialized size of a [`RegionRange`].
pub const RANGE_WIRE_SIZE: usize = 24;

/// Region load result carries its sample inline.
pub const REGION_FLAG_UNIFORM: u32 = 1 << 0;

/// Signed world-space position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset3D {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Offset3D {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Unsigned per-axis extent.  Every axis must be non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent3D {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Extent3D {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Voxel count; u128 so extreme extents cannot overflow the product.
    pub fn volume(&self) -> u128 {
        self.x as u128 * self.y as u128 * self.z as u128
    }

    pub fn is_degenerate(&self) -> bool {
        self.x == 0 || self.y == 0 || self.z == 0
    }
}

/// The world-space box a container covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRange {
    pub offset: Offset3D,
    pub extent: Extent3D,
}

impl RegionRange {
    pub const fn new(offset: Offset3D, extent: Extent3D) -> Self {
        Self { offset, extent }
    }

    /// True when `pos` lies inside the box.
    pub fn contains(&self, pos: Offset3D) -> bool {
        let dx = pos.x.wrapping_sub(self.offset.x);
        let dy = pos.y.wrapping_sub(self.offset.y);
        let dz = pos.z.wrapping_sub(self.offset.z);
        dx >= 0
            && dy >= 0
            && dz >= 0
            && (dx as u32) < self.extent.x
            && (dy as u32) < self.extent.y
            && (dz as u32) < self.extent.z
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_i32::<LittleEndian>(self.offset.x)?;
        writer.write_i32::<LittleEndian>(self.offset.y)?;
        writer.write_i32::<LittleEndian>(self.offset.z)?;
        writer.write_u32::<LittleEndian>(self.extent.x)?;
        writer.write_u32::<LittleEndian>(self.extent.y)?;
        writer.write_u32::<LittleEndian>(self.extent.z)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let offset = Offset3D {
            x: reader.read_i32::<LittleEndian>()?,
            y: reader.read_i32::<LittleEndian>()?,
            z: reader.read_i32::<LittleEndian>()?,
        };
        let extent = Extent3D {
            x: reader.read_u32::<LittleEndian>()?,
            y: reader.read_u32::<LittleEndian>()?,
            z: reader.read_u32::<LittleEndian>()?,
        };
        Ok(Self { offset, extent })
    }
}

/// Number of region cubes per axis: `ceil(extent / REGION_SIZE)`.
pub fn region_counts(extent: Extent3D) -> (u32, u32, u32) {
    (
        extent.x.div_ceil(REGION_SIZE),
        extent.y.div_ceil(REGION_SIZE),
        extent.z.div_ceil(REGION_SIZE),
    )
}

/// Linear index of `(xi, yi, zi)` inside one region cube, x fastest.
#[inline]
pub fn linear_cube_index(xi: u32, yi: u32, zi: u32) -> usize {
    (xi + yi * REGION_SIZE + zi * REGION_SIZE * REGION_SIZE) as usize
}

// ── Channels ─────────────────────────────────────────────────────────────────

/// One of up to 32 voxel channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

/// Bitmap of selected channels.  Serialized order is ascending bit index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMask(u32);

impl ChannelMask {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn contains(&self, channel: ChannelId) -> bool {
        channel.0 < 32 && self.0 & (1 << channel.0) != 0
    }

    /// Selected channel ids, ascending.  The serialized channel slot `ci`
    /// is the position of the channel in this list.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        (0..32)
            .filter(|bit| self.0 & (1u32 << bit) != 0)
            .map(ChannelId)
            .collect()
    }

    /// Rank of `channel` among the set bits, if selected.
    pub fn index_of(&self, channel: ChannelId) -> Option<u32> {
        if !self.contains(channel) {
            return None;
        }
        Some((self.0 & ((1u32 << channel.0) - 1)).count_ones())
    }
}

/// A loaded single-voxel region, as produced by the raw parse adapter.
///
/// `flags` contains [`REGION_FLAG_UNIFORM`] and `data` is the sample
/// itself; an errored parser returns the zero region (`flags == 0`,
/// `data == 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub range: RegionRange,
    pub channel: ChannelId,
    pub flags: u32,
    pub data: u32,
}

// ── Color channel convention ─────────────────────────────────────────────────

/// Pack 8-bit r/g/b and an id byte into the COLOR channel value.
pub const fn pack_rgbi(r: u8, g: u8, b: u8, id: u8) -> u32 {
    r as u32 | (g as u32) << 8 | (b as u32) << 16 | (id as u32) << 24
}

/// Split a COLOR channel value back into `(r, g, b, id)`.
pub const fn unpack_rgbi(value: u32) -> (u8, u8, u8, u8) {
    (
        value as u8,
        (value >> 8) as u8,
        (value >> 16) as u8,
        (value >> 24) as u8,
    )
}
