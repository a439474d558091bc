//! The palette-compressed container.
//!
//! # Layout (little-endian)
//!
//! ```text
//! offset 0:  magic        u32 = 'g','v','p',0
//! offset 4:  range        { offset: i32*3, extent: u32*3 }
//! offset 28: blob_size    u32   (patched after encoding)
//! offset 32: channel_mask u32
//! offset 36: channel_n    u32   (= popcount(channel_mask))
//! offset 40: header_table ChannelHeader[nx*ny*nz*channel_n]
//!            indexed by ((rz*ny + ry)*nx + rx)*channel_n + ci
//! then:      blob area, blob_size bytes
//! ```
//!
//! Each region cube picks one of three representations per channel,
//! keyed by the number of distinct samples it contains:
//!
//! | `variant_n` | blob | `blob_offset` meaning |
//! |---|---|---|
//! | 1 | none | the sample itself |
//! | 2..=367 | ascending palette + bit-packed indices | offset into the blob area |
//! | > 367 | raw `u32[512]` tile | offset into the blob area |
//!
//! Encoding fans one task per `(region, channel)` out over rayon when
//! the `parallel` feature is on.  Blob offsets then depend on task
//! completion order; the decoded grid does not.  `EncodeOptions::reproducible`
//! serializes the tasks for byte-for-byte stable output.  Decoding is
//! single-threaded and whole-volume; the format has no random access.
//! A malformed region header is reported to the error sink and leaves
//! that region's cells zero while the rest of the container decodes.

mod region_encoder;

use crate::adapter::{AdapterContext, AdapterError, VoxelSampler};
use crate::bits::read_u32_le;
use crate::grid::VoxelGrid;
use crate::region::{
    linear_cube_index, region_counts, ChannelId, ChannelMask, Offset3D, RegionRange,
    REGION_SIZE, REGION_VOLUME,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

pub const PALETTE_MAGIC: u32 = u32::from_le_bytes(*b"gvp\0");
/// Largest variant count still stored as palette + packed indices.
pub const MAX_PALETTE_VARIANTS: u32 = 367;
/// Blob size of a raw-tile region.
pub const RAW_TILE_SIZE: usize = 4 * REGION_VOLUME;
/// Bytes before the header table.
pub const PREAMBLE_SIZE: u64 = 40;
pub const CHANNEL_HEADER_SIZE: usize = 8;

/// Byte length of the packed-indices record for one region.
///
/// Semantically the indices occupy `ceil(512 * bits / 8)` bytes; the
/// stored record is rounded up to a multiple of 4 plus a 4-byte tail
/// pad so the bit-packing loop can issue whole-word loads and stores at
/// any in-range byte offset.
pub fn packed_indices_size(bits: u32) -> usize {
    let semantic = (REGION_VOLUME * bits as usize).div_ceil(8);
    semantic.div_ceil(4) * 4 + 4
}

/// Per-region, per-channel table entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelHeader {
    pub variant_n: u32,
    pub blob_offset: u32,
}

impl ChannelHeader {
    fn store(&self, buf: &mut [u8], at: usize) {
        crate::bits::write_u32_le(buf, at, self.variant_n);
        crate::bits::write_u32_le(buf, at + 4, self.blob_offset);
    }

    fn load(buf: &[u8], at: usize) -> Self {
        Self {
            variant_n: read_u32_le(buf, at),
            blob_offset: read_u32_le(buf, at + 4),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Run region tasks sequentially in header-table order so repeated
    /// encodes of the same input are byte-for-byte identical.
    pub reproducible: bool,
}

/// Decoded preamble of a palette container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PaletteHeader {
    pub range: RegionRange,
    pub blob_size: u32,
    pub channel_mask: ChannelMask,
    pub channel_n: u32,
}

impl PaletteHeader {
    pub fn region_counts(&self) -> (u32, u32, u32) {
        region_counts(self.range.extent)
    }
}

// Shared by the container and its region tasks.  The vector holds the
// header table followed by the growing blob area; its mutex guards
// growth, header stores, and blob copies.
pub(crate) struct SerializeState {
    pub(crate) data: Mutex<Vec<u8>>,
    pub(crate) blobs_begin: usize,
}

pub(crate) struct ContainerGeometry {
    pub(crate) range: RegionRange,
    pub(crate) nx: u32,
    pub(crate) ny: u32,
    pub(crate) nz: u32,
    pub(crate) channel_n: usize,
}

// ── Encode ───────────────────────────────────────────────────────────────────

/// Write a palette container covering `range` for the channels in
/// `mask`, sampling every voxel from `sampler`.  The stream is rewound
/// to offset 0 first; on success it holds the complete container.
pub fn encode<W, S>(
    writer: &mut W,
    range: RegionRange,
    mask: ChannelMask,
    sampler: &S,
    options: &EncodeOptions,
) -> Result<(), AdapterError>
where
    W: Write + Seek,
    S: VoxelSampler + ?Sized,
{
    if range.extent.is_degenerate() {
        return Err(AdapterError::InvalidInput(
            "palette container extent must be non-zero on every axis".into(),
        ));
    }
    let channel_ids = mask.channel_ids();
    let channel_n = channel_ids.len();
    let (nx, ny, nz) = region_counts(range.extent);

    writer.seek(SeekFrom::Start(0))?;
    writer.write_u32::<LittleEndian>(PALETTE_MAGIC)?;
    range.write(&mut *writer)?;
    let blob_size_at = writer.stream_position()?;
    writer.write_u32::<LittleEndian>(0)?; // patched after the join
    writer.write_u32::<LittleEndian>(mask.bits())?;
    writer.write_u32::<LittleEndian>(channel_n as u32)?;

    let header_entries = nx as u128 * ny as u128 * nz as u128 * channel_n as u128;
    let header_table_size = usize::try_from(header_entries * CHANNEL_HEADER_SIZE as u128)
        .map_err(|_| {
            AdapterError::Unrepresentable("header table exceeds addressable memory".into())
        })?;

    // Reserve two percent of the dense size up front; palette blobs for
    // typical scenes land well under that, so the vector rarely regrows.
    let dense_size = range.extent.volume() * channel_n as u128 * 4;
    let reserve = header_table_size as u128 + dense_size / 50;
    let mut data = Vec::with_capacity(usize::try_from(reserve).unwrap_or(header_table_size));
    data.resize(header_table_size, 0);

    let state = SerializeState {
        data: Mutex::new(data),
        blobs_begin: header_table_size,
    };
    let geometry = ContainerGeometry {
        range,
        nx,
        ny,
        nz,
        channel_n,
    };
    let ctx = AdapterContext::new();

    // Task index is the header-table entry index: ci fastest, then
    // rx, ry, rz.
    let run = |task: usize| {
        let ci = task % channel_n;
        let region = task / channel_n;
        let rx = (region % nx as usize) as u32;
        let ry = (region / nx as usize % ny as usize) as u32;
        let rz = (region / (nx as usize * ny as usize)) as u32;
        region_encoder::encode_region(&ctx, &state, &geometry, &channel_ids, rx, ry, rz, ci, sampler);
    };
    let task_n = header_table_size / CHANNEL_HEADER_SIZE;

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        if options.reproducible {
            (0..task_n).for_each(run);
        } else {
            (0..task_n).into_par_iter().for_each(run);
        }
    }
    #[cfg(not(feature = "parallel"))]
    {
        let _ = options;
        (0..task_n).for_each(run);
    }

    if let Some(err) = ctx.take_first() {
        return Err(err);
    }

    let data = state.data.into_inner().unwrap();
    let blob_size = u32::try_from(data.len() - state.blobs_begin)
        .map_err(|_| AdapterError::Unrepresentable("blob area exceeds u32".into()))?;
    tracing::debug!(blob_size, header_table_size, "palette container encoded");

    writer.write_all(&data)?;
    let end = writer.stream_position()?;
    writer.seek(SeekFrom::Start(blob_size_at))?;
    writer.write_u32::<LittleEndian>(blob_size)?;
    writer.seek(SeekFrom::Start(end))?;
    Ok(())
}

// ── Decode ───────────────────────────────────────────────────────────────────

/// Read and validate the preamble.  Rewinds the stream; on return the
/// cursor sits at the start of the header table.
pub fn read_header<R: Read + Seek>(reader: &mut R) -> Result<PaletteHeader, AdapterError> {
    reader.seek(SeekFrom::Start(0))?;
    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != PALETTE_MAGIC {
        return Err(AdapterError::InvalidInput(
            "palette container must begin with a valid magic number".into(),
        ));
    }
    let range = RegionRange::read(&mut *reader)?;
    if range.extent.is_degenerate() {
        return Err(AdapterError::InvalidInput(
            "palette container extent must be non-zero on every axis".into(),
        ));
    }
    let blob_size = reader.read_u32::<LittleEndian>()?;
    let channel_mask = ChannelMask::from_bits(reader.read_u32::<LittleEndian>()?);
    let channel_n = reader.read_u32::<LittleEndian>()?;
    if channel_n != channel_mask.count() {
        return Err(AdapterError::InvalidInput(format!(
            "channel count {channel_n} does not match mask {:#010x}",
            channel_mask.bits()
        )));
    }
    Ok(PaletteHeader {
        range,
        blob_size,
        channel_mask,
        channel_n,
    })
}

/// Decode a whole palette container into a dense grid.
///
/// Malformed region headers are reported through an internal sink and
/// surface as the returned error once the full pass has run; use
/// [`decode_with`] to keep the partially-reconstructed grid alongside
/// the reported errors.
pub fn decode<R: Read + Seek>(reader: &mut R) -> Result<VoxelGrid, AdapterError> {
    let ctx = AdapterContext::new();
    let grid = decode_with(reader, &ctx)?;
    if let Some(err) = ctx.take_first() {
        return Err(err);
    }
    Ok(grid)
}

/// Decode against an external error sink.
///
/// A malformed region header (zero variants, blob range outside the
/// blob area, packed index past its palette) is pushed to `ctx` and
/// leaves that region's cells at their zero default; the remaining
/// headers still decode.  Only preamble and stream errors fail hard.
pub fn decode_with<R: Read + Seek>(
    reader: &mut R,
    ctx: &AdapterContext,
) -> Result<VoxelGrid, AdapterError> {
    let header = read_header(reader)?;
    let (nx, ny, nz) = header.region_counts();
    let channel_ids = header.channel_mask.channel_ids();

    let table_size = nx as u128 * ny as u128 * nz as u128
        * header.channel_n as u128
        * CHANNEL_HEADER_SIZE as u128;
    let table_size = usize::try_from(table_size).map_err(|_| {
        AdapterError::Unrepresentable("header table exceeds addressable memory".into())
    })?;
    let mut table = vec![0u8; table_size];
    reader.read_exact(&mut table)?;
    let mut blob = vec![0u8; header.blob_size as usize];
    reader.read_exact(&mut blob)?;

    let mut grid = VoxelGrid::new(header.range, header.channel_mask)?;
    let mut at = 0;
    for rz in 0..nz {
        for ry in 0..ny {
            for rx in 0..nx {
                for &channel in &channel_ids {
                    let entry = ChannelHeader::load(&table, at);
                    at += CHANNEL_HEADER_SIZE;
                    decode_region(ctx, &mut grid, &blob, entry, header.range, rx, ry, rz, channel);
                }
            }
        }
    }
    Ok(grid)
}

// Reports a bad header to `ctx` and returns with the region untouched,
// the same per-task disposition as the encode side.
fn decode_region(
    ctx: &AdapterContext,
    grid: &mut VoxelGrid,
    blob: &[u8],
    entry: ChannelHeader,
    range: RegionRange,
    rx: u32,
    ry: u32,
    rz: u32,
    channel: ChannelId,
) {
    let ox = rx * REGION_SIZE;
    let oy = ry * REGION_SIZE;
    let oz = rz * REGION_SIZE;
    let world = |xi: u32, yi: u32, zi: u32| {
        Offset3D::new(
            (ox + xi) as i32 + range.offset.x,
            (oy + yi) as i32 + range.offset.y,
            (oz + zi) as i32 + range.offset.z,
        )
    };

    match entry.variant_n {
        0 => {
            ctx.push_error(AdapterError::InvalidInput(
                "channel header declares zero variants".into(),
            ));
        }
        1 => {
            // constant region: the header carries the sample itself
            for zi in 0..REGION_SIZE {
                for yi in 0..REGION_SIZE {
                    for xi in 0..REGION_SIZE {
                        grid.set(world(xi, yi, zi), channel, entry.blob_offset);
                    }
                }
            }
        }
        variant_n if variant_n <= MAX_PALETTE_VARIANTS => {
            let bits = crate::bits::ceil_log2(variant_n);
            let base = entry.blob_offset as usize;
            let palette_bytes = 4 * variant_n as usize;
            let record = palette_bytes + packed_indices_size(bits);
            if base + record > blob.len() {
                ctx.push_error(AdapterError::InvalidInput(format!(
                    "palette blob range {base}..{} exceeds blob area of {} bytes",
                    base + record,
                    blob.len()
                )));
                return;
            }
            let palette: Vec<u32> = (0..variant_n as usize)
                .map(|i| read_u32_le(blob, base + 4 * i))
                .collect();
            let packed = &blob[base + palette_bytes..base + record];
            // stage into a local tile so a bad packed index leaves the
            // whole region at its zero default
            let mut tile = [0u32; REGION_VOLUME];
            for zi in 0..REGION_SIZE {
                for yi in 0..REGION_SIZE {
                    for xi in 0..REGION_SIZE {
                        let index = linear_cube_index(xi, yi, zi);
                        let bit = index * bits as usize;
                        let byte = bit / 8;
                        let shift = (bit - byte * 8) as u32;
                        let word = read_u32_le(packed, byte);
                        let palette_id = word >> shift & crate::bits::low_mask(bits);
                        if palette_id >= variant_n {
                            ctx.push_error(AdapterError::InvalidInput(format!(
                                "packed palette index {palette_id} out of range for {variant_n} variants"
                            )));
                            return;
                        }
                        tile[index] = palette[palette_id as usize];
                    }
                }
            }
            for zi in 0..REGION_SIZE {
                for yi in 0..REGION_SIZE {
                    for xi in 0..REGION_SIZE {
                        grid.set(world(xi, yi, zi), channel, tile[linear_cube_index(xi, yi, zi)]);
                    }
                }
            }
        }
        _ => {
            let base = entry.blob_offset as usize;
            if base + RAW_TILE_SIZE > blob.len() {
                ctx.push_error(AdapterError::InvalidInput(format!(
                    "raw tile range {base}..{} exceeds blob area of {} bytes",
                    base + RAW_TILE_SIZE,
                    blob.len()
                )));
                return;
            }
            for zi in 0..REGION_SIZE {
                for yi in 0..REGION_SIZE {
                    for xi in 0..REGION_SIZE {
                        let value = read_u32_le(blob, base + 4 * linear_cube_index(xi, yi, zi));
                        grid.set(world(xi, yi, zi), channel, value);
                    }
                }
            }
        }
    }
}
