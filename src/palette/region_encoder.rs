//! Per-region encode task.
//!
//! One call handles one `(region, channel)` pair: mine the variant set,
//! pick a representation, fill the blob in a task-local buffer, then
//! publish the channel header and blob under the shared buffer lock.
//! The sample and fill passes run lock-free; the lock is held only for
//! the reservation and the publish.

use super::{
    packed_indices_size, ChannelHeader, ContainerGeometry, SerializeState, CHANNEL_HEADER_SIZE,
    MAX_PALETTE_VARIANTS, RAW_TILE_SIZE,
};
use crate::adapter::{AdapterContext, AdapterError, VoxelSampler};
use crate::bits::{ceil_log2, low_mask, read_u32_le, write_u32_le};
use crate::region::{linear_cube_index, ChannelId, Offset3D, REGION_SIZE};
use std::collections::HashSet;

pub(crate) fn encode_region<S: VoxelSampler + ?Sized>(
    ctx: &AdapterContext,
    state: &SerializeState,
    geometry: &ContainerGeometry,
    channel_ids: &[ChannelId],
    rx: u32,
    ry: u32,
    rz: u32,
    ci: usize,
    sampler: &S,
) {
    let channel = channel_ids[ci];
    let range = geometry.range;
    let ox = rx * REGION_SIZE;
    let oy = ry * REGION_SIZE;
    let oz = rz * REGION_SIZE;
    // Cells past the extent are not sampled; they read as zero and
    // count as a variant.
    let sample_at = |xi: u32, yi: u32, zi: u32| -> u32 {
        let px = ox + xi;
        let py = oy + yi;
        let pz = oz + zi;
        if px < range.extent.x && py < range.extent.y && pz < range.extent.z {
            let pos = Offset3D::new(
                px as i32 + range.offset.x,
                py as i32 + range.offset.y,
                pz as i32 + range.offset.z,
            );
            sampler.sample(pos, channel)
        } else {
            0
        }
    };

    let mut variants = HashSet::new();
    for zi in 0..REGION_SIZE {
        for yi in 0..REGION_SIZE {
            for xi in 0..REGION_SIZE {
                variants.insert(sample_at(xi, yi, zi));
            }
        }
    }
    let variant_n = variants.len() as u32;

    let mut header = ChannelHeader {
        variant_n,
        blob_offset: 0,
    };
    let mut local = Vec::new();

    if variant_n > MAX_PALETTE_VARIANTS {
        // Too many variants to be worth a palette: store the tile raw.
        let Some(blob_offset) = reserve_blob(state, RAW_TILE_SIZE) else {
            ctx.push_error(AdapterError::Unrepresentable(
                "blob area exceeds u32 offsets".into(),
            ));
            return;
        };
        header.blob_offset = blob_offset;
        local = vec![0u8; RAW_TILE_SIZE];
        let mut at = 0;
        for zi in 0..REGION_SIZE {
            for yi in 0..REGION_SIZE {
                for xi in 0..REGION_SIZE {
                    write_u32_le(&mut local, at, sample_at(xi, yi, zi));
                    at += 4;
                }
            }
        }
    } else if variant_n > 1 {
        let bits = ceil_log2(variant_n);
        let palette_bytes = 4 * variant_n as usize;
        let size = palette_bytes + packed_indices_size(bits);
        let Some(blob_offset) = reserve_blob(state, size) else {
            ctx.push_error(AdapterError::Unrepresentable(
                "blob area exceeds u32 offsets".into(),
            ));
            return;
        };
        header.blob_offset = blob_offset;
        local = vec![0u8; size];

        let mut palette: Vec<u32> = variants.into_iter().collect();
        palette.sort_unstable();
        for (i, value) in palette.iter().enumerate() {
            write_u32_le(&mut local, 4 * i, *value);
        }

        let packed = &mut local[palette_bytes..];
        for zi in 0..REGION_SIZE {
            for yi in 0..REGION_SIZE {
                for xi in 0..REGION_SIZE {
                    let voxel = sample_at(xi, yi, zi);
                    let palette_id = match palette.binary_search(&voxel) {
                        Ok(i) => i as u32,
                        Err(_) => {
                            // The sampler returned a value the mining
                            // pass never saw; abandon the region rather
                            // than publish a half-written blob.
                            ctx.push_error(AdapterError::InvalidInput(
                                "voxel sample missing from its region palette".into(),
                            ));
                            return;
                        }
                    };
                    let bit = linear_cube_index(xi, yi, zi) * bits as usize;
                    let byte = bit / 8;
                    let shift = (bit - byte * 8) as u32;
                    if byte + 4 > packed.len() {
                        ctx.push_error(AdapterError::InvalidInput(
                            "packed index store past the reserved blob".into(),
                        ));
                        return;
                    }
                    let word = read_u32_le(packed, byte);
                    let word = word & !(low_mask(bits) << shift) | palette_id << shift;
                    write_u32_le(packed, byte, word);
                }
            }
        }
    } else {
        // Constant region: no blob, the header carries the sample.
        header.blob_offset = variants.into_iter().next().unwrap_or_default();
    }

    let mut data = state.data.lock().unwrap();
    let region = (rz as usize * geometry.ny as usize + ry as usize) * geometry.nx as usize
        + rx as usize;
    let slot = (region * geometry.channel_n + ci) * CHANNEL_HEADER_SIZE;
    header.store(data.as_mut_slice(), slot);
    if !local.is_empty() {
        let at = state.blobs_begin + header.blob_offset as usize;
        data[at..at + local.len()].copy_from_slice(&local);
    }
}

/// Grow the shared buffer by `size` bytes and return the new blob's
/// offset relative to the blob area base.
fn reserve_blob(state: &SerializeState, size: usize) -> Option<u32> {
    let mut data = state.data.lock().unwrap();
    let old = data.len();
    let offset = u32::try_from(old - state.blobs_begin).ok()?;
    data.resize(old + size, 0);
    Some(offset)
}
