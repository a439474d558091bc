use std::fs::File;
use std::io::Cursor;
use tempfile::NamedTempFile;
use voxpal::bits::read_u32_le;
use voxpal::palette::{
    self, packed_indices_size, EncodeOptions, CHANNEL_HEADER_SIZE, PREAMBLE_SIZE, RAW_TILE_SIZE,
};
use voxpal::raw::{self, RawParser, RAW_HEADER_SIZE};
use voxpal::region::REGION_FLAG_UNIFORM;
use voxpal::{
    AdapterContext, AdapterError, ChannelId, ChannelMask, Extent3D, Offset3D, ParseState,
    RegionRange, VoxelGrid, VoxelSampler,
};

fn encode_palette<S: VoxelSampler>(range: RegionRange, mask: u32, sampler: &S) -> Vec<u8> {
    encode_palette_with(range, mask, sampler, &EncodeOptions::default())
}

fn encode_palette_with<S: VoxelSampler>(
    range: RegionRange,
    mask: u32,
    sampler: &S,
    options: &EncodeOptions,
) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    palette::encode(
        &mut cursor,
        range,
        ChannelMask::from_bits(mask),
        sampler,
        options,
    )
    .unwrap();
    cursor.into_inner()
}

fn cube() -> RegionRange {
    RegionRange::new(Offset3D::new(0, 0, 0), Extent3D::new(8, 8, 8))
}

// Scenario A: a constant region collapses to a single header entry.
#[test]
fn uniform_scalar_region() {
    let bytes = encode_palette(cube(), 0b1, &|_: Offset3D, _: ChannelId| 0xDEAD_BEEFu32);
    assert_eq!(&bytes[0..4], b"gvp\0");
    let blob_size = read_u32_le(&bytes, 28);
    assert_eq!(blob_size, 0);
    assert_eq!(bytes.len() as u64, PREAMBLE_SIZE + CHANNEL_HEADER_SIZE as u64);
    let table = PREAMBLE_SIZE as usize;
    assert_eq!(read_u32_le(&bytes, table), 1); // variant_n
    assert_eq!(read_u32_le(&bytes, table + 4), 0xDEAD_BEEF); // the sample itself

    let grid = palette::decode(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(grid.get(Offset3D::new(3, 4, 5), ChannelId(0)), 0xDEAD_BEEF);
}

// Scenario B: two variants pack one bit per voxel.
#[test]
fn two_variant_checker() {
    let checker =
        |pos: Offset3D, _: ChannelId| if (pos.x + pos.y + pos.z) & 1 == 1 { 0xAAu32 } else { 0x55 };
    let bytes = encode_palette(cube(), 0b1, &checker);

    let table = PREAMBLE_SIZE as usize;
    assert_eq!(read_u32_le(&bytes, table), 2);
    let blob_size = read_u32_le(&bytes, 28) as usize;
    assert_eq!(blob_size, 4 * 2 + packed_indices_size(1));
    assert_eq!(packed_indices_size(1), 64 + 4);

    // palette is ascending
    let blobs = table + CHANNEL_HEADER_SIZE;
    let blob_offset = read_u32_le(&bytes, table + 4) as usize;
    assert_eq!(read_u32_le(&bytes, blobs + blob_offset), 0x55);
    assert_eq!(read_u32_le(&bytes, blobs + blob_offset + 4), 0xAA);

    let grid = palette::decode(&mut Cursor::new(bytes)).unwrap();
    for z in 0..8 {
        for y in 0..8 {
            for x in 0..8 {
                let pos = Offset3D::new(x, y, z);
                assert_eq!(grid.get(pos, ChannelId(0)), checker(pos, ChannelId(0)));
            }
        }
    }
}

// Scenario C: an extent that is not a multiple of the region side.
#[test]
fn multi_region_partial_extent() {
    let range = RegionRange::new(Offset3D::new(0, 0, 0), Extent3D::new(9, 8, 8));
    let sampler = |pos: Offset3D, _: ChannelId| pos.x as u32;
    let bytes = encode_palette(range, 0b1, &sampler);

    // two regions along x, ci fastest then rx
    let table = PREAMBLE_SIZE as usize;
    assert_eq!(read_u32_le(&bytes, table), 8); // region (0,0,0): values 0..=7
    assert_eq!(read_u32_le(&bytes, table + CHANNEL_HEADER_SIZE), 2); // region (1,0,0): {0, 8}

    // emitted length is preamble + table + blob area
    let blob_size = read_u32_le(&bytes, 28) as usize;
    assert_eq!(
        bytes.len(),
        PREAMBLE_SIZE as usize + 2 * CHANNEL_HEADER_SIZE + blob_size
    );

    let grid = palette::decode(&mut Cursor::new(bytes)).unwrap();
    for x in 0..9 {
        assert_eq!(grid.get(Offset3D::new(x, 3, 6), ChannelId(0)), x as u32);
    }
}

// Scenario D: channel slots follow ascending set-bit order.
#[test]
fn three_channel_ordering() {
    let sampler = |pos: Offset3D, ch: ChannelId| ch.0 * 1000 + pos.x as u32;
    let bytes = encode_palette(cube(), 0b1011, &sampler);

    let table = PREAMBLE_SIZE as usize;
    let blobs = table + 3 * CHANNEL_HEADER_SIZE;
    for (ci, channel_id) in [0u32, 1, 3].into_iter().enumerate() {
        let entry = table + ci * CHANNEL_HEADER_SIZE;
        assert_eq!(read_u32_le(&bytes, entry), 8);
        // each channel's ascending palette starts at channel_id * 1000
        let blob_offset = read_u32_le(&bytes, entry + 4) as usize;
        assert_eq!(read_u32_le(&bytes, blobs + blob_offset), channel_id * 1000);
    }

    let grid = palette::decode(&mut Cursor::new(bytes)).unwrap();
    for channel_id in [0u32, 1, 3] {
        for x in 0..8 {
            assert_eq!(
                grid.get(Offset3D::new(x, 0, 0), ChannelId(channel_id)),
                channel_id * 1000 + x as u32
            );
        }
    }
}

// Scenario E: every voxel distinct forces the raw-tile path.
#[test]
fn raw_path_region() {
    let sampler = |pos: Offset3D, _: ChannelId| (pos.x + pos.y * 8 + pos.z * 64) as u32;
    let bytes = encode_palette(cube(), 0b1, &sampler);

    let table = PREAMBLE_SIZE as usize;
    assert_eq!(read_u32_le(&bytes, table), 512);
    assert_eq!(read_u32_le(&bytes, 28) as usize, RAW_TILE_SIZE);

    let grid = palette::decode(&mut Cursor::new(bytes)).unwrap();
    for z in 0..8 {
        for y in 0..8 {
            for x in 0..8 {
                let pos = Offset3D::new(x, y, z);
                assert_eq!(grid.get(pos, ChannelId(0)), sampler(pos, ChannelId(0)));
            }
        }
    }
}

// Scenario F: raw codec random access.
#[test]
fn raw_codec_random_access() {
    let range = RegionRange::new(Offset3D::new(0, 0, 0), Extent3D::new(2, 2, 2));
    let grid = VoxelGrid::from_fn(range, ChannelMask::from_bits(0b101), |pos, ch| {
        100 * ch.0 + (pos.x + 2 * pos.y + 4 * pos.z) as u32
    })
    .unwrap();

    let mut buf = Cursor::new(Vec::new());
    raw::encode(&mut buf, range, grid.channel_mask(), &grid).unwrap();
    assert_eq!(buf.get_ref().len() as u64, RAW_HEADER_SIZE + 4 * 2 * 8);

    let ctx = AdapterContext::new();
    let mut parser = RawParser::new(&mut buf);
    parser.begin(&ctx);
    assert_eq!(parser.state(), ParseState::BegunValid);
    for z in 0..2 {
        for y in 0..2 {
            for x in 0..2 {
                for channel_id in [0u32, 2] {
                    let pos = Offset3D::new(x, y, z);
                    let channel = ChannelId(channel_id);
                    let region = parser.load_region(&ctx, pos, channel);
                    assert_eq!(region.flags, REGION_FLAG_UNIFORM);
                    assert_eq!(
                        parser.sample_region(&region, pos, channel),
                        grid.get(pos, channel)
                    );
                    parser.unload_region(region);
                }
            }
        }
    }
    // the composed load/sample/unload helper agrees
    let pos = Offset3D::new(1, 0, 1);
    assert_eq!(
        parser.sample_voxel(&ctx, pos, ChannelId(2)),
        grid.get(pos, ChannelId(2))
    );
    assert!(!ctx.has_errors());
}

// Every index width from one to nine bits round-trips.
#[test]
fn all_index_widths_roundtrip() {
    for variants in [2u32, 3, 5, 9, 17, 33, 65, 129, 257, 367] {
        let sampler = move |pos: Offset3D, _: ChannelId| {
            (pos.x + pos.y * 8 + pos.z * 64) as u32 % variants
        };
        let bytes = encode_palette(cube(), 0b1, &sampler);
        assert_eq!(read_u32_le(&bytes, PREAMBLE_SIZE as usize), variants);
        let grid = palette::decode(&mut Cursor::new(bytes)).unwrap();
        for z in 0..8 {
            for y in 0..8 {
                for x in 0..8 {
                    let pos = Offset3D::new(x, y, z);
                    assert_eq!(grid.get(pos, ChannelId(0)), sampler(pos, ChannelId(0)));
                }
            }
        }
    }
}

// Out-of-extent cells sample as zero and count as a variant.
#[test]
fn out_of_extent_reads_zero() {
    let range = RegionRange::new(Offset3D::new(0, 0, 0), Extent3D::new(4, 4, 4));
    let bytes = encode_palette(range, 0b1, &|_: Offset3D, _: ChannelId| 5u32);

    // the 8^3 region cube covers 4^3 in-extent cells plus zero padding
    let table = PREAMBLE_SIZE as usize;
    assert_eq!(read_u32_le(&bytes, table), 2);

    let grid = palette::decode(&mut Cursor::new(bytes)).unwrap();
    for z in 0..4 {
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(grid.get(Offset3D::new(x, y, z), ChannelId(0)), 5);
            }
        }
    }
}

// A negative offset shifts world positions but not the encoding.
#[test]
fn negative_offset_roundtrip() {
    let range = RegionRange::new(Offset3D::new(-5, -3, 2), Extent3D::new(10, 6, 9));
    let sampler = |pos: Offset3D, ch: ChannelId| {
        (pos.x * 7 + pos.y * 13 + pos.z * 31) as u32 ^ ch.0 << 20
    };
    let bytes = encode_palette(range, 0b11, &sampler);
    let grid = palette::decode(&mut Cursor::new(bytes)).unwrap();
    for z in 2..11 {
        for y in -3..3 {
            for x in -5..5 {
                for channel_id in [0u32, 1] {
                    let pos = Offset3D::new(x, y, z);
                    let channel = ChannelId(channel_id);
                    assert_eq!(grid.get(pos, channel), sampler(pos, channel));
                }
            }
        }
    }
}

// Reproducible mode pins blob offsets; default mode decodes the same.
#[test]
fn reproducible_is_stable_and_equivalent() {
    let range = RegionRange::new(Offset3D::new(0, 0, 0), Extent3D::new(24, 16, 8));
    let sampler = |pos: Offset3D, _: ChannelId| (pos.x / 4 + pos.y / 4 + pos.z / 4) as u32;
    let options = EncodeOptions { reproducible: true };
    let first = encode_palette_with(range, 0b1, &sampler, &options);
    let second = encode_palette_with(range, 0b1, &sampler, &options);
    assert_eq!(first, second);

    let parallel = encode_palette(range, 0b1, &sampler);
    let a = palette::decode(&mut Cursor::new(first)).unwrap();
    let b = palette::decode(&mut Cursor::new(parallel)).unwrap();
    assert_eq!(a, b);
}

// Palette container survives a trip through a real file.
#[test]
fn palette_file_roundtrip() {
    let range = RegionRange::new(Offset3D::new(0, 0, 0), Extent3D::new(17, 9, 12));
    let sampler = |pos: Offset3D, ch: ChannelId| {
        ((pos.x + pos.y + pos.z) as u32 % 5) * 111 + ch.0
    };
    let temp = NamedTempFile::new().unwrap();
    {
        let mut file = File::create(temp.path()).unwrap();
        palette::encode(
            &mut file,
            range,
            ChannelMask::from_bits(0b110),
            &sampler,
            &EncodeOptions::default(),
        )
        .unwrap();
    }
    let mut file = File::open(temp.path()).unwrap();
    let grid = palette::decode(&mut file).unwrap();
    for channel_id in [1u32, 2] {
        let channel = ChannelId(channel_id);
        for z in 0..12 {
            for y in 0..9 {
                for x in 0..17 {
                    let pos = Offset3D::new(x, y, z);
                    assert_eq!(grid.get(pos, channel), sampler(pos, channel));
                }
            }
        }
    }
}

// A raw container streams into a palette container through the
// adapter composition, without materializing a grid in between.
#[test]
fn blit_raw_parser_into_palette() {
    let range = RegionRange::new(Offset3D::new(0, 0, 0), Extent3D::new(12, 9, 7));
    let grid = VoxelGrid::from_fn(range, ChannelMask::from_bits(0b11), |pos, ch| {
        (pos.x + pos.y * 3 + pos.z * 5) as u32 % 9 + ch.0 * 100
    })
    .unwrap();
    let mut raw_buf = Cursor::new(Vec::new());
    raw::encode(&mut raw_buf, range, grid.channel_mask(), &grid).unwrap();

    let ctx = AdapterContext::new();
    let mut parser = RawParser::new(&mut raw_buf);
    parser.begin(&ctx);
    assert!(!ctx.has_errors());
    let range = parser.range();
    let mask = parser.channel_mask();

    let mut palette_buf = Cursor::new(Vec::new());
    voxpal::blit(
        &mut parser,
        voxpal::FormatId::Palette,
        &mut palette_buf,
        range,
        mask,
        &EncodeOptions::default(),
    )
    .unwrap();
    palette_buf.set_position(0);
    assert_eq!(palette::decode(&mut palette_buf).unwrap(), grid);
}

// Raw and palette agree through the blit dispatch.
#[test]
fn cross_codec_blit() {
    let range = RegionRange::new(Offset3D::new(1, 1, 1), Extent3D::new(5, 7, 3));
    let grid = VoxelGrid::from_fn(range, ChannelMask::from_bits(0b1), |pos, _| {
        (pos.x * pos.y * pos.z) as u32
    })
    .unwrap();

    let mut palette_buf = Cursor::new(Vec::new());
    voxpal::blit_grid(
        &grid,
        voxpal::FormatId::Palette,
        &mut palette_buf,
        &EncodeOptions::default(),
    )
    .unwrap();
    palette_buf.set_position(0);
    let decoded = palette::decode(&mut palette_buf).unwrap();

    let mut raw_buf = Cursor::new(Vec::new());
    voxpal::blit_grid(
        &decoded,
        voxpal::FormatId::Raw,
        &mut raw_buf,
        &EncodeOptions::default(),
    )
    .unwrap();
    raw_buf.set_position(0);
    assert_eq!(raw::decode(&mut raw_buf).unwrap(), grid);
}

#[test]
fn truncated_palette_container_errors() {
    let bytes = encode_palette(cube(), 0b1, &|pos: Offset3D, _: ChannelId| {
        (pos.x & 1) as u32
    });
    let cut = bytes.len() - 10;
    let err = palette::decode(&mut Cursor::new(bytes[..cut].to_vec())).unwrap_err();
    assert!(matches!(err, AdapterError::Io(_)));
}
