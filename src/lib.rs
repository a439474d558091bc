pub mod adapter;
pub mod bits;
pub mod grid;
pub mod palette;
pub mod raw;
pub mod region;

pub use adapter::{
    blit, blit_grid, AdapterContext, AdapterError, FormatId, ParseAdapter, ParseState,
    VoxelSampler,
};
pub use grid::VoxelGrid;
pub use palette::EncodeOptions;
pub use region::{ChannelId, ChannelMask, Extent3D, Offset3D, Region, RegionRange};
