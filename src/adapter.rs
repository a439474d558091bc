//! The adapter model both codecs plug into: the sampler façade, the
//! shared error sink, the parse-side state machine, and the by-name
//! format registry.

use crate::grid::VoxelGrid;
use crate::palette::{self, EncodeOptions, PALETTE_MAGIC};
use crate::raw::{self, RAW_MAGIC};
use crate::region::{ChannelId, ChannelMask, Offset3D, RegionRange};
use std::io::{self, Seek, Write};
use std::sync::Mutex;
use thiserror::Error;

/// Produces one u32 sample for a world position and a channel.
///
/// Implementations must be `Sync`: the palette serializer samples from
/// many region tasks concurrently.
pub trait VoxelSampler: Sync {
    fn sample(&self, pos: Offset3D, channel: ChannelId) -> u32;
}

impl<F> VoxelSampler for F
where
    F: Fn(Offset3D, ChannelId) -> u32 + Sync,
{
    fn sample(&self, pos: Offset3D, channel: ChannelId) -> u32 {
        self(pos, channel)
    }
}

#[derive(Error, Debug)]
pub enum AdapterError {
    /// Malformed container data or a broken codec invariant
    /// (bad magic, out-of-range blob offset, palette lookup miss).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The output cannot be expressed in the container format,
    /// e.g. a blob area larger than u32.
    #[error("unrepresentable output: {0}")]
    Unrepresentable(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Error sink shared between the container and its region tasks.
///
/// A task that hits a fatal condition pushes here and returns; siblings
/// keep running and the container surfaces the first recorded error
/// after the join.
#[derive(Debug, Default)]
pub struct AdapterContext {
    errors: Mutex<Vec<AdapterError>>,
}

impl AdapterContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_error(&self, error: AdapterError) {
        tracing::warn!("adapter error: {error}");
        self.errors.lock().unwrap().push(error);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().unwrap().is_empty()
    }

    /// Remove and return the first pushed error.
    pub fn take_first(&self) -> Option<AdapterError> {
        let mut errors = self.errors.lock().unwrap();
        if errors.is_empty() {
            None
        } else {
            Some(errors.remove(0))
        }
    }
}

/// Lifecycle of a parse adapter.
///
/// `Errored` is terminal: every later load returns the zero region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Created,
    BegunValid,
    Loading,
    Ended,
    Errored,
}

// ── Format registry ──────────────────────────────────────────────────────────

/// Tagged descriptor for the two container formats, keyed by name or by
/// the magic in the first four bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatId {
    Raw,
    Palette,
}

impl FormatId {
    pub fn name(&self) -> &'static str {
        match self {
            FormatId::Raw => "gvox_raw",
            FormatId::Palette => "gvox_palette",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "gvox_raw" => Some(FormatId::Raw),
            "gvox_palette" => Some(FormatId::Palette),
            _ => None,
        }
    }

    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            RAW_MAGIC => Some(FormatId::Raw),
            PALETTE_MAGIC => Some(FormatId::Palette),
            _ => None,
        }
    }
}

/// Parse-side voxel loads.  `&mut` because a load may reposition the
/// underlying stream; a failed load reports to the sink and returns
/// zero.
pub trait ParseAdapter {
    fn load_voxel(&mut self, ctx: &AdapterContext, pos: Offset3D, channel: ChannelId) -> u32;
}

// Funnels concurrent sampler calls onto one parse adapter.
struct SyncSampler<'a, P: ParseAdapter> {
    parser: Mutex<&'a mut P>,
    ctx: &'a AdapterContext,
}

impl<P: ParseAdapter + Send> VoxelSampler for SyncSampler<'_, P> {
    fn sample(&self, pos: Offset3D, channel: ChannelId) -> u32 {
        self.parser.lock().unwrap().load_voxel(self.ctx, pos, channel)
    }
}

/// Drive a serialize pass that samples lazily from a parse adapter.
///
/// Region tasks serialize their loads through a mutex on the adapter,
/// so no dense grid is materialized.  Errors the adapter pushed while
/// loading surface after the pass completes.
pub fn blit<P, W>(
    parser: &mut P,
    format: FormatId,
    out: &mut W,
    range: RegionRange,
    mask: ChannelMask,
    options: &EncodeOptions,
) -> Result<(), AdapterError>
where
    P: ParseAdapter + Send,
    W: Write + Seek,
{
    let ctx = AdapterContext::new();
    let source = SyncSampler {
        parser: Mutex::new(parser),
        ctx: &ctx,
    };
    match format {
        FormatId::Raw => raw::encode(out, range, mask, &source)?,
        FormatId::Palette => palette::encode(out, range, mask, &source, options)?,
    }
    if let Some(err) = ctx.take_first() {
        return Err(err);
    }
    Ok(())
}

/// Serialize an in-memory `grid` into the container selected by
/// `format`: the dense-source counterpart of [`blit`].
///
/// The parse side of the round trip is format-specific:
/// [`raw::decode`] and [`palette::decode`] both reconstruct a
/// [`VoxelGrid`], which is itself a [`VoxelSampler`].
pub fn blit_grid<W: Write + Seek>(
    grid: &VoxelGrid,
    format: FormatId,
    out: &mut W,
    options: &EncodeOptions,
) -> Result<(), AdapterError> {
    match format {
        FormatId::Raw => raw::encode(out, grid.range(), grid.channel_mask(), grid),
        FormatId::Palette => {
            palette::encode(out, grid.range(), grid.channel_mask(), grid, options)
        }
    }
}
