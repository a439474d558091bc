use byteorder::{LittleEndian, ReadBytesExt};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use voxpal::palette::{self, EncodeOptions};
use voxpal::raw::RawParser;
use voxpal::{blit, blit_grid, AdapterContext, AdapterError, FormatId};

#[derive(Parser)]
#[command(name = "voxpal")]
#[command(about = "Palette-compressed voxel container tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-encode a raw container as a palette container
    Encode {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Serialize region tasks for byte-for-byte stable output
        #[arg(long)]
        reproducible: bool,
    },
    /// Expand a palette container back into a raw container
    Decode {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print container header fields
    Info {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    match &cli.command {
        Commands::Encode {
            input,
            output,
            reproducible,
        } => {
            let mut file = File::open(input)?;
            let ctx = AdapterContext::new();
            let mut parser = RawParser::new(&mut file);
            parser.begin(&ctx);
            if let Some(err) = ctx.take_first() {
                return Err(err.into());
            }
            let range = parser.range();
            let mask = parser.channel_mask();
            let options = EncodeOptions {
                reproducible: *reproducible,
            };
            let mut out = File::create(output)?;
            blit(&mut parser, FormatId::Palette, &mut out, range, mask, &options)?;
            println!("Encoded {} into {}", input.display(), output.display());
        }
        Commands::Decode { input, output } => {
            let mut file = File::open(input)?;
            let grid = palette::decode(&mut file)?;
            let mut out = File::create(output)?;
            blit_grid(&grid, FormatId::Raw, &mut out, &EncodeOptions::default())?;
            println!("Decoded {} into {}", input.display(), output.display());
        }
        Commands::Info { input, json } => info(input, *json)?,
    }
    Ok(())
}

fn info(path: &PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::open(path)?;
    let magic = file.read_u32::<LittleEndian>()?;
    let format = FormatId::from_magic(magic)
        .ok_or_else(|| AdapterError::InvalidInput("unrecognized container magic".into()))?;

    match format {
        FormatId::Palette => {
            let header = palette::read_header(&mut file)?;
            let (nx, ny, nz) = header.region_counts();
            if json {
                let value = serde_json::json!({
                    "format": format.name(),
                    "range": header.range,
                    "blob_size": header.blob_size,
                    "channel_mask": header.channel_mask.bits(),
                    "channel_n": header.channel_n,
                    "regions": { "x": nx, "y": ny, "z": nz },
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("--- palette container ---");
                print_range(header.range);
                println!("Blob size:    {}", header.blob_size);
                println!("Channel mask: {:#010x}", header.channel_mask.bits());
                println!("Channels:     {}", header.channel_n);
                println!("Regions:      {nx} x {ny} x {nz}");
            }
        }
        FormatId::Raw => {
            let ctx = AdapterContext::new();
            let mut parser = RawParser::new(&mut file);
            parser.begin(&ctx);
            if let Some(err) = ctx.take_first() {
                return Err(err.into());
            }
            let range = parser.range();
            let mask = parser.channel_mask();
            if json {
                let value = serde_json::json!({
                    "format": format.name(),
                    "range": range,
                    "channel_mask": mask.bits(),
                    "channel_n": mask.count(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                println!("--- raw container ---");
                print_range(range);
                println!("Channel mask: {:#010x}", mask.bits());
                println!("Channels:     {}", mask.count());
            }
        }
    }
    Ok(())
}

fn print_range(range: voxpal::RegionRange) {
    println!(
        "Offset:       ({}, {}, {})",
        range.offset.x, range.offset.y, range.offset.z
    );
    println!(
        "Extent:       {} x {} x {}",
        range.extent.x, range.extent.y, range.extent.z
    );
}
