//! blockpress - compress textures on the GPU from the command line

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use blockpress::backend::webgpu::{list_gpus_async, WgpuBackend};
use blockpress::kernels::KernelDir;
use blockpress::{EncodeOptions, Encoder, EncoderConfig, FormatSelector, ImageSource, WrapMode};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blockpress")]
#[command(version)]
#[command(about = "GPU block-compression encoder for BC, ETC2, EAC and ASTC textures")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available GPUs
    Gpus,

    /// List the compressed formats a GPU can produce
    Formats {
        /// Directory holding the compute kernels
        #[arg(short, long, env = "BLOCKPRESS_KERNELS")]
        kernels: PathBuf,

        /// GPU index from `gpus` (default: best discrete GPU)
        #[arg(long)]
        gpu: Option<usize>,
    },

    /// Encode an image and report the result
    Encode {
        /// Image file to encode
        image: PathBuf,

        /// Directory holding the compute kernels
        #[arg(short, long, env = "BLOCKPRESS_KERNELS")]
        kernels: PathBuf,

        /// Format id, name, channel mask (rgb, rgba, r, rg) or "auto"
        #[arg(short, long)]
        format: Option<String>,

        /// Generate and encode a full mip chain
        #[arg(long)]
        mips: bool,

        /// Encode into the sRGB variant when the format has one
        #[arg(long)]
        srgb: bool,

        /// The image is a normal map
        #[arg(long)]
        normal: bool,

        /// The image has meaningful alpha
        #[arg(long)]
        alpha: bool,

        /// Flip the image vertically before encoding
        #[arg(long)]
        flip_y: bool,

        /// Prefer smaller RGB formats
        #[arg(long)]
        low_quality: bool,

        /// Texture wrap mode (repeat, mirror, clamp)
        #[arg(long, default_value = "repeat")]
        wrap: WrapMode,

        /// Encode options as JSON; flags given on the command line win
        #[arg(long)]
        options: Option<String>,

        /// GPU index from `gpus` (default: best discrete GPU)
        #[arg(long)]
        gpu: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(if cli.verbose { "blockpress=debug".parse()? } else { "blockpress=warn".parse()? }),
            )
            .init();
    }

    match cli.command {
        Commands::Gpus => {
            let gpus = list_gpus_async().await;
            if gpus.is_empty() {
                println!("No GPUs found");
            }
            for gpu in &gpus {
                println!("[{}] {}", gpu.adapter_index, gpu);
            }
        }

        Commands::Formats { kernels, gpu } => {
            let encoder = open_encoder(kernels, gpu, EncoderConfig::default()).await?;
            println!("{}", encoder.backend().info());
            for (name, id) in encoder.enumerate_supported_formats() {
                println!("{:>3}  {}", id, name);
            }
        }

        Commands::Encode {
            image,
            kernels,
            format,
            mips,
            srgb,
            normal,
            alpha,
            flip_y,
            low_quality,
            wrap,
            options,
            gpu,
        } => {
            let mut opts: EncodeOptions = match options {
                Some(json) => serde_json::from_str(&json).context("Invalid --options JSON")?,
                None => EncodeOptions::default(),
            };
            if let Some(format) = format {
                opts.format = Some(FormatSelector::parse(&format));
            }
            opts.mips |= mips;
            opts.srgb |= srgb;
            opts.normal |= normal;
            opts.alpha |= alpha;
            opts.flip_y |= flip_y;
            opts.prefer_low_quality |= low_quality;
            if wrap != WrapMode::Repeat {
                opts.wrap = wrap;
            }

            let config = EncoderConfig {
                verbose: cli.verbose,
                ..Default::default()
            };
            let encoder = open_encoder(kernels, gpu, config).await?;

            let location = image.to_string_lossy().to_string();
            let encoded = encoder
                .encode(ImageSource::url(location), &opts)
                .await
                .with_context(|| format!("Failed to encode {}", image.display()))?;

            println!("File:    {}", image.display());
            println!("Format:  {}{}", encoded.name, if encoded.srgb { " (sRGB)" } else { "" });
            println!("Size:    {}x{}", encoded.width, encoded.height);
            println!("Mips:    {}", encoded.mip_count);
            println!("Bytes:   {}", encoded.byte_size());
            match encoder.time_elapsed().await? {
                Some(ms) => println!("GPU:     {:.3} ms", ms),
                None => println!("GPU:     (timestamps unavailable)"),
            }
        }
    }

    Ok(())
}

async fn open_encoder(
    kernels: PathBuf,
    gpu: Option<usize>,
    config: EncoderConfig,
) -> Result<Encoder<WgpuBackend>> {
    let kernels = Arc::new(KernelDir::new(kernels));
    let backend = WgpuBackend::create(gpu, kernels.as_ref())
        .await
        .context("Failed to initialize GPU")?;
    Ok(Encoder::new(backend, kernels, config))
}
