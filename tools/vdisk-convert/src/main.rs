use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vdisk_copy::{
    copy_image, CopyOptions, CopyProgress, CopyReport, FileSink, HashAlgorithm,
    DEFAULT_CHUNK_SIZE,
};
use vdisk_provider::{
    AccessMode, DefaultOverlayPolicy, DeviceSpec, ProxyKind, Resolution, Resolver,
};

// Scanning a disk block-by-block can take hours on an enormous image that
// was probably specified by mistake.
const ABSURD_IMAGE_SIZE_BYTES: u64 = 16 * 1024 * 1024 * 1024 * 1024; // 16 TiB

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum SourceKind {
    /// Plain raw image or device.
    Raw,
    /// Numbered raw segment files joined in name order.
    MultiPart,
}

impl From<SourceKind> for ProxyKind {
    fn from(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Raw => ProxyKind::None,
            SourceKind::MultiPart => ProxyKind::MultiPartRaw,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "vdisk-convert",
    about = "Copy a disk image or device into a plain raw image, skipping zero blocks."
)]
struct Args {
    /// Input image path, physical drive number (hex) or device path
    input: String,

    /// Output raw image path
    output: PathBuf,

    /// How the input bytes are interpreted
    #[arg(long, value_enum, default_value_t = SourceKind::Raw)]
    source_kind: SourceKind,

    /// Copy chunk size in bytes (multiple of 512)
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size_bytes: usize,

    /// Write zero blocks instead of leaving sparse holes
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_skip_zero: bool,

    /// Checksum the source while copying (md5/sha1/sha256/sha512; repeatable)
    #[arg(long = "hash", value_name = "ALGORITHM", value_parser = HashAlgorithm::parse)]
    hashes: Vec<HashAlgorithm>,

    /// Suppress progress output
    #[arg(long, action = clap::ArgAction::SetTrue)]
    quiet: bool,

    /// Allow overwriting the output and bypass safety checks
    #[arg(long, action = clap::ArgAction::SetTrue)]
    force: bool,

    /// Log filter, e.g. "info" or "vdisk_copy=debug" (env: VDISK_LOG)
    #[arg(long, env = "VDISK_LOG", default_value = "warn")]
    log: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log).context("parse --log filter")?)
        .with_writer(io::stderr)
        .init();
    run(args)
}

fn run(args: Args) -> anyhow::Result<()> {
    validate_chunk_size(args.chunk_size_bytes)?;

    let spec = DeviceSpec::parse(&args.input);
    let resolver = Resolver::new();
    let resolution = resolver
        .resolve(
            &spec,
            args.source_kind.into(),
            AccessMode::ReadOnly,
            &DefaultOverlayPolicy,
        )
        .with_context(|| format!("open input {}", args.input))?;
    let mut provider = match resolution {
        Resolution::Provider { provider, .. } => provider,
        // ReadOnly never resolves to a passthrough, but the enum says so.
        Resolution::NativePassthrough { path, .. } => {
            bail!("input {} requires no conversion", path.display())
        }
    };

    let total = provider.length();
    if total > ABSURD_IMAGE_SIZE_BYTES && !args.force {
        bail!(
            "refusing to convert an extremely large image ({total} bytes > {ABSURD_IMAGE_SIZE_BYTES} bytes); use --force to override"
        );
    }

    let mut sink = FileSink::create(&args.output, args.force)
        .with_context(|| format!("create {}", args.output.display()))?;

    if !args.quiet {
        eprintln!("input:  {} ({} bytes)", args.input, total);
        eprintln!("output: {}", args.output.display());
    }

    let options = CopyOptions {
        chunk_size: args.chunk_size_bytes,
        skip_zero: !args.no_skip_zero,
        hashes: args.hashes.clone(),
    };
    let progress = CopyProgress::new();

    let outcome = std::thread::scope(|scope| {
        let worker = scope.spawn(|| copy_image(provider.as_mut(), &mut sink, &options, &progress));
        while !worker.is_finished() {
            report_progress(&progress, args.quiet);
            std::thread::sleep(Duration::from_millis(250));
        }
        worker.join()
    });
    let report = outcome
        .map_err(|_| anyhow!("copy worker panicked"))?
        .context("convert image")?;

    if !args.quiet {
        report_progress(&progress, false);
        eprintln!();
        eprintln!(
            "done: {} bytes written, {} bytes skipped as zero",
            report.bytes_copied, report.bytes_skipped
        );
    }
    print_digests(&report);

    Ok(())
}

fn report_progress(progress: &CopyProgress, quiet: bool) {
    if quiet {
        return;
    }
    let total = progress.total();
    let position = progress.position();
    let pct = if total == 0 {
        100
    } else {
        ((position as u128).saturating_mul(100) / total as u128) as u64
    };
    eprint!("\rprogress: {pct:3}% ({position}/{total} bytes)");
    let _ = io::stderr().flush();
}

fn print_digests(report: &CopyReport) {
    for (name, digest) in &report.digests {
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        println!("{name}  {hex}");
    }
}

fn validate_chunk_size(chunk_size: usize) -> anyhow::Result<()> {
    if chunk_size == 0 {
        bail!("chunk size must be non-zero");
    }
    if chunk_size % 512 != 0 {
        bail!("chunk size must be a multiple of 512 bytes (got {chunk_size})");
    }
    Ok(())
}
