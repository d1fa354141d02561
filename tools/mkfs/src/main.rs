//! Standalone formatter: creates (or reformats) a blockfs container file and, optionally,
//! populates it by recursively copying in a host directory tree.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use blockfs::layout::BLOCK_SIZE;
use blockfs::{BlockDevice, DirectoryHandle, FileHandle, Filesystem};
use clap::Parser;
use log::{error, info};

#[derive(Parser, Debug)]
#[command(name = "mkfs.blockfs", about = "Format a blockfs container file")]
struct Args {
    /// Path to the container file. Created if it does not already exist.
    container: PathBuf,

    /// Container size, e.g. "2M", "512K", "4096" (bytes). Rounded up to a whole block.
    #[arg(short = 's', long, default_value = "2M")]
    size: String,

    /// Reformat even if the container already exists.
    #[arg(short, long)]
    force: bool,

    /// Recursively copy this host directory's contents into the new root.
    #[arg(short, long)]
    populate: Option<PathBuf>,
}

/// Parses sizes like "2M", "512K", "4096" (bytes, the bare fallback) into a byte count.
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, mult) = match s.chars().last() {
        Some('K') | Some('k') => (&s[..s.len() - 1], 1024u64),
        Some('M') | Some('m') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') | Some('g') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    digits.trim().parse::<u64>().map(|n| n * mult).map_err(|e| format!("invalid size '{s}': {e}"))
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let bytes = match parse_size(&args.size) {
        Ok(b) => b,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let num_blocks = bytes.div_ceil(BLOCK_SIZE as u64) as u32;
    if num_blocks == 0 {
        error!("container must hold at least one block");
        return ExitCode::FAILURE;
    }

    if args.force {
        std::fs::remove_file(&args.container).ok();
    }

    let device = match BlockDevice::open(&args.container, num_blocks) {
        Ok(d) => d,
        Err(e) => {
            error!("failed to open '{}': {e}", args.container.display());
            return ExitCode::FAILURE;
        }
    };

    let (mut fs, mut root) = match Filesystem::init(device) {
        Ok(pair) => pair,
        Err(e) => {
            error!("failed to initialize filesystem: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        "formatted '{}': {} blocks ({} free)",
        args.container.display(),
        fs.num_blocks(),
        fs.free_blocks()
    );

    if let Some(src) = &args.populate {
        if let Err(e) = populate(&mut fs, &mut root, src) {
            error!("populate failed: {e}");
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = fs.flush() {
        error!("flush failed: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Recursively copies every entry under `src` into `dir`, creating subdirectories and
/// copying regular file contents.
fn populate(fs: &mut Filesystem, dir: &mut DirectoryHandle, src: &Path) -> blockfs::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(src)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            fs.mkdir(dir, &name)?;
            fs.change_dir(dir, &name)?;
            populate(fs, dir, &path)?;
            fs.change_dir(dir, "..")?;
        } else if file_type.is_file() {
            let mut fh: FileHandle = fs.create_file(dir, &name)?;
            let contents = std::fs::read(&path)?;
            fs.write(&mut fh, &contents)?;
            fs.close(fh)?;
            info!("copied {} ({} bytes)", path.display(), contents.len());
        }
    }
    Ok(())
}
