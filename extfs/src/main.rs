//! CLI entry point: `extfs [-u uid] [-g gid] [-m mode] [-r] <mount-path>
//! <device-path>` (spec §6.3).

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use fs_core::{Dispatcher, FileBlockDevice};
use fs_proto::LocalPort;

use extfs::format::SUPERBLOCK_OFFSET;
use extfs::fs::Ext2Fs;
use extfs::superblock::Volume;

/// The superblock's block size is needed before the real `FileBlockDevice`
/// can be constructed (its slot buffers are sized to it), so peek the
/// `s_log_block_size` field directly rather than guessing.
fn probe_block_size(path: &str) -> Result<u32, String> {
    let mut file = OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(|e| format!("opening {path}: {e}"))?;
    file.seek(SeekFrom::Start(SUPERBLOCK_OFFSET))
        .map_err(|e| format!("seeking to superblock: {e}"))?;
    let mut log_block_size = [0u8; 4];
    file.seek(SeekFrom::Start(SUPERBLOCK_OFFSET + 24))
        .map_err(|e| format!("seeking to s_log_block_size: {e}"))?;
    file.read_exact(&mut log_block_size)
        .map_err(|e| format!("reading s_log_block_size: {e}"))?;
    Ok(1024 << u32::from_le_bytes(log_block_size))
}

const FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const CACHE_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "extfs", about = "ext2 filesystem server")]
struct Args {
    #[arg(short = 'u', long, default_value_t = 0)]
    uid: u32,
    #[arg(short = 'g', long, default_value_t = 0)]
    gid: u32,
    #[arg(short = 'm', long, default_value_t = 0o755)]
    mode: u32,
    /// Force read-only, regardless of what the volume itself allows.
    #[arg(short = 'r', long)]
    read_only: bool,
    mount_path: String,
    device_path: String,
}

fn run(args: Args) -> Result<(), String> {
    log::info!(
        "extfs: mounting {} at {} (uid={} gid={} mode={:o})",
        args.device_path,
        args.mount_path,
        args.uid,
        args.gid,
        args.mode
    );

    let block_size = probe_block_size(&args.device_path)?;

    let file = OpenOptions::new()
        .read(true)
        .write(!args.read_only)
        .open(&args.device_path)
        .map_err(|e| format!("opening {}: {e}", args.device_path))?;
    let device = FileBlockDevice::open(file, block_size).map_err(|e| format!("opening device: {e}"))?;

    let vol = Volume::open(device, CACHE_CAPACITY).map_err(|e| format!("reading superblock: {e}"))?;
    let fs = Ext2Fs::new(vol, args.read_only);

    let port = LocalPort::new();
    let mut dispatcher = Dispatcher::new(port, fs, FLUSH_INTERVAL);

    log::info!("extfs: mounted, entering dispatch loop");
    // `LocalPort::wait` never actually blocks (there is no real kernel port
    // behind it in this workspace), so without a pause of our own this
    // would spin the CPU; the real dispatch loop under a real `MessagePort`
    // has no need for this sleep.
    loop {
        dispatcher.tick();
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("extfs: {e}");
            ExitCode::FAILURE
        }
    }
}
