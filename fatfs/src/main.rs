//! CLI entry point: `fatfs [-u uid] [-g gid] [-m mode] [-r] <mount-path>
//! <device-path>` (spec §6.3), grounded on `main.c`'s startup sequence:
//! open the device, scan its MBR for a FAT partition, mount, serve.

use std::fs::OpenOptions;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use fs_core::{Dispatcher, FileBlockDevice};
use fs_proto::LocalPort;

use fatfs::fs::FatFs;
use fatfs::Volume;

const FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const CACHE_CAPACITY: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "fatfs", about = "FAT12/16/32 filesystem server")]
struct Args {
    #[arg(short = 'u', long, default_value_t = 0)]
    uid: u32,
    #[arg(short = 'g', long, default_value_t = 0)]
    gid: u32,
    #[arg(short = 'm', long, default_value_t = 0o755)]
    mode: u32,
    #[arg(short = 'r', long)]
    read_only: bool,
    mount_path: String,
    device_path: String,
}

fn run(args: Args) -> Result<(), String> {
    log::info!("fatfs: mounting {} at {}", args.device_path, args.mount_path);

    let file = OpenOptions::new()
        .read(true)
        .write(!args.read_only)
        .open(&args.device_path)
        .map_err(|e| format!("opening {}: {e}", args.device_path))?;
    let device = FileBlockDevice::open(file, fatfs::format::SECTOR_SIZE as u32)
        .map_err(|e| format!("reading {}: {e}", args.device_path))?;
    let vol = Volume::open(device, CACHE_CAPACITY)?;
    log::info!("fatfs: mounted as {:?}", vol.fat_type);

    let fs = FatFs::new(vol, args.read_only);
    let port = LocalPort::new();
    let mut dispatcher = Dispatcher::new(port, fs, FLUSH_INTERVAL);

    log::info!("fatfs: entering dispatch loop");
    loop {
        dispatcher.tick();
        // LocalPort::wait() never actually blocks in this workspace, so
        // the loop needs an explicit pace to avoid busy-spinning; the real
        // dispatch loop has no such need once wait() suspends for real.
        std::thread::sleep(Duration::from_millis(100));
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("fatfs: {e}");
            ExitCode::FAILURE
        }
    }
}
