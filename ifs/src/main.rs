//! CLI entry point: `ifs [-u uid] [-g gid] [-m mode] [-r] <mount-path>
//! <phys-addr-hex> <size-decimal>` (spec §6.3). In this workspace there is
//! no physical memory to map, so `device-path` names a file holding the
//! image and `phys-addr-hex` is accepted but unused, kept only for CLI
//! parity with the original kernel-supplied boot arguments.

use std::fs;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use fs_core::Dispatcher;
use fs_proto::LocalPort;

use ifs::Ifs;

const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "ifs", about = "in-memory read-only initial filesystem server")]
struct Args {
    #[arg(short = 'u', long, default_value_t = 0)]
    uid: u32,
    #[arg(short = 'g', long, default_value_t = 0)]
    gid: u32,
    #[arg(short = 'm', long, default_value_t = 0o755)]
    mode: u32,
    /// Accepted for CLI-surface parity; ifs is always read-only.
    #[arg(short = 'r', long)]
    read_only: bool,
    mount_path: String,
    image_path: String,
    /// Physical base address of the image, as handed down by the kernel in
    /// the original boot path. Unused here — the image is read from a file.
    phys_addr_hex: String,
    /// Image size in bytes, as handed down by the kernel. Unused here — the
    /// file's own length is authoritative.
    size_decimal: u64,
}

fn run(args: Args) -> Result<(), String> {
    log::info!(
        "ifs: mounting {} at {} (phys={} size={})",
        args.image_path,
        args.mount_path,
        args.phys_addr_hex,
        args.size_decimal
    );

    let image = fs::read(&args.image_path).map_err(|e| format!("reading {}: {e}", args.image_path))?;
    let fs = Ifs::open(image)?;

    let port = LocalPort::new();
    let mut dispatcher = Dispatcher::new(port, fs, FLUSH_INTERVAL);

    log::info!("ifs: mounted, entering dispatch loop");
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
            log::error!("ifs: {e}");
            ExitCode::FAILURE
        }
    }
}
