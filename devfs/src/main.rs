//! CLI entry point: `devfs [-u uid] [-g gid] [-m mode] [-r] <mount-path>
//! <node-spec>...` (spec §6.3, §12). Each `node-spec` is `name:mode`, one
//! per device the kernel wants registered under `/dev` at startup.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use fs_core::Dispatcher;
use fs_proto::LocalPort;

use devfs::Devfs;

const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "devfs", about = "flat device node registry filesystem server")]
struct Args {
    #[arg(short = 'u', long, default_value_t = 0)]
    uid: u32,
    #[arg(short = 'g', long, default_value_t = 0)]
    gid: u32,
    #[arg(short = 'm', long, default_value_t = 0o666)]
    mode: u32,
    /// Accepted for CLI-surface parity with the other servers; devfs has
    /// no backing store to protect, so this has no effect.
    #[arg(short = 'r', long)]
    read_only: bool,
    mount_path: String,
    /// `name:mode` pairs, one per device node to pre-register.
    nodes: Vec<String>,
}

fn parse_node(spec: &str) -> Result<(String, u32), String> {
    let (name, mode) = spec
        .split_once(':')
        .ok_or_else(|| format!("invalid node spec {spec:?}, expected name:mode"))?;
    let mode = u32::from_str_radix(mode.trim_start_matches("0o"), 8)
        .map_err(|e| format!("invalid mode in {spec:?}: {e}"))?;
    Ok((name.to_string(), mode))
}

fn run(args: Args) -> Result<(), String> {
    log::info!("devfs: mounting at {} (uid={} gid={})", args.mount_path, args.uid, args.gid);

    let mut fs = Devfs::new();
    for spec in &args.nodes {
        let (name, mode) = parse_node(spec)?;
        fs.register(&name, mode, args.uid, args.gid, 0)
            .ok_or_else(|| format!("devfs: no room to register {name:?}"))?;
    }

    let port = LocalPort::new();
    let mut dispatcher = Dispatcher::new(port, fs, FLUSH_INTERVAL);

    log::info!("devfs: mounted, entering dispatch loop");
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
            log::error!("devfs: {e}");
            ExitCode::FAILURE
        }
    }
}
