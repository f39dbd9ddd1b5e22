mod config;
mod control_plane;

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use clap::Parser;
use fuser::MountOption;
use log::info;
use signal_hook::consts::signal::*;
use signal_hook::iterator::Signals;

use config::{BackendConfig, MountConfig};
use control_plane::ControlPlane;
use rangefs_cache::{Engine, EngineConfig};
use rangefs_fuse::RangeFs;
use rangefs_models::Connector;

#[derive(Parser, Debug)]
#[command(name = "rangefs", version)]
struct Cli {
    /// Path to the TOML mount configuration.
    #[arg(short, long, default_value = "/etc/rangefs/config.toml")]
    config: PathBuf,

    /// Overrides `mount_point` from the config file.
    #[arg(long)]
    mount_point: Option<PathBuf>,

    /// Overrides `cache_dir` from the config file.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Overrides `control_socket` from the config file.
    #[arg(long)]
    control_socket: Option<PathBuf>,
}

fn build_connector(backend: &BackendConfig) -> std::io::Result<Arc<dyn Connector>> {
    match backend {
        BackendConfig::Gcs { .. } | BackendConfig::S3 { .. } => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "GCS/S3 connectors are documented but not implemented to production depth in this build; \
             see rangefs-backend's module docs for the adapter shape",
        )),
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match MountConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load {}: {err}", cli.config.display());
            std::process::exit(1);
        }
    };
    if let Some(mount_point) = cli.mount_point {
        config.mount_point = mount_point;
    }
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(control_socket) = cli.control_socket {
        config.control_socket = control_socket;
    }

    let connector = match build_connector(&config.backend) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    run(config, connector);
}

/// Separated from `main` so the mount/unmount lifecycle can be driven in
/// tests without touching `std::process::exit`.
fn run(config: MountConfig, connector: Arc<dyn Connector>) {
    std::fs::create_dir_all(&config.mount_point).expect("mount point does not exist and cannot be created");

    let engine_config = EngineConfig {
        cache_dir: config.cache_dir.clone(),
        workers: config.workers,
        fetch_block_size: config.fetch_block_size,
    };
    let engine = Arc::new(Engine::new(engine_config, connector).expect("failed to initialize engine"));

    let fs = RangeFs::new(Arc::clone(&engine));
    let index = fs.index();

    let options = vec![MountOption::FSName("rangefs".to_string()), MountOption::RO];
    let session = fuser::spawn_mount2(fs, &config.mount_point, &options).expect("failed to mount");

    let control_plane = Arc::new(ControlPlane::new(Arc::clone(&engine), index, session.notifier()));
    let _control_thread = control_plane
        .serve(&config.control_socket)
        .expect("failed to bind control socket");

    info!("rangefs mounted on {}", config.mount_point.display());

    let pair = Arc::new((Mutex::new(false), Condvar::new()));
    let pair_clone = Arc::clone(&pair);
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGQUIT, SIGHUP]).expect("failed to register signal handlers");
    thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGINT | SIGTERM | SIGQUIT | SIGHUP => {
                    let (lock, cvar) = &*pair_clone;
                    *lock.lock().unwrap() = true;
                    cvar.notify_one();
                    break;
                }
                other => log::warn!("unhandled signal: {other}"),
            }
        }
    });

    let (lock, cvar) = &*pair;
    let _stopped = cvar.wait_while(lock.lock().unwrap(), |stop| !*stop).expect("shutdown mutex poisoned");
    info!("unmounting rangefs");
    drop(session);
}
