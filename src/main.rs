//! vstkeep - load VST2 plugins and keep them idling.
//!
//! Opens every plugin given on the command line, services their idle needs
//! for a while, logs any parameter changes they make on their own, then
//! releases them and waits for the deferred library unloads to flush.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use vstkeep::{Host, HostConfig, IdleFlags, Notification, NotifyFn, PluginKind};

#[derive(Parser, Debug)]
#[command(name = "vstkeep")]
struct Args {
    /// How long to keep the plugins loaded
    #[arg(short, long, default_value_t = 10)]
    seconds: u64,

    /// VST2 plugin libraries to load
    #[arg(required = true)]
    plugins: Vec<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = HostConfig::load();
    log::info!("Starting vstkeep ({} plugins)", args.plugins.len());

    let host = Host::with_defaults(config.clone());

    let on_change: NotifyFn = Arc::new(|handle, notification| match notification {
        Notification::ParamsChanged {
            old_count,
            new_count,
        } => log::info!(
            "{}: parameters changed ({} -> {} params)",
            handle,
            old_count,
            new_count
        ),
    });

    let mut handles = Vec::new();
    for path in &args.plugins {
        match host.open_vst2(path, PluginKind::Effect, None) {
            Ok(handle) => {
                host.set_notify(handle, Some(on_change.clone()));
                host.set_needs_idle(handle, IdleFlags::OUTSIDE_EDIT);
                handles.push(handle);
            }
            Err(e) => log::error!("Skipping {}: {}", path.display(), e),
        }
    }

    std::thread::sleep(Duration::from_secs(args.seconds));

    for handle in handles {
        host.unref_handle(handle);
    }

    // Let the countdown run out so the libraries are released by the timer.
    let grace = config.idle_interval() * (config.unload_countdown() + 2);
    log::info!("Waiting {:?} for deferred unloads", grace);
    let deadline = std::time::Instant::now() + grace;
    while host.timer_running() && std::time::Instant::now() < deadline {
        std::thread::sleep(config.idle_interval());
    }

    host.shutdown();
    log::info!("vstkeep stopped");
    Ok(())
}
