//! kmsres - inspect and drive DRM/KMS display resources
//!
//! Lists the discovered topology, applies a mode to a display path and
//! optionally watches for hotplug events.

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use kmsres::drm::{Device, PlaneType};
use kmsres::{is_supported_output_height, Config, ResourceManager, Resolution, TopologyChange};

/// Global flag for shutdown requested via signal (SIGTERM/SIGINT/SIGHUP)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Set up signal handlers for graceful shutdown of the watch loop
///
/// Handles SIGTERM (systemd stop), SIGINT (Ctrl+C), and SIGHUP (terminal hangup).
fn setup_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGTERM,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGINT,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGHUP,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
    }
}

extern "C" fn shutdown_signal_handler(_signo: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// Command line options
#[derive(Debug, Default)]
struct Options {
    config: Option<String>,
    list: bool,
    mode: Option<(Resolution, u32)>,
    path: u8,
    watch: bool,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self> {
        let mut opts = Options::default();
        let mut iter = args.iter().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    let value = iter.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                    opts.config = Some(value.clone());
                }
                "--list" | "-l" => opts.list = true,
                "--mode" | "-m" => {
                    let value = iter.next().ok_or_else(|| anyhow!("--mode needs WxH[@HZ]"))?;
                    opts.mode = Some(parse_mode(value)?);
                }
                "--path" | "-p" => {
                    let value = iter.next().ok_or_else(|| anyhow!("--path needs a number"))?;
                    opts.path = value
                        .parse()
                        .with_context(|| format!("Invalid display path: {}", value))?;
                }
                "--watch" | "-w" => opts.watch = true,
                other => bail!("Unknown option: {} (see --help)", other),
            }
        }
        Ok(opts)
    }
}

/// Parse "WxH" or "WxH@HZ"
fn parse_mode(s: &str) -> Result<(Resolution, u32)> {
    let (size, hz) = match s.split_once('@') {
        Some((size, hz)) => (
            size,
            hz.parse()
                .with_context(|| format!("Invalid refresh rate: {}", hz))?,
        ),
        None => (s, 0),
    };
    let size = Resolution::parse(size).ok_or_else(|| anyhow!("Invalid mode: {}", s))?;
    if !is_supported_output_height(size.height) {
        bail!("Output height {} is not supported by the scaler", size.height);
    }
    Ok((size, hz))
}

fn print_help() {
    println!(
        r#"kmsres {} - display resource manager for Linux DRM/KMS

USAGE:
    kmsres [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    -c, --config PATH       Use this config file
    -l, --list              Print connectors, CRTCs and planes (default)
    -m, --mode WxH[@HZ]     Apply a mode (0 Hz or no rate = any)
    -p, --path N            Display path for --mode (N-th plugged connector)
    -w, --watch             Watch hotplug events until interrupted

EXAMPLES:
    kmsres --list
    kmsres --mode 1280x720@60 --path 0
    sudo kmsres --watch

CONFIG FILE:
    ~/.config/kmsres/config.toml
"#,
        env!("CARGO_PKG_VERSION")
    );
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();

    // --help
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // --version
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("kmsres {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let opts = Options::parse(&args)?;
    debug!("Options: {:?}", opts);

    let config = match &opts.config {
        Some(path) => Config::load_from_file(Path::new(path))?,
        None => Config::load(),
    };

    let watch_hotplug = opts.watch && config.hotplug.enabled;
    let mut manager = ResourceManager::new(config.display.max_resolution, watch_hotplug)
        .context("Failed to initialize display resources")?;

    if let Some((size, vrefresh)) = opts.mode {
        manager
            .change_mode(size, opts.path, vrefresh)
            .with_context(|| format!("Failed to set {} on display path {}", size, opts.path))?;
        println!("Display path {}: {}", opts.path, size);
    }

    if opts.list || (opts.mode.is_none() && !opts.watch) {
        print_topology(&manager, &config);
    }

    if opts.watch {
        watch(&mut manager, &config);
    }

    Ok(())
}

/// Handle hotplug events until a shutdown signal arrives
fn watch(manager: &mut ResourceManager, config: &Config) {
    setup_signal_handlers();
    let changes = manager.subscribe();
    let interval = config.hotplug.poll_interval();
    info!("Watching hotplug events every {:?}", interval);

    while !shutdown_requested() {
        std::thread::sleep(interval);
        if manager.dispatch() == 0 {
            continue;
        }
        while let Ok(change) = changes.try_recv() {
            print_change(&change);
        }
    }
    info!("Received shutdown signal, exiting");
}

fn print_change(change: &TopologyChange) {
    println!("{}: topology changed", change.device);
    for bounds in &change.crtcs {
        println!(
            "  CRTC {}: {} .. {} (connectors {:?})",
            bounds.crtc, bounds.min, bounds.max, bounds.connectors
        );
    }
}

fn print_topology(manager: &ResourceManager, config: &Config) {
    for device in manager.devices() {
        print_device(device);
    }
    let Some(primary) = manager.primary_device() else {
        println!("No DRM device found");
        return;
    };

    println!("Primary: {}", primary.path());
    println!("  plugged connectors: {}", manager.plugged_connector_count());
    if let Some(base) = manager.plane_base() {
        println!("  plane base: {}", base);
    }
    for (index, plane) in manager.planes().into_iter().enumerate() {
        let kind = manager.plane_type(plane).unwrap_or(PlaneType::None);
        println!(
            "  plane {} {} ({:?}): CRTC {:?}, connector {:?}",
            plane,
            config.display.plane_name(index).unwrap_or("-"),
            kind,
            manager.crtc_for_plane(plane),
            manager.connector_for_plane(plane)
        );
    }
    for (index, connector) in primary.connectors().iter().enumerate() {
        let sizes: Vec<String> = manager
            .supported_resolutions(index, config)
            .iter()
            .map(|s| s.to_string())
            .collect();
        if !sizes.is_empty() {
            println!("  {} usable: {}", connector.name(), sizes.join(" "));
        }
    }
}

fn print_device(device: &Device) {
    if !device.is_usable() {
        match device.failure() {
            Some(err) => println!("{}: unusable ({})", device.path(), err),
            None => println!("{}: unusable", device.path()),
        }
        return;
    }
    println!("{}:", device.path());
    for connector in device.connectors() {
        let edid = match connector.edid() {
            Some(edid) if edid.has_valid_header() => format!("EDID {} bytes", edid.as_bytes().len()),
            Some(_) => "EDID invalid".to_string(),
            None => "no EDID".to_string(),
        };
        let modes: Vec<String> = connector
            .supported_modes()
            .iter()
            .map(|s| s.to_string())
            .collect();
        println!(
            "  connector {} {} [{}] CRTC {:?}, {}: {}",
            connector.id(),
            connector.name(),
            if connector.is_plugged() { "plugged" } else { "unplugged" },
            connector.crtc_id(),
            edid,
            modes.join(" ")
        );
    }
    for crtc in device.crtcs() {
        let (min, max) = (crtc.min(), crtc.max());
        println!(
            "  CRTC {} (index {}) {:?}: {} .. {}, scanout {:?}",
            crtc.id(),
            crtc.index(),
            crtc.state(),
            min,
            max,
            crtc.scanout().map(|fb| (fb.fb_id(), fb.size()))
        );
    }
    for plane in device.planes() {
        println!(
            "  plane {} {:?} possible CRTCs {:#b}",
            plane.id(),
            plane.plane_type(),
            plane.possible_crtcs()
        );
    }
}
