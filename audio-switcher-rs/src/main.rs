use anyhow::{Context, Result};
use audio_switcher::audio::{AudioSystem, DeviceEnumerator, Reconciler};
use audio_switcher::platform;
use audio_switcher::{AudioService, DeviceId, Direction, SelectionStore, ServiceConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "audio-switcher",
    version,
    about = "Keeps the chosen default audio input and output devices in place"
)]
struct Cli {
    /// JSON file holding the persisted selection (defaults to the platform store)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Watch for changes and keep the selected devices as defaults (default)
    Run {
        /// Correct both directions once at startup
        #[arg(long)]
        reconcile_on_start: bool,
    },

    /// List devices by direction; `*` marks the current default
    List,

    /// Make a device the default and remember it
    Select { direction: Direction, id: u32 },

    /// Show the persisted targets and correction counters
    Status,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    #[cfg(windows)]
    let _com = platform::ComGuard::new();

    let system = platform::native_audio_system().context("Audio subsystem unavailable")?;
    let store = platform::selection_store(cli.store).context("Failed to open selection store")?;

    match cli.command.unwrap_or(Command::Run {
        reconcile_on_start: false,
    }) {
        Command::Run { reconcile_on_start } => {
            run(system, store, ServiceConfig { reconcile_on_start })
        }
        Command::List => {
            list(system.as_ref());
            Ok(())
        }
        Command::Select { direction, id } => select(system.as_ref(), store, direction, id),
        Command::Status => status(system.as_ref(), store.as_ref()),
    }
}

fn run(
    system: Arc<dyn AudioSystem>,
    store: Box<dyn SelectionStore>,
    config: ServiceConfig,
) -> Result<()> {
    let service = AudioService::start(system, store, config).context("Failed to start audio service")?;

    let events = service.events()?;
    thread::spawn(move || {
        for event in events {
            info!(event = event.name(), "Audio configuration changed");
        }
    });

    wait_for_shutdown();
    service.stop().context("Failed to stop audio service")
}

fn list(system: &dyn AudioSystem) {
    let devices = DeviceEnumerator::new(system).list_devices();

    for (heading, direction) in [
        ("Output Devices:", Direction::Output),
        ("Input Devices:", Direction::Input),
    ] {
        println!("{heading}");
        for device in devices.iter().filter(|d| d.direction == direction) {
            let mark = if device.is_current_default { '*' } else { ' ' };
            println!("  {mark} {:>10}  {}", device.id, device.name);
        }
    }
}

fn select(
    system: &dyn AudioSystem,
    mut store: Box<dyn SelectionStore>,
    direction: Direction,
    id: u32,
) -> Result<()> {
    let id = DeviceId::from_raw(id).context("Device id 0 does not name a device")?;
    Reconciler::new()
        .select_device(direction, id, system, store.as_mut())
        .with_context(|| format!("Failed to select {direction} device {id}"))?;
    println!("Default {direction} device set to {id}");
    Ok(())
}

fn status(system: &dyn AudioSystem, store: &dyn SelectionStore) -> Result<()> {
    let devices = DeviceEnumerator::new(system).list_devices();
    let name_of = |id: DeviceId| {
        devices
            .iter()
            .find(|d| d.id == id)
            .map_or("not connected", |d| d.name.as_str())
    };

    for direction in Direction::ALL {
        let selection = store.load(direction)?;
        let target = match selection.target {
            Some(id) => format!("{id} ({})", name_of(id)),
            None => "none".to_string(),
        };
        println!(
            "{direction}: target {target}, corrections {}",
            selection.correction_count
        );
    }
    Ok(())
}

/// Block until Ctrl+C or a quit message reaches the main thread.
#[cfg(windows)]
fn wait_for_shutdown() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use windows::Win32::Foundation::{BOOL, LPARAM, WPARAM};
    use windows::Win32::System::Console::SetConsoleCtrlHandler;
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::WindowsAndMessaging::{GetMessageW, PostThreadMessageW, MSG, WM_QUIT};

    static MAIN_THREAD: AtomicU32 = AtomicU32::new(0);

    unsafe extern "system" fn on_console_ctrl(_ctrl_type: u32) -> BOOL {
        let _ = PostThreadMessageW(
            MAIN_THREAD.load(Ordering::SeqCst),
            WM_QUIT,
            WPARAM(0),
            LPARAM(0),
        );
        BOOL(1)
    }

    unsafe {
        MAIN_THREAD.store(GetCurrentThreadId(), Ordering::SeqCst);
        let _ = SetConsoleCtrlHandler(Some(on_console_ctrl), true);

        let mut msg = MSG::default();
        while GetMessageW(&mut msg, None, 0, 0).into() {}
    }
}

/// Block until stdin is closed or a line is entered.
#[cfg(not(windows))]
fn wait_for_shutdown() {
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
}
