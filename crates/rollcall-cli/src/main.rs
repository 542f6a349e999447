use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Attendance session CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show session status
    Status,
    /// Print the session's attendance log
    Log,
    /// List enrolled people
    Roster,
    /// Show persisted attendance records
    History {
        /// Maximum number of records
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// End the running session
    Stop,
    /// List available capture devices
    Devices,
    /// Grab a frame and report capture diagnostics
    Test {
        /// Camera device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Write the captured frame as a PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn status(&self) -> zbus::Result<String>;
    async fn log(&self) -> zbus::Result<Vec<String>>;
    async fn roster(&self) -> zbus::Result<String>;
    async fn history(&self, limit: u32) -> zbus::Result<String>;
    async fn stop_session(&self) -> zbus::Result<bool>;
}

async fn daemon_proxy() -> Result<AttendanceProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("is rollcalld running?")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let proxy = daemon_proxy().await?;
            print_json(&proxy.status().await?)?;
        }
        Commands::Log => {
            let proxy = daemon_proxy().await?;
            let entries = proxy.log().await?;
            if entries.is_empty() {
                println!("No attendance recorded yet");
            }
            for entry in entries {
                println!("{entry}");
            }
        }
        Commands::Roster => {
            let proxy = daemon_proxy().await?;
            print_json(&proxy.roster().await?)?;
        }
        Commands::History { limit } => {
            let proxy = daemon_proxy().await?;
            print_json(&proxy.history(limit).await?)?;
        }
        Commands::Stop => {
            let proxy = daemon_proxy().await?;
            proxy.stop_session().await?;
            println!("Session stopped");
        }
        Commands::Devices => {
            let devices = rollcall_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for device in devices {
                println!("{}  {} ({})", device.path, device.name, device.driver);
            }
        }
        Commands::Test { device, output } => {
            run_camera_test(&device, output.as_deref())?;
        }
    }

    Ok(())
}

/// Direct camera diagnostics, bypassing the daemon.
fn run_camera_test(device: &str, output: Option<&std::path::Path>) -> Result<()> {
    let camera = rollcall_hw::Camera::open(device)
        .with_context(|| format!("failed to open {device}"))?;
    println!(
        "Opened {} at {}x{} ({:?})",
        camera.device_path, camera.width, camera.height, camera.fourcc
    );

    let mut stream = camera.stream()?;
    // Give the camera's auto-exposure a few frames to settle.
    for _ in 0..4 {
        let _ = stream.grab();
    }
    let frame = stream.grab()?;

    println!(
        "Captured frame seq={} brightness={:.1}{}",
        frame.sequence,
        frame.avg_brightness(),
        if frame.is_dark { " (dark)" } else { "" }
    );

    if let Some(path) = output {
        let img = image::GrayImage::from_raw(frame.width, frame.height, frame.data)
            .context("frame buffer did not match the negotiated dimensions")?;
        img.save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Wrote {}", path.display());
    }

    Ok(())
}
