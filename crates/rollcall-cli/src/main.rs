use anyhow::{Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face from an image file
    Enroll {
        /// Identity to enroll (the gallery key)
        #[arg(short, long)]
        identity: String,
        /// Optional class reference recorded in the roster
        #[arg(short, long)]
        class: Option<String>,
        /// Image file containing the face
        image: PathBuf,
    },
    /// Recognize a face and record attendance
    Attend {
        /// Image file containing the face
        image: PathBuf,
    },
    /// Show daemon status
    Status,
}

// `#[zbus::proxy]` generates the async `AttendanceProxy` used below.
#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    async fn enroll(&self, identity: &str, class_id: &str, image: &str) -> zbus::Result<String>;
    async fn record_attendance(&self, image: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

/// Read an image file and wrap it into the data-URI payload the daemon
/// expects. The MIME type is guessed from the file extension; the
/// daemon sniffs the real format from the bytes anyway.
fn image_payload(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read image file {}", path.display()))?;
    let mime = image::ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");
    Ok(format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(&bytes)
    ))
}

/// Print the daemon's `{status, message}` envelope; exit nonzero on a
/// reported error so the command is scriptable.
fn report(envelope: &str) -> Result<()> {
    let parsed: serde_json::Value =
        serde_json::from_str(envelope).context("daemon returned a malformed envelope")?;
    let message = parsed["message"].as_str().unwrap_or(envelope);
    println!("{message}");
    if parsed["status"] == "error" {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus — is rollcalld running?")?;
    let proxy = AttendanceProxy::new(&conn).await?;

    match cli.command {
        Commands::Enroll { identity, class, image } => {
            let payload = image_payload(&image)?;
            let reply = proxy
                .enroll(&identity, class.as_deref().unwrap_or(""), &payload)
                .await?;
            report(&reply)?;
        }
        Commands::Attend { image } => {
            let payload = image_payload(&image)?;
            let reply = proxy.record_attendance(&payload).await?;
            report(&reply)?;
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            println!("{reply}");
        }
    }

    Ok(())
}
