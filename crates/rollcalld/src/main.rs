use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();
    let engine = engine::spawn_engine(&config)?;

    let service = dbus_interface::AttendanceService::new(engine, config.distance_threshold);
    let _connection = zbus::connection::Builder::session()?
        .name("org.rollcall.Attendance1")?
        .serve_at("/org/rollcall/Attendance1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
