use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Log file written in the working directory
pub const LOG_FILE_NAME: &str = "gitagrip.log";

/// Send tracing output to the append-only log file. The terminal belongs to
/// the UI, so nothing is written to stdout or stderr.
pub fn init(dir: &Path) -> Result<()> {
    let path = dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("Failed to install log subscriber: {}", err))?;

    install_panic_hook();
    Ok(())
}

/// Record panics in the log; the default hook output is lost on the alternate screen
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        error!("panic: {}", info);
        default_hook(info);
    }));
}
