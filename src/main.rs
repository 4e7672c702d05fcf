// Entrypoint for the CLI application.
// - Keeps `main` small: resolve settings, set up logging and Ctrl+C, then
//   hand over to the UI loop.
// - Failing to create the working directories is the only fatal startup error.

use anyhow::Context;
use iaps3::{cancel::CancelToken, config::Settings, ui::main_menu};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // `IAPS3_LOG=info` shows every queue step; warnings and errors by default
    let filter = EnvFilter::try_from_env("IAPS3_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%H:%M:%S".to_string()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let settings = Settings::from_env()?;
    settings
        .ensure_dirs()
        .with_context(|| format!("creating working directories under {}", settings.home.display()))?;

    let cancel = CancelToken::new();
    if let Err(e) = cancel.install_ctrlc_handler() {
        tracing::warn!("Ctrl+C handler not installed: {e}");
    }

    // Start the interactive menu. This call blocks until the user exits.
    main_menu(settings, cancel)?;
    Ok(())
}
