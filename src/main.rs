use anyhow::{Context, Result};
use tracing::{info, Level};

use cardwriter::components::rfid::RfidController;
use cardwriter::config::Config;
use cardwriter::console::{ConsoleReporter, StdinLines};
use cardwriter::session::{SystemClock, WriterSession};

fn init_logging(debug: bool) {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run_application() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(config.debug);
    info!("Configuration: {:?}", config);

    let key = config.key()?;
    let settings = config.settings()?;
    let reader = RfidController::new(&config).context("Creating RfidController")?;
    let input = StdinLines::spawn()?;

    let session = WriterSession::new(
        reader,
        key,
        input,
        ConsoleReporter::stdout(),
        SystemClock,
        settings,
    );
    session.run();
    Ok(())
}

fn main() {
    if let Err(err) = run_application() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
