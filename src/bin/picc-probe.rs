use anyhow::Result;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use cardwriter::components::rfid::{CardReader, RfidController};
use cardwriter::config::Config;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let config = Config::from_env()?;
    let mut mf = RfidController::new(&config)?;
    loop {
        if mf.is_new_tag_present()? {
            match mf.read_tag_serial() {
                Ok(uid) => {
                    info!("PICC {}", uid);
                    if let Err(err) = mf.halt_tag() {
                        warn!("{:#}", err);
                    }
                }
                Err(err) => warn!("{:#}", err),
            }
        }
        thread::sleep(Duration::from_millis(200));
    }
}
