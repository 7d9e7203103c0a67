use std::path::PathBuf;
use std::process;

use log::{error, info};
use structopt::StructOpt;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

mod aggregator;
mod config;
mod constants;
mod downstream;
mod logger;
mod run;

#[derive(Debug, StructOpt)]
struct Opts {
    /// Path to the `key=value` configuration file
    config_path: PathBuf,
}

fn main() {
    let opts = Opts::from_args();

    let settings = match config::Settings::load(&opts.config_path) {
        Ok(settings) => settings,
        Err(e) => {
            // Logging isn't set up yet; the config is what tells us the
            // level, so a bad config is reported to stderr directly.
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    logger::init(config::level_filter(settings.log_level));
    info!("starting up, forwarding to {}", settings.downstream);

    if let Err(e) = run::run(settings) {
        error!("{}", e);
        process::exit(1);
    }

    info!("shut down cleanly");
}
