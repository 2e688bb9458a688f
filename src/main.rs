use std::sync::Arc;

use anyhow::{Error, Result};
use clap::Parser;
use log::{error, info};

mod cache;
mod cli;
mod config;
mod daemon;
mod flap;
mod listener;
mod notify;
mod retriever;
mod scheduler;
mod sid;
mod store;
mod wire;

use cli::Opts;
use config::Config;
use daemon::Daemon;
use listener::Listener;
use scheduler::Scheduler;

fn main() -> Result<(), Error> {
    let opts = Opts::parse();

    if opts.version {
        println!("linkflapd {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = config::load(&opts.config)?;
    init_logger(&config, opts.verbose)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(config))
}

/// Builds the `env_logger` filter from `config.log_level`, exiting fatally
/// (via the `?` propagated out of `main`) on an unrecognized level — spec's
/// exit-code contract lists "unknown log level" alongside a bad
/// `LISTEN_PORT` as startup-fatal. `RUST_LOG`, when set, takes precedence
/// over the config value, matching `env_logger`'s usual convention; `-v`
/// raises the default to debug when `RUST_LOG` isn't set.
fn init_logger(config: &Config, verbose: bool) -> Result<()> {
    let configured_level = config.log_level_filter()?;

    let mut builder = env_logger::Builder::new();
    match std::env::var("RUST_LOG") {
        Ok(spec) => {
            builder.parse_filters(&spec);
        }
        Err(_) => {
            builder.filter_level(if verbose { log::LevelFilter::Debug } else { configured_level });
        }
    }
    builder.init();

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    info!("snmpflapd started");

    let daemon = Arc::new(Daemon::new(config).await?);

    tokio::spawn(Scheduler::new(daemon.clone()).run());

    let mail_queue = daemon.mail_queue.clone();
    tokio::spawn(async move { mail_queue.run().await });

    info!("starting trap listener");
    Listener::new(daemon).run().await?;

    error!("trap listener exited, shutting down");
    Ok(())
}
