use std::{sync::mpsc, time::Duration};

use clap::Parser;
use main_error::MainResult;
use tracing::{field, info};

mod adapter;
mod collector;
mod config;
mod model;
mod options;
mod storage;
mod timestamp;

fn main() -> MainResult {
    tracing_subscriber::fmt::init();

    let opts = options::Opts::parse();
    let config = config::read(&opts.config)?;
    let client = adapter::client().map_err(config::Error::HttpClient)?;
    let adapters = config::enabled_adapters(&config, &client)?;

    let storage = storage::Storage::new(&opts.data_dir);
    info!(
        data_dir = field::display(storage.root().display()),
        cities = adapters.len(),
        "starting parking monitor"
    );

    let collector = collector::Collector::new(adapters, storage);
    let cities = opts.city_filter();

    if opts.once {
        collector.run_once(cities)?;
    } else {
        collector.select(cities)?;

        // kept alive for the whole process: the loop only ends with it
        let (_stop, stop_rx) = mpsc::channel();
        collector.run_loop(cities, Duration::from_secs(opts.interval), &stop_rx);
    }

    Ok(())
}
