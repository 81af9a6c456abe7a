use std::path::PathBuf;

use clap::Parser;

/// Monitor parking availability of Swiss cities with a PLS (Parkleitsystem).
#[derive(Parser, Debug)]
#[clap(name = "pls-monitor", version)]
pub struct Opts {
    /// Run a single collection tick and exit
    #[clap(long, action)]
    pub once: bool,

    /// Collect data for this city only (repeatable), e.g. luzern
    #[clap(long = "city", value_parser)]
    pub cities: Vec<String>,

    /// Seconds between two ticks when running continuously
    #[clap(long, value_parser = clap::value_parser!(u64).range(1..), default_value_t = 900)]
    pub interval: u64,

    /// Base directory for collected data
    #[clap(long, value_parser, default_value = "data")]
    pub data_dir: PathBuf,

    /// City configuration document
    #[clap(long, value_parser, default_value = "config/cities.json")]
    pub config: PathBuf,
}

impl Opts {
    pub fn city_filter(&self) -> Option<&[String]> {
        if self.cities.is_empty() {
            None
        } else {
            Some(self.cities.as_slice())
        }
    }
}
