use std::{
    collections::{HashMap, HashSet},
    fmt,
    path::Path,
};

use reqwest::blocking::Client;
use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer,
};
use thiserror::Error;
use tracing::info;

use crate::{
    adapter::{Adapter, Registration},
    collector::Component,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("error reading file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("invalid JSON format: {0}")]
    Json(#[source] serde_json::Error),

    #[error("city {0} is configured more than once")]
    DuplicateCity(String),

    #[error("cities {1} and {2} both use adapter {0}")]
    DuplicateAdapter(String, String, String),

    #[error("unknown adapter {1} for city {0} (known adapters: {2})")]
    UnknownAdapter(String, String, String),

    #[error("failed to create HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Deserialize, Debug)]
struct CityConfigRaw {
    #[serde(default = "enabled_by_default")]
    enabled: bool,

    name: Option<String>,

    #[serde(alias = "api_endpoint")]
    api_url: Option<String>,

    #[serde(alias = "collector", alias = "adapter_kind")]
    adapter: String,
}

/// City entries in document order, duplicates kept for validation.
#[derive(Debug)]
struct CityEntries(Vec<(String, CityConfigRaw)>);

impl<'de> Deserialize<'de> for CityEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = CityEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of city id to city configuration")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));

                while let Some(entry) = map.next_entry()? {
                    entries.push(entry);
                }

                Ok(CityEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[derive(Deserialize, Debug)]
struct ConfigRaw {
    cities: CityEntries,
}

impl ConfigRaw {
    fn to_config(self) -> Result<Config, Error> {
        let mut ids = HashSet::new();
        let mut kinds: HashMap<String, String> = HashMap::new();
        let mut cities = Vec::with_capacity(self.cities.0.len());

        for (city_id, raw) in self.cities.0 {
            if !ids.insert(city_id.clone()) {
                return Err(Error::DuplicateCity(city_id));
            }

            let adapter_kind = Self::adapter_kind(&raw.adapter);

            if let Some(other) = kinds.insert(adapter_kind.clone(), city_id.clone()) {
                return Err(Error::DuplicateAdapter(adapter_kind, other, city_id));
            }

            cities.push(CityConfig {
                display_name: raw.name.unwrap_or_else(|| city_id.clone()),
                city_id,
                enabled: raw.enabled,
                api_endpoint: raw.api_url,
                adapter_kind,
            });
        }

        Ok(Config { cities })
    }

    /// Accepts both `luzern` and the legacy `luzern.LuzernCollector` form.
    fn adapter_kind(s: &str) -> String {
        s.split('.').next().unwrap_or(s).trim().to_lowercase()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CityConfig {
    pub city_id: String,

    pub enabled: bool,

    pub display_name: String,

    pub api_endpoint: Option<String>,

    pub adapter_kind: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub cities: Vec<CityConfig>,
}

pub fn parse(content: &str) -> Result<Config, Error> {
    let config_raw: ConfigRaw = serde_json::from_str(content).map_err(Error::Json)?;
    config_raw.to_config()
}

pub fn read(file: impl AsRef<Path>) -> Result<Config, Error> {
    let content = std::fs::read_to_string(file).map_err(Error::ReadFile)?;
    parse(&content)
}

/// Builds one adapter per enabled city, in configuration order.
pub fn enabled_adapters(
    config: &Config,
    client: &Client,
) -> Result<Vec<Component<dyn Adapter>>, Error> {
    config
        .cities
        .iter()
        .filter(|city| city.enabled)
        .map(|city| {
            let registration = Registration::find(&city.adapter_kind).ok_or_else(|| {
                Error::UnknownAdapter(
                    city.city_id.clone(),
                    city.adapter_kind.clone(),
                    Registration::names().join(", "),
                )
            })?;

            info!(
                city = city.city_id.as_str(),
                adapter = registration.name(),
                "adapter enabled"
            );

            Ok(Component {
                name: city.city_id.clone(),
                display_name: city.display_name.clone(),
                component: registration.build(
                    &city.city_id,
                    city.api_endpoint.as_deref(),
                    client,
                ),
            })
        })
        .collect()
}
