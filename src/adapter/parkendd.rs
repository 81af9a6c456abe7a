//! ParkenDD aggregator, serving both Basel and Zürich with one schema.

use std::collections::BTreeMap;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::{
    adapter::{
        decode, get_json, slug, Adapter, FetchError, NormalizeError, RawResponse, Registration,
        Settings,
    },
    model::{CityData, FacilityStatus, ParkingFacility},
    timestamp::{self, Timestamp},
};

const BASEL_URL: &'static str = "https://api.parkendd.de/Basel";
const ZURICH_URL: &'static str = "https://api.parkendd.de/Zuerich";

#[derive(Deserialize, Debug)]
struct Lot {
    id: Option<String>,

    name: Option<String>,

    free: u64,

    total: u64,

    state: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum Lots {
    List(Vec<Lot>),

    ByName(BTreeMap<String, Lot>),
}

#[derive(Deserialize, Debug)]
struct ParkenDdResponse {
    last_updated: Option<String>,

    lots: Lots,
}

fn status(state: Option<&str>) -> FacilityStatus {
    match state {
        Some("open") => FacilityStatus::Open,
        Some("closed") => FacilityStatus::Closed,
        _ => FacilityStatus::Unknown,
    }
}

impl Lot {
    fn into_facility(self, timestamp: Timestamp) -> Result<ParkingFacility, NormalizeError> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.name.as_deref().map(slug).filter(|s| !s.is_empty()))
            .ok_or(NormalizeError::MissingField("name"))?;

        Ok(ParkingFacility {
            status: status(self.state.as_deref()),
            name: self.name.unwrap_or_else(|| id.clone()),
            free: self.free,
            total: self.total,
            timestamp,
            id,
        })
    }
}

struct ParkenDd {
    kind: &'static str,

    city: String,

    url: String,

    client: Client,
}

impl Adapter for ParkenDd {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn fetch(&self) -> Result<RawResponse, FetchError> {
        get_json(&self.client, &self.url)
    }

    fn normalize(
        &self,
        raw: &RawResponse,
        polled_at: Timestamp,
    ) -> Result<CityData, NormalizeError> {
        let response: ParkenDdResponse = decode(raw)?;

        // last_updated is naive UTC
        let timestamp = match &response.last_updated {
            Some(s) => timestamp::parse_utc(s)
                .ok_or_else(|| NormalizeError::Timestamp(self.city.clone(), s.clone()))?,
            None => polled_at,
        };

        let lots = match response.lots {
            Lots::List(lots) => lots,
            Lots::ByName(lots) => lots
                .into_iter()
                .map(|(name, mut lot)| {
                    lot.name.get_or_insert(name);
                    lot
                })
                .collect(),
        };

        let mut city = CityData::new(&self.city);

        for lot in lots {
            city.add(lot.into_facility(timestamp)?);
        }

        Ok(city)
    }
}

fn build_basel(settings: Settings) -> Box<dyn Adapter> {
    build("basel", settings)
}

fn build_zurich(settings: Settings) -> Box<dyn Adapter> {
    build("zurich", settings)
}

fn build(kind: &'static str, settings: Settings) -> Box<dyn Adapter> {
    Box::new(ParkenDd {
        kind,
        city: settings.city,
        url: settings.endpoint,
        client: settings.client,
    })
}

inventory::submit! {
    Registration::new("basel", BASEL_URL, build_basel)
}

inventory::submit! {
    Registration::new("zurich", ZURICH_URL, build_zurich)
}
