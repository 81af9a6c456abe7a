use std::collections::BTreeMap;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::{
    adapter::{
        decode, get_json, Adapter, FetchError, NormalizeError, RawResponse, Registration, Settings,
    },
    model::{CityData, FacilityStatus, ParkingFacility},
    timestamp::{self, Timestamp},
};

const LUZERN_URL: &'static str = "https://www.pls-luzern.ch/api/v1/parkings";

fn opened_by_default() -> bool {
    true
}

#[derive(Deserialize, Debug)]
struct LuzernParking {
    id: Option<String>,

    description: Option<String>,

    vacancy: u64,

    capacity: u64,

    #[serde(default = "opened_by_default")]
    opened: bool,

    #[serde(default)]
    maintenance: bool,

    datestamp: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum LuzernParkings {
    ById(BTreeMap<String, LuzernParking>),

    List(Vec<LuzernParking>),
}

#[derive(Deserialize, Debug)]
struct LuzernData {
    parkings: LuzernParkings,
}

#[derive(Deserialize, Debug)]
struct LuzernResponse {
    status: String,

    data: Option<LuzernData>,
}

impl LuzernParking {
    fn status(&self) -> FacilityStatus {
        if self.opened && !self.maintenance {
            FacilityStatus::Open
        } else {
            FacilityStatus::Closed
        }
    }

    fn into_facility(
        self,
        id: String,
        polled_at: Timestamp,
    ) -> Result<ParkingFacility, NormalizeError> {
        let timestamp = match &self.datestamp {
            Some(s) => timestamp::parse_local(s)
                .ok_or_else(|| NormalizeError::Timestamp(id.clone(), s.clone()))?,
            None => polled_at,
        };

        Ok(ParkingFacility {
            status: self.status(),
            name: self.description.unwrap_or_else(|| id.clone()),
            free: self.vacancy,
            total: self.capacity,
            timestamp,
            id,
        })
    }
}

struct Luzern {
    city: String,

    url: String,

    client: Client,
}

impl Adapter for Luzern {
    fn kind(&self) -> &'static str {
        "luzern"
    }

    fn fetch(&self) -> Result<RawResponse, FetchError> {
        get_json(&self.client, &self.url)
    }

    fn normalize(
        &self,
        raw: &RawResponse,
        polled_at: Timestamp,
    ) -> Result<CityData, NormalizeError> {
        let response: LuzernResponse = decode(raw)?;

        if response.status != "success" {
            return Err(NormalizeError::UpstreamStatus(response.status));
        }

        let data = response.data.ok_or(NormalizeError::MissingField("data"))?;
        let mut city = CityData::new(&self.city);

        match data.parkings {
            LuzernParkings::ById(parkings) => {
                for (id, parking) in parkings {
                    city.add(parking.into_facility(id, polled_at)?);
                }
            }
            LuzernParkings::List(parkings) => {
                for mut parking in parkings {
                    let id = parking.id.take().ok_or(NormalizeError::MissingField("id"))?;
                    city.add(parking.into_facility(id, polled_at)?);
                }
            }
        }

        Ok(city)
    }
}

fn build(settings: Settings) -> Box<dyn Adapter> {
    Box::new(Luzern {
        city: settings.city,
        url: settings.endpoint,
        client: settings.client,
    })
}

inventory::submit! {
    Registration::new("luzern", LUZERN_URL, build)
}
