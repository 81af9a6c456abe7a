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

const STGALLEN_URL: &'static str = concat!(
    "https://daten.stadt.sg.ch/api/records/1.0/search/",
    "?dataset=freie-parkplatze-in-der-stadt-stgallen-pls&rows=100"
);

#[derive(Deserialize, Debug)]
struct Fields {
    phid: Option<String>,

    phname: Option<String>,

    phstate: Option<String>,

    #[serde(alias = "frei")]
    shortfree: u64,

    #[serde(alias = "total")]
    shortmax: u64,

    #[serde(alias = "stand_time")]
    zeitpunkt: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Record {
    recordid: Option<String>,

    fields: Fields,
}

#[derive(Deserialize, Debug)]
struct StGallenResponse {
    records: Vec<Record>,
}

fn status(state: Option<&str>) -> FacilityStatus {
    match state.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("offen") => FacilityStatus::Open,
        Some("geschlossen") => FacilityStatus::Closed,
        _ => FacilityStatus::Unknown,
    }
}

impl Record {
    fn id(&self, position: usize) -> String {
        let fields = &self.fields;

        fields
            .phid
            .clone()
            .or_else(|| fields.phname.as_deref().map(slug).filter(|s| !s.is_empty()))
            .or_else(|| self.recordid.clone())
            .unwrap_or_else(|| format!("record-{position}"))
    }

    fn into_facility(
        self,
        position: usize,
        polled_at: Timestamp,
    ) -> Result<ParkingFacility, NormalizeError> {
        let id = self.id(position);
        let fields = self.fields;

        let timestamp = match &fields.zeitpunkt {
            Some(s) => timestamp::parse_local(s)
                .ok_or_else(|| NormalizeError::Timestamp(id.clone(), s.clone()))?,
            None => polled_at,
        };

        Ok(ParkingFacility {
            status: status(fields.phstate.as_deref()),
            name: fields.phname.unwrap_or_else(|| id.clone()),
            free: fields.shortfree,
            total: fields.shortmax,
            timestamp,
            id,
        })
    }
}

struct StGallen {
    city: String,

    url: String,

    client: Client,
}

impl Adapter for StGallen {
    fn kind(&self) -> &'static str {
        "stgallen"
    }

    fn fetch(&self) -> Result<RawResponse, FetchError> {
        get_json(&self.client, &self.url)
    }

    fn normalize(
        &self,
        raw: &RawResponse,
        polled_at: Timestamp,
    ) -> Result<CityData, NormalizeError> {
        let response: StGallenResponse = decode(raw)?;
        let mut city = CityData::new(&self.city);

        for (position, record) in response.records.into_iter().enumerate() {
            city.add(record.into_facility(position, polled_at)?);
        }

        Ok(city)
    }
}

fn build(settings: Settings) -> Box<dyn Adapter> {
    Box::new(StGallen {
        city: settings.city,
        url: settings.endpoint,
        client: settings.client,
    })
}

inventory::submit! {
    Registration::new("stgallen", STGALLEN_URL, build)
}
