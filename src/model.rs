use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::timestamp::{self, Timestamp};

#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum FacilityStatus {
    Open,

    Closed,

    Unknown,
}

/// One parking facility as reported by its city. `free <= total` is expected
/// but not enforced: upstream figures are stored as reported.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct ParkingFacility {
    pub id: String,

    pub name: String,

    pub free: u64,

    pub total: u64,

    pub status: FacilityStatus,

    #[serde(with = "timestamp::format")]
    pub timestamp: Timestamp,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct CityData {
    pub city: String,

    pub parkings: BTreeMap<String, ParkingFacility>,
}

impl CityData {
    pub fn new(city: impl Into<String>) -> Self {
        Self {
            city: city.into(),

            parkings: BTreeMap::new(),
        }
    }

    /// Adds a facility keyed by its id. A later facility with the same id
    /// replaces the earlier one.
    pub fn add(&mut self, facility: ParkingFacility) {
        let id = facility.id.clone();

        if let Some(replaced) = self.parkings.insert(id.clone(), facility) {
            warn!(
                city = self.city.as_str(),
                id = id.as_str(),
                replaced = replaced.name.as_str(),
                "duplicate parking id, keeping the later facility"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.parkings.len()
    }
}

#[derive(Serialize, Deserialize, Copy, Clone, PartialEq, Eq, Debug)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,

    Error,
}

/// Outcome of one poll attempt for one city, persisted as-is.
#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct CollectionEnvelope {
    pub status: EnvelopeStatus,

    pub city: String,

    pub data: Option<CityData>,

    pub error: Option<String>,

    #[serde(with = "timestamp::format")]
    pub timestamp: Timestamp,
}

impl CollectionEnvelope {
    pub fn success(city: impl Into<String>, data: CityData, timestamp: Timestamp) -> Self {
        Self {
            status: EnvelopeStatus::Success,
            city: city.into(),
            data: Some(data),
            error: None,
            timestamp,
        }
    }

    pub fn error(city: impl Into<String>, error: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            status: EnvelopeStatus::Error,
            city: city.into(),
            data: None,
            error: Some(error.into()),
            timestamp,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == EnvelopeStatus::Success
    }
}
