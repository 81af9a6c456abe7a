use std::time::Duration;

use reqwest::{blocking::Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::{model::CityData, timestamp::Timestamp};

pub mod luzern;
pub mod parkendd;
pub mod stgallen;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &'static str = concat!("pls-monitor/", env!("CARGO_PKG_VERSION"));

/// Upstream body, decoded as JSON but not yet interpreted.
pub type RawResponse = serde_json::Value;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {1} failed: {0}")]
    Request(#[source] reqwest::Error, String),

    #[error("{1} answered with status {0}")]
    Status(StatusCode, String),

    #[error("invalid JSON body from {1}: {0}")]
    Decode(#[source] reqwest::Error, String),
}

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("unexpected payload: {0}")]
    Schema(#[source] serde_json::Error),

    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("upstream reported status {0:?}")]
    UpstreamStatus(String),

    #[error("invalid timestamp {1:?} for {0}")]
    Timestamp(String, String),
}

/// A city-specific view of one upstream parking API.
pub trait Adapter {
    /// Registered kind this adapter was built from.
    fn kind(&self) -> &'static str;

    fn fetch(&self) -> Result<RawResponse, FetchError>;

    /// Maps a raw payload to [`CityData`]. Facilities without a timestamp of
    /// their own are stamped with `polled_at`.
    fn normalize(
        &self,
        raw: &RawResponse,
        polled_at: Timestamp,
    ) -> Result<CityData, NormalizeError>;
}

/// Everything an adapter needs to be built for one city.
pub struct Settings {
    pub city: String,

    pub endpoint: String,

    pub client: Client,
}

pub struct Registration {
    name: &'static str,

    default_endpoint: &'static str,

    builder: fn(Settings) -> Box<dyn Adapter>,
}

impl Registration {
    pub const fn new(
        name: &'static str,
        default_endpoint: &'static str,
        builder: fn(Settings) -> Box<dyn Adapter>,
    ) -> Self {
        Self {
            name,
            default_endpoint,
            builder,
        }
    }

    pub fn find(name: &str) -> Option<&'static Registration> {
        inventory::iter::<Registration>().find(|r| r.name == name)
    }

    pub fn names() -> Vec<&'static str> {
        let mut names: Vec<_> = inventory::iter::<Registration>().map(|r| r.name).collect();
        names.sort_unstable();
        names
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Builds the adapter, falling back to the registered endpoint when the
    /// city configuration does not name one.
    pub fn build(
        &self,
        city: &str,
        endpoint: Option<&str>,
        client: &Client,
    ) -> Box<dyn Adapter> {
        let builder = self.builder;

        builder(Settings {
            city: city.to_string(),
            endpoint: endpoint.unwrap_or(self.default_endpoint).to_string(),
            client: client.clone(),
        })
    }
}

inventory::collect!(Registration);

pub fn client() -> reqwest::Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
}

/// Issues a single GET and decodes the body as JSON. No retries.
pub fn get_json(client: &Client, url: &str) -> Result<RawResponse, FetchError> {
    debug!(url, "fetching");

    let response = client
        .get(url)
        .send()
        .map_err(|e| FetchError::Request(e, url.to_string()))?;

    if !response.status().is_success() {
        return Err(FetchError::Status(response.status(), url.to_string()));
    }

    response
        .json::<RawResponse>()
        .map_err(|e| FetchError::Decode(e, url.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(raw: &RawResponse) -> Result<T, NormalizeError> {
    T::deserialize(raw).map_err(NormalizeError::Schema)
}

/// Lowercase, dash-separated identifier derived from a display name.
pub(crate) fn slug(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
