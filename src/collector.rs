use std::{
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::Duration,
};

use thiserror::Error;
use tracing::{error, field, info, warn};

use crate::{
    adapter::{Adapter, FetchError, NormalizeError},
    model::{CityData, CollectionEnvelope, EnvelopeStatus},
    storage::Storage,
    timestamp::{self, Timestamp},
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown city {0}")]
    UnknownCity(String),
}

#[derive(Error, Debug)]
enum CollectError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("normalization failed: {0}")]
    Normalize(#[from] NormalizeError),
}

pub struct Component<T: ?Sized> {
    pub name: String,

    pub display_name: String,

    pub component: Box<T>,
}

/// What one tick did for one city.
#[derive(Debug)]
pub struct Outcome {
    pub city: String,

    pub status: EnvelopeStatus,

    /// `None` when the envelope could not be written.
    pub path: Option<PathBuf>,
}

fn fetch_and_normalize(
    adapter: &dyn Adapter,
    polled_at: Timestamp,
) -> Result<CityData, CollectError> {
    let raw = adapter.fetch()?;
    Ok(adapter.normalize(&raw, polled_at)?)
}

/// Polls one city. Never fails: errors end up in the envelope.
pub fn collect_one(city: &str, adapter: &dyn Adapter) -> CollectionEnvelope {
    let polled_at = timestamp::now();

    info!(city, "fetching data");

    match fetch_and_normalize(adapter, polled_at) {
        Ok(data) => {
            info!(city, parkings = data.len(), "collected");
            CollectionEnvelope::success(city, data, polled_at)
        }
        Err(e) => {
            warn!(city, error = field::display(&e), "collection failed");
            CollectionEnvelope::error(city, e.to_string(), polled_at)
        }
    }
}

pub fn collect_all(adapters: &[Component<dyn Adapter>]) -> Vec<CollectionEnvelope> {
    adapters
        .iter()
        .map(|adapter| collect_one(&adapter.name, adapter.component.as_ref()))
        .collect()
}

pub struct Collector {
    adapters: Vec<Component<dyn Adapter>>,

    storage: Storage,
}

impl Collector {
    pub fn new(adapters: Vec<Component<dyn Adapter>>, storage: Storage) -> Self {
        Self { adapters, storage }
    }

    /// Adapters for the requested cities in registry order, or all of them.
    pub fn select(
        &self,
        cities: Option<&[String]>,
    ) -> Result<Vec<&Component<dyn Adapter>>, Error> {
        let cities = match cities {
            Some(cities) => cities,
            None => return Ok(self.adapters.iter().collect()),
        };

        if let Some(unknown) = cities
            .iter()
            .find(|city| !self.adapters.iter().any(|a| &a.name == *city))
        {
            return Err(Error::UnknownCity(unknown.clone()));
        }

        Ok(self
            .adapters
            .iter()
            .filter(|a| cities.contains(&a.name))
            .collect())
    }

    /// One tick: collect the selected cities and persist every envelope.
    pub fn run_once(&self, cities: Option<&[String]>) -> Result<Vec<Outcome>, Error> {
        let selected = self.select(cities)?;
        let mut outcomes = Vec::with_capacity(selected.len());

        for adapter in selected {
            info!(
                city = adapter.name.as_str(),
                name = adapter.display_name.as_str(),
                "collecting"
            );

            let envelope = collect_one(&adapter.name, adapter.component.as_ref());

            let path = match self.storage.persist(&envelope) {
                Ok(path) => {
                    info!(
                        city = adapter.name.as_str(),
                        path = field::display(path.display()),
                        "data saved"
                    );
                    Some(path)
                }
                Err(e) => {
                    error!(
                        city = adapter.name.as_str(),
                        error = field::display(&e),
                        "error saving data"
                    );
                    None
                }
            };

            outcomes.push(Outcome {
                city: envelope.city,
                status: envelope.status,
                path,
            });
        }

        summarize(&outcomes);

        Ok(outcomes)
    }

    /// Runs ticks until `stop` receives a message or its sender is dropped.
    /// A failing or panicking tick is logged and the next one runs as planned.
    pub fn run_loop(&self, cities: Option<&[String]>, interval: Duration, stop: &Receiver<()>) {
        info!(seconds = interval.as_secs(), "running continuously");

        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| self.run_once(cities))) {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(error = field::display(&e), "tick failed"),
                Err(_) => error!("tick panicked, continuing with next tick"),
            }

            info!(seconds = interval.as_secs(), "sleeping until next tick");

            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("stopped");
    }
}

fn summarize(outcomes: &[Outcome]) {
    for outcome in outcomes {
        let saved = outcome.path.is_some();

        match (outcome.status, saved) {
            (EnvelopeStatus::Success, true) => info!(city = outcome.city.as_str(), "success"),
            (EnvelopeStatus::Error, true) => warn!(city = outcome.city.as_str(), "failed"),
            (_, false) => error!(city = outcome.city.as_str(), "not saved"),
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        cell::Cell,
        collections::BTreeMap,
        sync::mpsc::{self, Sender},
    };

    use reqwest::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::{
        adapter::RawResponse,
        model::{FacilityStatus, ParkingFacility},
    };

    /// Serves a canned payload of `{"free": n, "total": m}`.
    struct Fixed(&'static str);

    impl Adapter for Fixed {
        fn kind(&self) -> &'static str {
            "fixed"
        }

        fn fetch(&self) -> Result<RawResponse, FetchError> {
            Ok(json!({"free": 7, "total": 10}))
        }

        fn normalize(
            &self,
            raw: &RawResponse,
            polled_at: Timestamp,
        ) -> Result<CityData, NormalizeError> {
            let free = raw["free"].as_u64().ok_or(NormalizeError::MissingField("free"))?;
            let total = raw["total"].as_u64().ok_or(NormalizeError::MissingField("total"))?;

            let mut data = CityData::new(self.0);
            data.add(ParkingFacility {
                id: "P1".to_string(),
                name: "Parkhaus".to_string(),
                free,
                total,
                status: FacilityStatus::Open,
                timestamp: polled_at,
            });

            Ok(data)
        }
    }

    struct Unreachable;

    impl Adapter for Unreachable {
        fn kind(&self) -> &'static str {
            "unreachable"
        }

        fn fetch(&self) -> Result<RawResponse, FetchError> {
            Err(FetchError::Status(
                StatusCode::SERVICE_UNAVAILABLE,
                "http://localhost/parking".to_string(),
            ))
        }

        fn normalize(&self, _: &RawResponse, _: Timestamp) -> Result<CityData, NormalizeError> {
            unreachable!("normalize must not run after a failed fetch")
        }
    }

    struct Garbled;

    impl Adapter for Garbled {
        fn kind(&self) -> &'static str {
            "garbled"
        }

        fn fetch(&self) -> Result<RawResponse, FetchError> {
            Ok(json!({"unexpected": true}))
        }

        fn normalize(&self, _: &RawResponse, _: Timestamp) -> Result<CityData, NormalizeError> {
            Err(NormalizeError::MissingField("lots"))
        }
    }

    /// Panics on its first fetch, then stops the loop on its second.
    struct PanicsOnce {
        calls: Cell<u32>,

        stop: Sender<()>,
    }

    impl Adapter for PanicsOnce {
        fn kind(&self) -> &'static str {
            "panics-once"
        }

        fn fetch(&self) -> Result<RawResponse, FetchError> {
            let calls = self.calls.get() + 1;
            self.calls.set(calls);

            if calls == 1 {
                panic!("upstream parser exploded");
            }

            self.stop.send(()).unwrap();
            Ok(json!({"free": 1, "total": 2}))
        }

        fn normalize(
            &self,
            raw: &RawResponse,
            polled_at: Timestamp,
        ) -> Result<CityData, NormalizeError> {
            Fixed("flaky").normalize(raw, polled_at)
        }
    }

    fn component(name: &str, adapter: impl Adapter + 'static) -> Component<dyn Adapter> {
        Component {
            name: name.to_string(),
            display_name: name.to_uppercase(),
            component: Box::new(adapter),
        }
    }

    fn cities() -> Vec<Component<dyn Adapter>> {
        vec![
            component("luzern", Fixed("luzern")),
            component("basel", Unreachable),
            component("stgallen", Fixed("stgallen")),
            component("zurich", Fixed("zurich")),
        ]
    }

    fn files(root: &std::path::Path) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();

        for city in std::fs::read_dir(root).unwrap() {
            let city = city.unwrap();
            let mut count = 0;

            for day in std::fs::read_dir(city.path()).unwrap() {
                count += std::fs::read_dir(day.unwrap().path()).unwrap().count();
            }

            counts.insert(city.file_name().to_string_lossy().to_string(), count);
        }

        counts
    }

    #[test]
    fn test_collect_one_fetch_failure() {
        let envelope = collect_one("basel", &Unreachable);

        assert_eq!(envelope.status, EnvelopeStatus::Error);
        assert_eq!(envelope.city, "basel");
        assert!(envelope.data.is_none());
        assert!(!envelope.error.unwrap().is_empty());
    }

    #[test]
    fn test_collect_one_normalize_failure() {
        let envelope = collect_one("zurich", &Garbled);

        assert_eq!(envelope.status, EnvelopeStatus::Error);
        assert!(envelope.data.is_none());
        assert_eq!(
            envelope.error.as_deref(),
            Some("normalization failed: missing field lots")
        );
    }

    #[test]
    fn test_collect_one_success_uses_poll_time() {
        let envelope = collect_one("luzern", &Fixed("luzern"));
        let data = envelope.data.as_ref().unwrap();

        assert!(envelope.is_success());
        assert!(envelope.error.is_none());
        assert_eq!(data.parkings["P1"].timestamp, envelope.timestamp);
        assert_eq!((data.parkings["P1"].free, data.parkings["P1"].total), (7, 10));
    }

    #[test]
    fn test_collect_all_isolates_failures() {
        let envelopes = collect_all(&cities());

        assert_eq!(envelopes.len(), 4);
        assert_eq!(
            envelopes.iter().map(|e| e.city.as_str()).collect::<Vec<_>>(),
            vec!["luzern", "basel", "stgallen", "zurich"]
        );
        assert_eq!(
            envelopes
                .iter()
                .filter(|e| e.status == EnvelopeStatus::Error)
                .map(|e| e.city.as_str())
                .collect::<Vec<_>>(),
            vec!["basel"]
        );
        assert_eq!(envelopes.iter().filter(|e| e.is_success()).count(), 3);
    }

    #[test]
    fn test_run_once_persists_every_city() {
        let tmp = tempfile::tempdir().unwrap();
        let collector = Collector::new(cities(), Storage::new(tmp.path()));

        let outcomes = collector.run_once(None).unwrap();

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(|o| o.path.is_some()));

        let basel = outcomes.iter().find(|o| o.city == "basel").unwrap();
        assert_eq!(basel.status, EnvelopeStatus::Error);

        let written: CollectionEnvelope = serde_json::from_str(
            &std::fs::read_to_string(basel.path.as_ref().unwrap()).unwrap(),
        )
        .unwrap();
        assert_eq!(written.status, EnvelopeStatus::Error);
        assert!(written.data.is_none());

        assert_eq!(
            files(tmp.path()),
            BTreeMap::from([
                ("basel".to_string(), 1),
                ("luzern".to_string(), 1),
                ("stgallen".to_string(), 1),
                ("zurich".to_string(), 1),
            ])
        );
    }

    #[test]
    fn test_run_once_filter() {
        let tmp = tempfile::tempdir().unwrap();
        let collector = Collector::new(cities(), Storage::new(tmp.path()));

        let filter = vec!["zurich".to_string(), "luzern".to_string()];
        let outcomes = collector.run_once(Some(&filter)).unwrap();

        assert_eq!(
            outcomes.iter().map(|o| o.city.as_str()).collect::<Vec<_>>(),
            vec!["luzern", "zurich"]
        );
        assert_eq!(files(tmp.path()).len(), 2);
    }

    #[test]
    fn test_run_once_unknown_city_writes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let collector = Collector::new(cities(), Storage::new(tmp.path()));

        let filter = vec!["luzern".to_string(), "nope".to_string()];

        assert!(matches!(
            collector.run_once(Some(&filter)),
            Err(Error::UnknownCity(city)) if city == "nope"
        ));
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_run_once_write_failure_is_per_city() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("basel"), "not a directory").unwrap();

        let collector = Collector::new(cities(), Storage::new(tmp.path()));
        let outcomes = collector.run_once(None).unwrap();

        let saved: Vec<_> = outcomes
            .iter()
            .filter(|o| o.path.is_some())
            .map(|o| o.city.as_str())
            .collect();

        assert_eq!(saved, vec!["luzern", "stgallen", "zurich"]);
    }

    #[test]
    fn test_run_loop_survives_panicking_tick() {
        let tmp = tempfile::tempdir().unwrap();
        let (stop_tx, stop_rx) = mpsc::channel();

        let adapters = vec![component(
            "flaky",
            PanicsOnce {
                calls: Cell::new(0),
                stop: stop_tx,
            },
        )];
        let collector = Collector::new(adapters, Storage::new(tmp.path()));

        collector.run_loop(None, Duration::from_millis(1), &stop_rx);

        assert_eq!(files(tmp.path()), BTreeMap::from([("flaky".to_string(), 1)]));
    }

    #[test]
    fn test_run_loop_stops_when_sender_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        drop(stop_tx);

        let collector = Collector::new(
            vec![component("luzern", Fixed("luzern"))],
            Storage::new(tmp.path()),
        );

        collector.run_loop(None, Duration::from_secs(3600), &stop_rx);

        assert_eq!(files(tmp.path()), BTreeMap::from([("luzern".to_string(), 1)]));
    }
}
