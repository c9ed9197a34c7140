//! Weather station store: read-only reference entities.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::PotSyncResult;
use crate::record::{Filter, PublicId};
use crate::relay::RelayClient;
use crate::store::bounded_query;
use crate::types::{WeatherReading, WeatherStation, KIND_WEATHER_READING, KIND_WEATHER_STATION};
use crate::validate;

/// Cap on the station directory listing.
const STATION_LIMIT: usize = 50;

/// Read access to weather stations and their telemetry.
pub struct WeatherStore<R> {
    relay: Arc<R>,
}

impl<R: RelayClient> WeatherStore<R> {
    /// Create a store over a relay.
    pub fn new(relay: Arc<R>) -> Self {
        Self { relay }
    }

    /// Known weather stations, newest first.
    pub async fn stations(&self, cancel: &CancellationToken) -> PotSyncResult<Vec<WeatherStation>> {
        let filters = vec![Filter::kinds(&[KIND_WEATHER_STATION]).limit(STATION_LIMIT)];
        let records = bounded_query(self.relay.as_ref(), filters, cancel).await?;
        Ok(records
            .into_iter()
            .filter(|r| {
                let ok = validate::weather_station(r);
                if !ok {
                    debug!(id = %r.id, "Dropping invalid station record");
                }
                ok
            })
            .filter_map(WeatherStation::from_record)
            .collect())
    }

    /// Latest reading from one station, if it has published any.
    pub async fn latest_reading(
        &self,
        station: &PublicId,
        cancel: &CancellationToken,
    ) -> PotSyncResult<Option<WeatherReading>> {
        let filters = vec![Filter::kinds(&[KIND_WEATHER_READING])
            .authors(&[station])
            .limit(1)];
        let records = bounded_query(self.relay.as_ref(), filters, cancel).await?;
        Ok(records
            .into_iter()
            .filter(|r| validate::weather_reading(r))
            .max_by_key(|r| r.created_at)
            .map(WeatherReading::from_record))
    }
}
