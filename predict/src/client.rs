use crate::flight::{FlightInfo, parse_flight_response};
use common::Result;
use common::config::FlightApiConfig;
use serde_json::Value;
use tracing::debug;

/// Client for the flight status API.
#[derive(Clone, Debug)]
pub struct FlightLookupClient {
    client: reqwest::Client,
    url: String,
    access_key: String,
}

impl FlightLookupClient {
    pub fn new(client: reqwest::Client, config: &FlightApiConfig) -> Self {
        Self {
            client,
            url: config.url.clone(),
            access_key: config.access_key.clone(),
        }
    }

    /// Looks up `flight_number` (IATA form, e.g. `AA100`). `Ok(None)` means
    /// the service does not know the flight.
    pub async fn lookup(&self, flight_number: &str) -> Result<Option<FlightInfo>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("access_key", self.access_key.as_str()),
                ("flight_iata", flight_number),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: Value = response.json().await?;
        let flight = parse_flight_response(&body)?;
        debug!(flight_number, found = flight.is_some(), "Flight lookup finished");
        Ok(flight)
    }
}
