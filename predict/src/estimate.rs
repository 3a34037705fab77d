use crate::client::FlightLookupClient;
use crate::history::DelayHistory;
use common::Result;
use serde::Serialize;
use tracing::{info, warn};

/// Half-width of the reported delay band, in minutes.
pub const UNCERTAINTY_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInputs {
    pub airline: String,
    pub origin: String,
    pub destination: String,
    pub depart_hour: u8,
    pub depart_minute: u8,
    pub historical_delay: f64,
}

/// A trained delay model. Returns the predicted departure delay in minutes.
pub trait DelayModel: Send + Sync {
    fn predict(&self, inputs: &ModelInputs) -> f64;
}

impl<F> DelayModel for F
where
    F: Fn(&ModelInputs) -> f64 + Send + Sync,
{
    fn predict(&self, inputs: &ModelInputs) -> f64 {
        self(inputs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DelayEstimate {
    pub airline: String,
    pub origin: String,
    pub destination: String,
    /// `HH:MM`
    pub departure_time: String,
    pub low_delay: i64,
    pub high_delay: i64,
}

pub struct DelayEstimator<M> {
    model: M,
}

impl<M: DelayModel> DelayEstimator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// Scores `inputs` and widens the rounded prediction into a band. The low
    /// bound never goes below zero. `None` if the model output is not finite.
    pub fn estimate(&self, inputs: &ModelInputs) -> Option<DelayEstimate> {
        let predicted = self.model.predict(inputs);
        if !predicted.is_finite() {
            warn!(prediction = predicted, "Delay model returned a non-finite value");
            return None;
        }
        let predicted = predicted.round() as i64;

        Some(DelayEstimate {
            airline: inputs.airline.clone(),
            origin: inputs.origin.clone(),
            destination: inputs.destination.clone(),
            departure_time: format!("{:02}:{:02}", inputs.depart_hour, inputs.depart_minute),
            low_delay: (predicted - UNCERTAINTY_MINUTES).max(0),
            high_delay: predicted + UNCERTAINTY_MINUTES,
        })
    }

    /// Looks the flight up, adds its route history and estimates the delay.
    /// `Ok(None)` when the flight is unknown.
    pub async fn estimate_flight(
        &self,
        lookup: &FlightLookupClient,
        history: &dyn DelayHistory,
        flight_number: &str,
    ) -> Result<Option<DelayEstimate>> {
        let Some(flight) = lookup.lookup(flight_number).await? else {
            info!(flight_number, "Flight not found");
            return Ok(None);
        };

        let departure = flight.departure_time()?;
        let historical_delay = history
            .historical_delay(&flight.airline, &flight.origin, &flight.destination)
            .await?;

        let inputs = ModelInputs {
            airline: flight.airline,
            origin: flight.origin,
            destination: flight.destination,
            depart_hour: departure.hour,
            depart_minute: departure.minute,
            historical_delay,
        };
        let estimate = self.estimate(&inputs);
        if let Some(estimate) = &estimate {
            info!(
                flight_number,
                low = estimate.low_delay,
                high = estimate.high_delay,
                "Estimated departure delay"
            );
        }
        Ok(estimate)
    }
}
