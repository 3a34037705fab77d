//! Flight lookup responses.

use common::MalformedResponseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

static DEPARTURE_TIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"T(?P<hour>[0-2][0-9]):(?P<minute>[0-5][0-9])").expect("Invalid departure time regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlightInfo {
    pub airline: String,
    pub origin: String,
    pub destination: String,
    /// Scheduled departure as reported, e.g. `2024-05-01T08:35:00+00:00`.
    pub scheduled_departure: String,
}

impl FlightInfo {
    pub fn departure_time(&self) -> Result<DepartureTime, MalformedResponseError> {
        DepartureTime::parse(&self.scheduled_departure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepartureTime {
    pub hour: u8,
    pub minute: u8,
}

impl DepartureTime {
    /// Reads `HH:MM` following the `T` of an ISO-8601 timestamp.
    pub fn parse(scheduled: &str) -> Result<Self, MalformedResponseError> {
        let captures = DEPARTURE_TIME_REGEX.captures(scheduled).ok_or_else(|| {
            MalformedResponseError::new(format!("scheduled departure {:?} has no time", scheduled))
        })?;
        let part = |name: &str| {
            captures[name]
                .parse::<u8>()
                .map_err(|e| MalformedResponseError::new(format!("departure {}: {}", name, e)))
        };
        let hour = part("hour")?;
        if hour > 23 {
            return Err(MalformedResponseError::new(format!(
                "scheduled departure {:?} has hour {}",
                scheduled, hour
            )));
        }
        Ok(Self {
            hour,
            minute: part("minute")?,
        })
    }
}

impl fmt::Display for DepartureTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[derive(Deserialize)]
struct RawFlight {
    airline: RawAirline,
    departure: RawDeparture,
    arrival: RawArrival,
}

#[derive(Deserialize)]
struct RawAirline {
    iata: String,
}

#[derive(Deserialize)]
struct RawDeparture {
    iata: String,
    scheduled: String,
}

#[derive(Deserialize)]
struct RawArrival {
    iata: String,
}

/// Extracts the first flight from a lookup response.
///
/// The service answers with a top-level array, an object keyed by `"0"`, or
/// an object holding a `data` array. An empty list means the flight is
/// unknown.
pub fn parse_flight_response(body: &Value) -> Result<Option<FlightInfo>, MalformedResponseError> {
    let record = match body {
        Value::Array(items) => items.first(),
        Value::Object(map) => match (map.get("0"), map.get("data")) {
            (Some(first), _) => Some(first),
            (None, Some(Value::Array(items))) => items.first(),
            (None, Some(_)) => return Err(MalformedResponseError::new("data is not an array")),
            (None, None) => {
                return Err(MalformedResponseError::new(
                    "object has neither a \"0\" entry nor a data array",
                ));
            }
        },
        other => {
            return Err(MalformedResponseError::new(format!(
                "expected an array or object, got {}",
                kind(other)
            )));
        }
    };

    let Some(record) = record else {
        return Ok(None);
    };

    let raw: RawFlight = serde_json::from_value(record.clone())
        .map_err(|e| MalformedResponseError::new(format!("flight record: {}", e)))?;

    for (name, value) in [
        ("airline.iata", &raw.airline.iata),
        ("departure.iata", &raw.departure.iata),
        ("arrival.iata", &raw.arrival.iata),
    ] {
        if value.trim().is_empty() {
            return Err(MalformedResponseError::new(format!("{} is empty", name)));
        }
    }

    Ok(Some(FlightInfo {
        airline: raw.airline.iata,
        origin: raw.departure.iata,
        destination: raw.arrival.iata,
        scheduled_departure: raw.departure.scheduled,
    }))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flight() -> Value {
        json!({
            "airline": { "iata": "AA", "name": "American Airlines" },
            "departure": { "iata": "JFK", "scheduled": "2024-05-01T08:35:00+00:00" },
            "arrival": { "iata": "LAX" }
        })
    }

    #[test]
    fn accepts_each_response_shape() {
        let expected = FlightInfo {
            airline: "AA".to_string(),
            origin: "JFK".to_string(),
            destination: "LAX".to_string(),
            scheduled_departure: "2024-05-01T08:35:00+00:00".to_string(),
        };

        for body in [
            json!([flight()]),
            json!({ "0": flight() }),
            json!({ "success": true, "data": [flight()] }),
        ] {
            assert_eq!(parse_flight_response(&body).unwrap(), Some(expected.clone()));
        }
    }

    #[test]
    fn empty_results_mean_not_found() {
        assert_eq!(parse_flight_response(&json!([])).unwrap(), None);
        assert_eq!(parse_flight_response(&json!({ "data": [] })).unwrap(), None);
    }

    #[test]
    fn unexpected_shapes_are_malformed() {
        let err = parse_flight_response(&json!({ "error": "invalid access key" })).unwrap_err();
        assert!(err.reason.contains("data array"));

        let err = parse_flight_response(&json!("rate limited")).unwrap_err();
        assert!(err.reason.contains("a string"));

        let missing = json!([{ "airline": { "iata": "AA" }, "departure": { "iata": "JFK" }, "arrival": { "iata": "LAX" } }]);
        let err = parse_flight_response(&missing).unwrap_err();
        assert!(err.reason.contains("scheduled"));

        let blank = json!([{ "airline": { "iata": "" }, "departure": { "iata": "JFK", "scheduled": "T08:35" }, "arrival": { "iata": "LAX" } }]);
        let err = parse_flight_response(&blank).unwrap_err();
        assert_eq!(err.reason, "airline.iata is empty");
    }

    #[test]
    fn departure_time_comes_after_the_t() {
        let time = DepartureTime::parse("2024-05-01T08:35:00+00:00").unwrap();
        assert_eq!(time, DepartureTime { hour: 8, minute: 35 });
        assert_eq!(time.to_string(), "08:35");

        assert!(DepartureTime::parse("2024-05-01").is_err());
        assert!(DepartureTime::parse("2024-05-01T27:10:00").is_err());
    }
}
