//! Flight lookup and departure-delay estimation over the warehouse.

pub mod client;
pub mod estimate;
pub mod flight;
pub mod history;
pub mod performance;

pub use client::FlightLookupClient;
pub use estimate::{DelayEstimate, DelayEstimator, DelayModel, ModelInputs};
pub use flight::{DepartureTime, FlightInfo, parse_flight_response};
pub use history::DelayHistory;
pub use performance::{AirlinePerformance, AirportPerformance, AirportRanking, PerformanceSummary};
