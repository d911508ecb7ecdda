use std::collections::HashMap;

use chrono::NaiveTime;
use serde::Serialize;

/// Reliability code the API uses for departures tracked in real time.
/// Any other code marks the value as a timetable estimate.
pub const RELIABILITY_REAL_TIME: char = 'T';

/// Departures further out than this render as a wall-clock time instead
/// of a relative minute count.
const DISPLAY_ABSOLUTE_THRESHOLD_MINUTES: u32 = 60;

/// Root result of a live-times query.
///
/// Built fresh on every successful parse and handed to the caller as a
/// plain value; nothing here is cached or persisted.
#[derive(Debug, Clone, Serialize)]
pub struct LiveTimes {
    /// Stops keyed by stop code.
    pub stops: HashMap<String, StopTimes>,
    /// Network-wide disruption flag surfaced by the API.
    pub has_global_disruption: bool,
}

impl LiveTimes {
    pub fn stop(&self, stop_code: &str) -> Option<&StopTimes> {
        self.stops.get(stop_code)
    }
}

/// All services currently reported for one stop.
#[derive(Debug, Clone, Serialize)]
pub struct StopTimes {
    pub stop_code: String,
    pub stop_name: String,
    pub has_disruption: bool,
    /// Services in the order the API returned them.
    pub services: Vec<ServiceTimes>,
}

/// Upcoming buses for one service at one stop.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceTimes {
    /// Service identity as shown on the front of the bus (e.g. "22").
    pub service_name: String,
    pub operator: Option<String>,
    /// Route description line (e.g. "Gyle Centre -- Ocean Terminal").
    pub route_description: Option<String>,
    pub is_disrupted: bool,
    pub is_diverted: bool,
    /// Arrivals ordered soonest-first as returned by the API.
    pub buses: Vec<BusArrival>,
}

impl ServiceTimes {
    /// The nearest upcoming bus, if the service has any.
    pub fn next_bus(&self) -> Option<&BusArrival> {
        self.buses.first()
    }
}

/// A single upcoming departure.
#[derive(Debug, Clone, Serialize)]
pub struct BusArrival {
    pub destination: String,
    /// Minutes until departure. This is the only quantity alert matching
    /// compares against a trigger threshold; the wall-clock time is for
    /// display only.
    pub departure_minutes: u32,
    /// Scheduled wall-clock departure time, when the API supplied one.
    pub departure_time: Option<NaiveTime>,
    /// Days from today the departure falls on (0 = today).
    pub day_offset: u8,
    /// True when the time is a timetable prediction rather than a
    /// real-time tracked value.
    pub is_estimated: bool,
    pub reliability: char,
    pub bus_type: char,
    pub terminus: Option<String>,
    pub journey_id: Option<String>,
}

impl BusArrival {
    /// Human-readable departure: "DUE" when imminent, a minute count when
    /// close, the wall-clock time when further out.
    pub fn display_departure(&self) -> String {
        if self.departure_minutes == 0 {
            return "DUE".to_string();
        }
        if self.departure_minutes < DISPLAY_ABSOLUTE_THRESHOLD_MINUTES {
            return format!("{} min", self.departure_minutes);
        }
        match self.departure_time {
            Some(time) => time.format("%H:%M").to_string(),
            None => format!("{} min", self.departure_minutes),
        }
    }
}

/// One journey's full stop-by-stop schedule.
#[derive(Debug, Clone, Serialize)]
pub struct JourneyTimes {
    pub journey_id: String,
    pub service_name: String,
    pub destination: Option<String>,
    pub terminus: Option<String>,
    pub operator: Option<String>,
    pub has_global_disruption: bool,
    pub has_service_disruption: bool,
    pub has_journey_disruption: bool,
    /// Calling points in running order.
    pub stops: Vec<JourneyStop>,
}

/// A calling point within a journey.
#[derive(Debug, Clone, Serialize)]
pub struct JourneyStop {
    pub stop_code: String,
    pub stop_name: Option<String>,
    pub arrival_time: Option<NaiveTime>,
    pub day_offset: u8,
    pub order: u32,
}
