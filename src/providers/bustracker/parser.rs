//! Response-document parsing for the live-times API.
//!
//! The API answers every function with either a fault object
//! (`{"faultcode": "..."}`) or a payload document. Payload elements are
//! processed one at a time: a record that is missing a required field or
//! fails to deserialize is skipped and counted, never allowed to poison
//! the rest of the response.

use std::collections::HashMap;

use chrono::NaiveTime;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::live_times::RELIABILITY_REAL_TIME;
use crate::models::{BusArrival, JourneyStop, JourneyTimes, LiveTimes, ServiceTimes, StopTimes};

use super::error::BusTrackerError;

#[derive(Debug, Deserialize)]
struct RawLiveTimesDocument {
    faultcode: Option<String>,
    #[serde(rename = "busTimes")]
    bus_times: Option<Vec<serde_json::Value>>,
}

/// One `busTimes` element: a (stop, service, bus list) triple. Every field
/// is optional here so required-field checks are explicit code paths.
#[derive(Debug, Deserialize)]
struct RawBusTimes {
    #[serde(rename = "stopId")]
    stop_id: Option<String>,
    #[serde(rename = "stopName")]
    stop_name: Option<String>,
    #[serde(rename = "busStopDisruption")]
    bus_stop_disruption: Option<bool>,
    #[serde(rename = "globalDisruption")]
    global_disruption: Option<bool>,
    #[serde(rename = "mnemoService")]
    mnemo_service: Option<String>,
    #[serde(rename = "nameService")]
    name_service: Option<String>,
    #[serde(rename = "operatorId")]
    operator_id: Option<String>,
    #[serde(rename = "serviceDisruption")]
    service_disruption: Option<bool>,
    #[serde(rename = "serviceDiversion")]
    service_diversion: Option<bool>,
    #[serde(rename = "timeDatas", default)]
    time_datas: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawTimeData {
    #[serde(rename = "nameDest")]
    name_dest: Option<String>,
    day: Option<u8>,
    time: Option<String>,
    minutes: Option<u32>,
    reliability: Option<String>,
    #[serde(rename = "type")]
    bus_type: Option<String>,
    terminus: Option<String>,
    #[serde(rename = "journeyId")]
    journey_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawJourneyDocument {
    faultcode: Option<String>,
    #[serde(rename = "journeyTimes")]
    journey_times: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct RawJourney {
    #[serde(rename = "journeyId")]
    journey_id: Option<String>,
    #[serde(rename = "mnemoService")]
    mnemo_service: Option<String>,
    #[serde(rename = "nameDest")]
    name_dest: Option<String>,
    terminus: Option<String>,
    #[serde(rename = "operatorId")]
    operator_id: Option<String>,
    #[serde(rename = "globalDisruption")]
    global_disruption: Option<bool>,
    #[serde(rename = "serviceDisruption")]
    service_disruption: Option<bool>,
    #[serde(rename = "journeyDisruption")]
    journey_disruption: Option<bool>,
    #[serde(rename = "journeyTimeDatas", default)]
    journey_time_datas: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawJourneyStop {
    #[serde(rename = "stopId")]
    stop_id: Option<String>,
    #[serde(rename = "stopName")]
    stop_name: Option<String>,
    day: Option<u8>,
    time: Option<String>,
    order: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawTopology {
    faultcode: Option<String>,
    #[serde(rename = "topoId")]
    topo_id: Option<String>,
}

/// Parse a `getBusTimes` response into [`LiveTimes`].
pub fn parse_live_times(raw: &str) -> Result<LiveTimes, BusTrackerError> {
    let document: RawLiveTimesDocument = serde_json::from_str(raw)
        .map_err(|e| BusTrackerError::MalformedResponse(e.to_string()))?;

    if let Some(code) = document.faultcode.as_deref() {
        if !code.is_empty() {
            return Err(BusTrackerError::from_fault_code(code));
        }
    }

    let Some(elements) = document.bus_times else {
        return Err(BusTrackerError::MalformedResponse(
            "document has neither faultcode nor busTimes".to_string(),
        ));
    };
    if elements.is_empty() {
        return Err(BusTrackerError::NoDataAvailable);
    }

    let mut stops: HashMap<String, StopTimes> = HashMap::new();
    let mut has_global_disruption = false;
    let mut skipped_services = 0usize;
    let mut skipped_buses = 0usize;

    for element in elements {
        let entry: RawBusTimes = match serde_json::from_value(element) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Skipping malformed busTimes element");
                skipped_services += 1;
                continue;
            }
        };

        let RawBusTimes {
            stop_id,
            stop_name,
            bus_stop_disruption,
            global_disruption,
            mnemo_service,
            name_service,
            operator_id,
            service_disruption,
            service_diversion,
            time_datas,
        } = entry;

        // Each element repeats the global flag; the last one seen wins.
        if let Some(global) = global_disruption {
            has_global_disruption = global;
        }

        let stop_code = match stop_id {
            Some(id) if !id.is_empty() => id,
            _ => {
                skipped_services += 1;
                continue;
            }
        };
        let service_name = match mnemo_service {
            Some(name) if !name.is_empty() => name,
            _ => {
                skipped_services += 1;
                continue;
            }
        };

        let mut buses = Vec::new();
        for time_data in time_datas {
            match parse_bus(time_data) {
                Some(bus) => buses.push(bus),
                None => skipped_buses += 1,
            }
        }

        let stop = stops
            .entry(stop_code.clone())
            .or_insert_with(|| StopTimes {
                stop_code,
                stop_name: stop_name.unwrap_or_default(),
                has_disruption: bus_stop_disruption.unwrap_or(false),
                services: Vec::new(),
            });

        stop.services.push(ServiceTimes {
            service_name,
            operator: operator_id,
            route_description: name_service,
            is_disrupted: service_disruption.unwrap_or(false),
            is_diverted: service_diversion.unwrap_or(false),
            buses,
        });
    }

    if skipped_services > 0 || skipped_buses > 0 {
        warn!(
            skipped_services,
            skipped_buses, "Skipped unparseable live-times records"
        );
    }

    Ok(LiveTimes {
        stops,
        has_global_disruption,
    })
}

fn parse_bus(value: serde_json::Value) -> Option<BusArrival> {
    let raw: RawTimeData = serde_json::from_value(value).ok()?;

    let destination = raw.name_dest.filter(|d| !d.is_empty())?;
    let departure_minutes = raw.minutes?;

    let reliability = first_code_char(raw.reliability.as_deref());
    let bus_type = first_code_char(raw.bus_type.as_deref());

    Some(BusArrival {
        destination,
        departure_minutes,
        departure_time: raw.time.as_deref().and_then(parse_clock_time),
        day_offset: raw.day.unwrap_or(0),
        is_estimated: reliability != RELIABILITY_REAL_TIME,
        reliability,
        bus_type,
        terminus: raw.terminus,
        journey_id: raw.journey_id,
    })
}

/// Parse a `getJourneyTimes` response into [`JourneyTimes`].
///
/// The document carries a single-journey array; the first parseable entry
/// is used. Calling points follow the same skip policy as live times.
pub fn parse_journey_times(raw: &str) -> Result<JourneyTimes, BusTrackerError> {
    let document: RawJourneyDocument = serde_json::from_str(raw)
        .map_err(|e| BusTrackerError::MalformedResponse(e.to_string()))?;

    if let Some(code) = document.faultcode.as_deref() {
        if !code.is_empty() {
            return Err(BusTrackerError::from_fault_code(code));
        }
    }

    let Some(elements) = document.journey_times else {
        return Err(BusTrackerError::MalformedResponse(
            "document has neither faultcode nor journeyTimes".to_string(),
        ));
    };

    let mut skipped_stops = 0usize;

    for element in elements {
        let entry: RawJourney = match serde_json::from_value(element) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "Skipping malformed journeyTimes element");
                continue;
            }
        };

        let (Some(journey_id), Some(service_name)) = (entry.journey_id, entry.mnemo_service)
        else {
            continue;
        };

        let mut calling_points = Vec::new();
        for (index, stop_value) in entry.journey_time_datas.into_iter().enumerate() {
            match parse_journey_stop(stop_value, index as u32) {
                Some(stop) => calling_points.push(stop),
                None => skipped_stops += 1,
            }
        }

        if skipped_stops > 0 {
            warn!(skipped_stops, journey = %journey_id, "Skipped unparseable journey calling points");
        }

        return Ok(JourneyTimes {
            journey_id,
            service_name,
            destination: entry.name_dest,
            terminus: entry.terminus,
            operator: entry.operator_id,
            has_global_disruption: entry.global_disruption.unwrap_or(false),
            has_service_disruption: entry.service_disruption.unwrap_or(false),
            has_journey_disruption: entry.journey_disruption.unwrap_or(false),
            stops: calling_points,
        });
    }

    Err(BusTrackerError::NoDataAvailable)
}

fn parse_journey_stop(value: serde_json::Value, index: u32) -> Option<JourneyStop> {
    let raw: RawJourneyStop = serde_json::from_value(value).ok()?;
    let stop_code = raw.stop_id.filter(|id| !id.is_empty())?;

    Some(JourneyStop {
        stop_code,
        stop_name: raw.stop_name,
        arrival_time: raw.time.as_deref().and_then(parse_clock_time),
        day_offset: raw.day.unwrap_or(0),
        order: raw.order.unwrap_or(index),
    })
}

/// Parse a `getTopoId` response into the topology version string.
pub fn parse_topology_id(raw: &str) -> Result<String, BusTrackerError> {
    let document: RawTopology =
        serde_json::from_str(raw).map_err(|e| BusTrackerError::MalformedResponse(e.to_string()))?;

    if let Some(code) = document.faultcode.as_deref() {
        if !code.is_empty() {
            return Err(BusTrackerError::from_fault_code(code));
        }
    }

    match document.topo_id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(BusTrackerError::MalformedResponse(
            "document has neither faultcode nor topoId".to_string(),
        )),
    }
}

/// The API sends clock values as "HH:MM" strings.
fn parse_clock_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

fn first_code_char(value: Option<&str>) -> char {
    value.and_then(|s| s.chars().next()).unwrap_or('?')
}
