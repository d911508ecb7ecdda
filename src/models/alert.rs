use uuid::Uuid;

/// A user's armed arrival-time alert. At most one exists at a time; the
/// token identifies the arm generation so stale poll tasks can detect
/// they lost a cancel or re-arm race.
#[derive(Debug, Clone)]
pub struct TimeAlert {
    pub stop_code: String,
    /// Watched service names, never empty.
    pub services: Vec<String>,
    /// Fires when a watched service's nearest bus is at or below this
    /// many minutes away.
    pub trigger_minutes: u32,
    pub token: Uuid,
}

impl TimeAlert {
    pub fn watches(&self, service_name: &str) -> bool {
        self.services.iter().any(|s| s == service_name)
    }
}

/// A user's armed proximity alert. The coordinates are snapshotted at arm
/// time so the geofence stays stable even if the stop database changes.
#[derive(Debug, Clone)]
pub struct ProximityAlert {
    pub stop_code: String,
    pub radius_meters: u32,
    pub position: StopPoint,
    pub token: Uuid,
}

/// WGS84 position of a stop.
#[derive(Debug, Clone, Copy)]
pub struct StopPoint {
    pub latitude: f64,
    pub longitude: f64,
}
