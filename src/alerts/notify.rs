//! Notification boundary.
//!
//! The alert machinery hands finished [`Notification`] values to a
//! [`NotificationSink`] and is done; rendering, sound and the rest of the
//! presentation live behind the trait.

use serde::Deserialize;

/// How a delivered alert should present itself.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPreferences {
    #[serde(default = "NotificationPreferences::default_flag")]
    pub sound: bool,
    #[serde(default = "NotificationPreferences::default_flag")]
    pub vibration: bool,
    #[serde(default = "NotificationPreferences::default_flag")]
    pub led: bool,
}

impl NotificationPreferences {
    fn default_flag() -> bool {
        true
    }
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            sound: true,
            vibration: true,
            led: true,
        }
    }
}

/// A user-facing alert, produced at most once per arming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A watched service is about to reach the watched stop.
    Time {
        stop_code: String,
        stop_name: String,
        service_name: String,
        minutes: u32,
    },
    /// The device entered the watched stop's radius.
    Proximity {
        stop_code: String,
        stop_name: String,
        radius_meters: u32,
    },
}

impl Notification {
    pub fn stop_code(&self) -> &str {
        match self {
            Notification::Time { stop_code, .. } => stop_code,
            Notification::Proximity { stop_code, .. } => stop_code,
        }
    }

    /// Short heading for the alert.
    pub fn title(&self) -> String {
        match self {
            Notification::Time { service_name, .. } => {
                format!("Service {} is coming", service_name)
            }
            Notification::Proximity { stop_name, .. } => format!("Approaching {}", stop_name),
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notification::Time {
                stop_name,
                service_name,
                minutes,
                ..
            } => match minutes {
                0 => format!("Service {} is due at {}", service_name, stop_name),
                1 => format!("Service {} reaches {} in 1 minute", service_name, stop_name),
                m => format!("Service {} reaches {} in {} minutes", service_name, stop_name, m),
            },
            Notification::Proximity {
                stop_name,
                radius_meters,
                ..
            } => format!("You are within {} m of {}", radius_meters, stop_name),
        }
    }
}

/// Delivery side of the alert pipeline. Implementations must not block;
/// delivery happens on the polling task.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: Notification, preferences: &NotificationPreferences);
}
