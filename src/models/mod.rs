pub mod alert;
pub mod live_times;

pub use alert::{ProximityAlert, StopPoint, TimeAlert};
pub use live_times::{
    BusArrival, JourneyStop, JourneyTimes, LiveTimes, ServiceTimes, StopTimes,
};
