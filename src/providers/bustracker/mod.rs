//! Client for the bus-tracker live-times API.
//!
//! Builds request URLs for the JSON service functions, performs the
//! fetch with a redirect-host guard, and hands response bodies to the
//! parser. The client keeps no state between calls.

pub mod error;
pub mod parser;

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::TrackerConfig;
use crate::models::{JourneyTimes, LiveTimes};

pub use error::BusTrackerError;

/// Seam the alert scheduler polls live times through; tests substitute a
/// scripted source.
pub trait LiveTimesSource {
    fn live_times(
        &self,
        stop_codes: &[String],
        num_departures: u32,
    ) -> impl Future<Output = Result<LiveTimes, BusTrackerError>> + Send;
}

pub struct BusTrackerClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Stop codes per request the remote API accepts.
    max_stops_per_request: usize,
}

impl BusTrackerClient {
    pub fn new(config: &TrackerConfig) -> Result<Self, BusTrackerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| BusTrackerError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_stops_per_request: config.max_stops_per_request,
        })
    }

    /// Fetch live departure times for the given stops.
    ///
    /// The batch is capped at the configured per-request limit and
    /// `num_departures` is clamped to at least one.
    pub async fn get_live_times(
        &self,
        stop_codes: &[String],
        num_departures: u32,
    ) -> Result<LiveTimes, BusTrackerError> {
        let url = self.build_live_times_url(stop_codes, num_departures)?;
        let body = self.fetch_document(&url).await?;
        parser::parse_live_times(&body)
    }

    /// Fetch the stop-by-stop times of a single journey.
    pub async fn get_journey_times(
        &self,
        stop_code: &str,
        journey_id: &str,
    ) -> Result<JourneyTimes, BusTrackerError> {
        let url = self.build_journey_times_url(stop_code, journey_id);
        let body = self.fetch_document(&url).await?;
        parser::parse_journey_times(&body)
    }

    /// The underlying HTTP client, shared with flows that talk to hosts
    /// other than the tracker API.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Fetch the current remote stop-topology version identifier.
    pub async fn get_topology_id(&self) -> Result<String, BusTrackerError> {
        let url = format!(
            "{}/?module=json&function=getTopoId&key={}",
            self.base_url,
            urlencoding::encode(&self.api_key)
        );
        let body = self.fetch_document(&url).await?;
        parser::parse_topology_id(&body)
    }

    fn build_live_times_url(
        &self,
        stop_codes: &[String],
        num_departures: u32,
    ) -> Result<String, BusTrackerError> {
        if stop_codes.is_empty() {
            return Err(BusTrackerError::NoStopCodes);
        }
        if stop_codes.len() > self.max_stops_per_request {
            debug!(
                requested = stop_codes.len(),
                limit = self.max_stops_per_request,
                "Truncating stop-code batch to the API limit"
            );
        }

        let mut url = format!(
            "{}/?module=json&function=getBusTimes&key={}&nb={}",
            self.base_url,
            urlencoding::encode(&self.api_key),
            num_departures.max(1)
        );
        for (index, stop_code) in stop_codes
            .iter()
            .take(self.max_stops_per_request)
            .enumerate()
        {
            url.push_str(&format!(
                "&stopId{}={}",
                index + 1,
                urlencoding::encode(stop_code)
            ));
        }
        Ok(url)
    }

    fn build_journey_times_url(&self, stop_code: &str, journey_id: &str) -> String {
        format!(
            "{}/?module=json&function=getJourneyTimes&key={}&stopId={}&journeyId={}",
            self.base_url,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(stop_code),
            urlencoding::encode(journey_id)
        )
    }

    /// GET the URL and return the body, with transport failures mapped to
    /// their distinct error kinds.
    async fn fetch_document(&self, url: &str) -> Result<String, BusTrackerError> {
        let expected_host = reqwest::Url::parse(url)
            .map_err(|e| BusTrackerError::MalformedUrl(e.to_string()))?
            .host_str()
            .map(|h| h.to_string());

        debug!(url = %url, "Requesting bus-tracker document");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(BusTrackerError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(BusTrackerError::HttpStatus(status.as_u16()));
        }

        // A redirect that leaves the tracker host means something else
        // answered the request (captive portal, hijacked DNS).
        let final_host = response.url().host_str().map(|h| h.to_string());
        if final_host != expected_host {
            return Err(BusTrackerError::HostMismatch {
                expected: expected_host.unwrap_or_default(),
                actual: final_host.unwrap_or_default(),
            });
        }

        response.text().await.map_err(BusTrackerError::from_reqwest)
    }
}

impl LiveTimesSource for BusTrackerClient {
    async fn live_times(
        &self,
        stop_codes: &[String],
        num_departures: u32,
    ) -> Result<LiveTimes, BusTrackerError> {
        self.get_live_times(stop_codes, num_departures).await
    }
}
