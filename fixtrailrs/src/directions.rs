//! External directions service client.
//!
//! Only the route geometry is consumed: each leg's step polylines are
//! decoded, joined, and re-encoded into one polyline per leg.

use std::future::Future;
use std::time::Duration;

use fixtrail::{GpsPoint, WaypointLeg, decode_polyline, encode_polyline};
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;

use crate::error::DirectionsError;

/// Origin, destination and ordered intermediate waypoints.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionsRequest {
    pub origin: GpsPoint,
    pub destination: GpsPoint,
    pub waypoints: Vec<GpsPoint>,
}

impl From<&WaypointLeg> for DirectionsRequest {
    fn from(leg: &WaypointLeg) -> Self {
        Self {
            origin: leg.origin,
            destination: leg.destination,
            waypoints: leg.waypoints.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteLeg {
    /// Encoded polyline for the whole leg
    pub polyline: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DirectionsRoute {
    pub legs: Vec<RouteLeg>,
}

/// Anything that can answer a directions request.
pub trait DirectionsService: Send + Sync {
    fn route(
        &self,
        request: &DirectionsRequest,
    ) -> impl Future<Output = Result<DirectionsRoute, DirectionsError>> + Send;
}

// ============================================================================
// Google Directions
// ============================================================================

const GOOGLE_DIRECTIONS_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<ApiRoute>,
}

#[derive(Debug, Deserialize)]
struct ApiRoute {
    #[serde(default)]
    legs: Vec<ApiLeg>,
}

#[derive(Debug, Deserialize)]
struct ApiLeg {
    #[serde(default)]
    steps: Vec<ApiStep>,
}

#[derive(Debug, Deserialize)]
struct ApiStep {
    polyline: ApiPolyline,
}

#[derive(Debug, Deserialize)]
struct ApiPolyline {
    points: String,
}

/// Client for the Google Directions JSON API.
pub struct GoogleDirections {
    client: Client,
    api_key: String,
    base_url: String,
    mode: String,
}

impl GoogleDirections {
    pub fn new(api_key: impl Into<String>) -> Result<Self, DirectionsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: GOOGLE_DIRECTIONS_URL.to_string(),
            mode: "driving".to_string(),
        })
    }

    /// Travel mode (`driving`, `walking`, `bicycling`).
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn query(&self, request: &DirectionsRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("origin", format_point(&request.origin)),
            ("destination", format_point(&request.destination)),
            ("mode", self.mode.clone()),
            ("key", self.api_key.clone()),
        ];
        if !request.waypoints.is_empty() {
            let waypoints: Vec<String> = request.waypoints.iter().map(format_point).collect();
            query.push(("waypoints", waypoints.join("|")));
        }
        query
    }
}

fn format_point(p: &GpsPoint) -> String {
    format!("{:.6},{:.6}", p.latitude, p.longitude)
}

impl DirectionsService for GoogleDirections {
    async fn route(&self, request: &DirectionsRequest) -> Result<DirectionsRoute, DirectionsError> {
        debug!(
            "[Directions] Requesting route with {} waypoints",
            request.waypoints.len()
        );
        let response: ApiResponse = self
            .client
            .get(&self.base_url)
            .query(&self.query(request))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_response(response)
    }
}

fn parse_response(response: ApiResponse) -> Result<DirectionsRoute, DirectionsError> {
    if response.status != "OK" {
        return Err(DirectionsError::Service {
            message: response.error_message.unwrap_or_default(),
            status: response.status,
        });
    }

    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or(DirectionsError::NoRoute)?;

    let mut legs = Vec::with_capacity(route.legs.len());
    for leg in route.legs {
        let mut path: Vec<GpsPoint> = Vec::new();
        for step in leg.steps {
            let points = decode_polyline(&step.polyline.points)?;
            // Consecutive steps share their junction point
            let skip = usize::from(path.last().is_some() && path.last() == points.first());
            path.extend(points.into_iter().skip(skip));
        }
        match encode_polyline(&path) {
            Some(polyline) => legs.push(RouteLeg { polyline }),
            None => warn!("[Directions] Dropping leg with out-of-range points"),
        }
    }

    Ok(DirectionsRoute { legs })
}
