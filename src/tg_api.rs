// API clients for the MBTA Transfer Guardian
//
// Endpoints:
// - MBTA v3 predictions: https://api-v3.mbta.com/predictions?filter[stop]=...
// - MBTA v3 vehicles:    https://api-v3.mbta.com/vehicles?filter[route]=...
// - MBTA v3 stops:       https://api-v3.mbta.com/stops?filter[route_type]=0,1
// - Google Directions:   https://maps.googleapis.com/maps/api/directions/json

use crate::tg_evaluator::PredictionSource;
use crate::tg_models::{
    format_timestamp, walking_speed_mps, Confidence, Itinerary, LatLng, Prediction, Result,
    StationCache, StationInfo, Step, TGError, VehiclePosition,
};
use crate::tg_session::RouteSource;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;

const MBTA_BASE_URL: &str = "https://api-v3.mbta.com";
const GOOGLE_BASE_URL: &str = "https://maps.googleapis.com/maps/api/directions/json";
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// API credentials pulled from the environment (dotenv supported).
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub mbta_key: Option<String>,
    pub google_key: Option<String>,
    pub elevenlabs_key: Option<String>,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        ApiConfig {
            mbta_key: std::env::var("MBTA_API_KEY").ok().filter(|k| !k.is_empty()),
            google_key: std::env::var("GOOGLE_DIRECTIONS_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            elevenlabs_key: std::env::var("ELEVENLABS_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
        }
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| TGError::Network(format!("Failed to create HTTP client: {}", e)))
}

// ============================================================================
// Prediction Client (MBTA v3)
// ============================================================================

/// Stateless adapter for the MBTA real-time API.
pub struct PredictionClient {
    http: reqwest::Client,
    api_key: Option<String>,
}

impl PredictionClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Ok(PredictionClient {
            http: http_client()?,
            api_key,
        })
    }

    fn get(&self, url: String) -> reqwest::RequestBuilder {
        let mut request = self.http.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        request
    }

    /// Real-time arrival estimates for one stop, nearest first.
    pub async fn predictions(&self, stop_id: &str) -> Result<Vec<Prediction>> {
        let url = format!("{}/predictions", MBTA_BASE_URL);
        let response = self
            .get(url)
            .query(&[
                ("filter[stop]", stop_id),
                ("include", "route"),
                ("sort", "arrival_time"),
                ("page[limit]", "5"),
            ])
            .send()
            .await
            .map_err(|e| TGError::Network(format!("Failed to fetch predictions: {}", e)))?;

        if !response.status().is_success() {
            return Err(TGError::Network(format!(
                "MBTA API returned error: {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TGError::Network(format!("Failed to read predictions response: {}", e)))?;

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| TGError::Parse(format!("Invalid JSON response: {}", e)))?;

        parse_predictions(&json, Utc::now())
    }

    /// Live vehicle positions for a set of routes. An empty route list skips
    /// the request entirely.
    pub async fn vehicles(&self, routes: &[String]) -> Result<Vec<VehiclePosition>> {
        if routes.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/vehicles", MBTA_BASE_URL);
        let response = self
            .get(url)
            .query(&[("filter[route]", routes.join(",").as_str()), ("include", "route")])
            .send()
            .await
            .map_err(|e| TGError::Network(format!("Failed to fetch vehicles: {}", e)))?;

        if !response.status().is_success() {
            return Err(TGError::Network(format!(
                "MBTA API returned error: {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TGError::Network(format!("Failed to read vehicles response: {}", e)))?;

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| TGError::Parse(format!("Invalid JSON response: {}", e)))?;

        parse_vehicles(&json)
    }

    /// The subway station directory, served from the 15-day disk cache when
    /// fresh.
    pub async fn stations(&self) -> Result<Vec<StationInfo>> {
        if let Some(cache) = StationCache::load() {
            return Ok(cache.stations);
        }

        let stations = self.fetch_stations().await?;

        let cache = StationCache::new(stations.clone());
        if let Err(e) = cache.save() {
            log::warn!("could not save station cache: {}", e);
        }

        Ok(stations)
    }

    async fn fetch_stations(&self) -> Result<Vec<StationInfo>> {
        let url = format!("{}/stops", MBTA_BASE_URL);
        let response = self
            .get(url)
            .query(&[("filter[route_type]", "0,1"), ("include", "parent_station")])
            .send()
            .await
            .map_err(|e| {
                TGError::Network(format!(
                    "Failed to fetch stations: {}. Check your internet connection.",
                    e
                ))
            })?;

        if !response.status().is_success() {
            return Err(TGError::Network(format!(
                "MBTA API returned error: {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TGError::Network(format!("Failed to read stations response: {}", e)))?;

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| TGError::Parse(format!("Invalid JSON response: {}", e)))?;

        parse_stations(&json)
    }
}

impl PredictionSource for PredictionClient {
    fn predictions_for_stop(
        &self,
        stop_id: &str,
    ) -> impl Future<Output = Result<Vec<Prediction>>> + Send {
        self.predictions(stop_id)
    }

    fn vehicles_for_routes(
        &self,
        routes: &[String],
    ) -> impl Future<Output = Result<Vec<VehiclePosition>>> + Send {
        self.vehicles(routes)
    }
}

fn parse_predictions(json: &Value, now: DateTime<Utc>) -> Result<Vec<Prediction>> {
    let data = json["data"]
        .as_array()
        .ok_or_else(|| TGError::Parse("Missing prediction data in API response".to_string()))?;

    let predictions = data
        .iter()
        .map(|pred| {
            let attributes = &pred["attributes"];

            let minutes = attributes["arrival_time"]
                .as_str()
                .and_then(|arrival| DateTime::parse_from_rfc3339(arrival).ok())
                .map(|target| {
                    let seconds = target.signed_duration_since(now).num_seconds();
                    (seconds / 60).max(0) as f64
                })
                .unwrap_or(0.0);

            let destination = match attributes["direction_id"].as_i64() {
                Some(0) => "Outbound".to_string(),
                _ => "Inbound".to_string(),
            };

            let route = pred["relationships"]["route"]["data"]["id"]
                .as_str()
                .unwrap_or("Subway")
                .to_string();

            let status = attributes["status"].as_str().unwrap_or("On Time").to_string();

            Prediction {
                minutes,
                route,
                destination,
                status,
            }
        })
        .collect();

    Ok(predictions)
}

fn parse_vehicles(json: &Value) -> Result<Vec<VehiclePosition>> {
    let data = json["data"]
        .as_array()
        .ok_or_else(|| TGError::Parse("Missing vehicle data in API response".to_string()))?;

    let vehicles = data
        .iter()
        .filter_map(|v| {
            let route = v["relationships"]["route"]["data"]["id"].as_str()?.to_string();
            Some(VehiclePosition {
                id: v["id"].as_str()?.to_string(),
                lat: v["attributes"]["latitude"].as_f64()?,
                lng: v["attributes"]["longitude"].as_f64()?,
                bearing: v["attributes"]["bearing"].as_f64().unwrap_or(0.0),
                route,
            })
        })
        .collect();

    Ok(vehicles)
}

fn parse_stations(json: &Value) -> Result<Vec<StationInfo>> {
    let data = json["data"]
        .as_array()
        .ok_or_else(|| TGError::Parse("Missing stop data in API response".to_string()))?;

    let stations: Vec<StationInfo> = data
        .iter()
        .filter_map(|stop| {
            let description = stop["attributes"]["description"].as_str().unwrap_or("");
            let route = if description.contains("Red") || description.contains("Mattapan") {
                "Red"
            } else if description.contains("Orange") {
                "Orange"
            } else if description.contains("Blue") {
                "Blue"
            } else {
                "Green"
            };

            Some(StationInfo {
                id: stop["id"].as_str()?.to_string(),
                name: stop["attributes"]["name"].as_str()?.to_string(),
                lat: stop["attributes"]["latitude"].as_f64()?,
                lng: stop["attributes"]["longitude"].as_f64()?,
                routes: vec![route.to_string()],
            })
        })
        .collect();

    if stations.is_empty() {
        return Err(TGError::Parse("No valid stations found in API response".to_string()));
    }

    Ok(stations)
}

// ============================================================================
// Routing Client (Google Directions)
// ============================================================================

/// Where a directions request starts or ends: a place name (biased to
/// Boston) or raw coordinates.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Named(String),
    Coords(LatLng),
}

impl Endpoint {
    fn to_query(&self) -> String {
        match self {
            Endpoint::Named(name) => format!("{}, Boston, MA", name),
            Endpoint::Coords(point) => format!("{},{}", point.lat, point.lng),
        }
    }
}

/// Adapter for the Google Directions transit API. Turns raw responses into
/// ranked itineraries with a plan-time catch confidence baseline.
pub struct RoutingClient {
    http: reqwest::Client,
    api_key: String,
    stations: Vec<StationInfo>,
}

impl RoutingClient {
    pub fn new(api_key: String, stations: Vec<StationInfo>) -> Result<Self> {
        Ok(RoutingClient {
            http: http_client()?,
            api_key,
            stations,
        })
    }

    /// Ranked candidate itineraries, safest first, at most five. An empty or
    /// unsuccessful routing result is a `NoAlternativesFound` failure.
    pub async fn directions(
        &self,
        origin: &Endpoint,
        destination: &Endpoint,
        walking_speed: &str,
    ) -> Result<Vec<Itinerary>> {
        log::info!(
            "directions search ({}): {} -> {}",
            walking_speed,
            origin.to_query(),
            destination.to_query()
        );

        let response = self
            .http
            .get(GOOGLE_BASE_URL)
            .query(&[
                ("origin", origin.to_query().as_str()),
                ("destination", destination.to_query().as_str()),
                ("mode", "transit"),
                ("transit_mode", "subway"),
                ("alternatives", "true"),
                ("key", &self.api_key),
            ])
            .send()
            .await
            .map_err(|e| TGError::Network(format!("Failed to fetch directions: {}", e)))?;

        let body = response
            .text()
            .await
            .map_err(|e| TGError::Network(format!("Failed to read directions response: {}", e)))?;

        let json: Value = serde_json::from_str(&body)
            .map_err(|e| TGError::Parse(format!("Invalid JSON response: {}", e)))?;

        let status = json["status"].as_str().unwrap_or("UNKNOWN");
        if status != "OK" {
            log::warn!("routing service returned status {}", status);
            return Err(TGError::NoAlternativesFound);
        }

        let itineraries = assemble_itineraries(
            &json,
            Utc::now(),
            walking_speed_mps(walking_speed),
            &self.stations,
        )?;

        if itineraries.is_empty() {
            return Err(TGError::NoAlternativesFound);
        }

        Ok(itineraries)
    }
}

impl RouteSource for RoutingClient {
    fn alternatives(
        &self,
        origin: LatLng,
        destination: &str,
        walking_speed: &str,
    ) -> impl Future<Output = Result<Vec<Itinerary>>> + Send {
        let origin = Endpoint::Coords(origin);
        let destination = Endpoint::Named(destination.to_string());
        let walking_speed = walking_speed.to_string();
        async move { self.directions(&origin, &destination, &walking_speed).await }
    }
}

/// Fuzzy station-name lookup: "Park Street" -> "place-pktrm". Essential for
/// live transfer tracking.
fn find_station_id(station_name: &str, stations: &[StationInfo]) -> Option<String> {
    let target = station_name.to_lowercase().replace(" station", "").trim().to_string();

    for station in stations {
        let name = station.name.to_lowercase().replace(" station", "").trim().to_string();
        if name == target {
            return Some(station.id.clone());
        }
        if name.contains(&target) || target.contains(&name) {
            return Some(station.id.clone());
        }
    }

    None
}

/// Build ranked itineraries from a raw directions response: clean steps,
/// plan-time confidence from schedule gaps, decoded overview path, and the
/// display strings the live views need.
fn assemble_itineraries(
    json: &Value,
    now: DateTime<Utc>,
    speed_mps: f64,
    stations: &[StationInfo],
) -> Result<Vec<Itinerary>> {
    let routes = json["routes"]
        .as_array()
        .ok_or_else(|| TGError::Parse("Missing routes in directions response".to_string()))?;

    let mut itineraries = Vec::new();

    for (i, route) in routes.iter().enumerate() {
        let leg = &route["legs"][0];
        let Some(raw_steps) = leg["steps"].as_array() else {
            continue;
        };

        let mut confidence = Confidence::High;
        let mut warning: Option<String> = None;

        let mut total_walk_meters = 0.0;
        let mut first_station_name = "Destination".to_string();
        // Arrival time of the most recent transit leg; zero until the first
        // transit step, which is how walking distance is attributed to the
        // first leg only.
        let mut current_virtual_time: i64 = 0;

        let mut steps: Vec<Step> = Vec::new();
        let mut transit_lines: Vec<String> = Vec::new();

        for raw in raw_steps {
            match raw["travel_mode"].as_str() {
                Some("WALKING") => {
                    let walk_dist = raw["distance"]["value"].as_f64().unwrap_or(0.0);
                    if current_virtual_time == 0 {
                        total_walk_meters += walk_dist;
                    }
                    steps.push(Step::walking(
                        raw["html_instructions"].as_str().unwrap_or("Walk").to_string(),
                    ));
                }
                Some("TRANSIT") => {
                    let details = &raw["transit_details"];
                    let line_name = details["line"]["name"].as_str().unwrap_or("Transit").to_string();
                    let depart_stop = details["departure_stop"]["name"]
                        .as_str()
                        .unwrap_or("Unknown Stop")
                        .to_string();
                    let arrive_stop = details["arrival_stop"]["name"]
                        .as_str()
                        .unwrap_or("Unknown Stop")
                        .to_string();

                    // Google omits explicit times for frequent services;
                    // reconstruct them from the previous arrival and the step
                    // duration.
                    let step_duration = raw["duration"]["value"].as_i64().unwrap_or(0);
                    let departure_ts = details["departure_time"]["value"].as_i64().unwrap_or({
                        if current_virtual_time > 0 {
                            current_virtual_time
                        } else {
                            now.timestamp()
                        }
                    });
                    let arrival_ts = details["arrival_time"]["value"]
                        .as_i64()
                        .unwrap_or(departure_ts + step_duration);

                    let depart_id = find_station_id(&depart_stop, stations);
                    let arrive_id = find_station_id(&arrive_stop, stations);

                    if current_virtual_time == 0 {
                        // First train: can the rider even reach the platform
                        // before departure?
                        first_station_name = depart_stop.clone();
                        let user_walk_seconds = (total_walk_meters / speed_mps) as i64;
                        let user_arrival_ts = now.timestamp() + user_walk_seconds;

                        let time_to_spare = departure_ts - user_arrival_ts;
                        if time_to_spare < 0 {
                            confidence = Confidence::Low;
                            warning = Some("Impossible: Departs before you arrive".to_string());
                        } else if time_to_spare < 90 {
                            confidence = Confidence::Medium;
                            warning = Some("Rush: Catching first train is tight".to_string());
                        }
                    } else {
                        let transfer_gap = departure_ts - current_virtual_time;
                        if transfer_gap < 120 {
                            if confidence != Confidence::Low {
                                confidence = Confidence::Medium;
                                warning = Some(format!("Tight Transfer at {}", depart_stop));
                            }
                            if transfer_gap < 60 {
                                confidence = Confidence::Low;
                                warning = Some(format!("Impossible Transfer at {}", depart_stop));
                            }
                        }
                    }

                    current_virtual_time = arrival_ts;
                    if !transit_lines.contains(&line_name) {
                        transit_lines.push(line_name.clone());
                    }

                    steps.push(Step {
                        instruction: format!("Take <b>{}</b> from {}", line_name, depart_stop),
                        is_transit: true,
                        departure_time: Some(departure_ts),
                        arrival_time: Some(arrival_ts),
                        stop_id: depart_id,
                        dest_stop_id: arrive_id,
                        station_name: Some(depart_stop),
                        line_name: Some(line_name),
                        accessibility_info: None,
                    });
                }
                _ => {
                    steps.push(Step::walking(
                        raw["html_instructions"].as_str().unwrap_or("Continue").to_string(),
                    ));
                }
            }
        }

        let user_walk_seconds = (total_walk_meters / speed_mps) as i64;
        let user_walk_minutes = user_walk_seconds / 60;
        let user_arrival_str = format_timestamp(now.timestamp() + user_walk_seconds);

        let first_train_ts = steps
            .iter()
            .find(|s| s.is_transit)
            .and_then(|s| s.departure_time)
            .unwrap_or(0);
        let train_depart_str = if first_train_ts > 0 {
            format_timestamp(first_train_ts)
        } else {
            "N/A".to_string()
        };

        let summary = if transit_lines.is_empty() {
            "Walking Route".to_string()
        } else {
            format!("Via {}", transit_lines.join(" & "))
        };

        itineraries.push(Itinerary {
            id: i,
            summary,
            duration: leg["duration"]["text"].as_str().unwrap_or("").to_string(),
            time_range: format!("Arr: {}", leg["arrival_time"]["text"].as_str().unwrap_or("N/A")),
            station_eta: format!("Reach {} by {}", first_station_name, user_arrival_str),
            steps,
            path: decode_overview_path(route),
            catch_confidence: confidence,
            warning,
            walk_minutes: format!("{} min walk", user_walk_minutes),
            user_arrival_time: user_arrival_str,
            train_departure_time: train_depart_str,
        });
    }

    // Safest routes first, original ranking as tie-breaker.
    itineraries.sort_by_key(|r| (r.catch_confidence.rank(), r.id));
    itineraries.truncate(5);

    Ok(itineraries)
}

fn decode_overview_path(route: &Value) -> Vec<LatLng> {
    let Some(points) = route["overview_polyline"]["points"].as_str() else {
        return Vec::new();
    };

    match polyline::decode_polyline(points, 5) {
        Ok(line) => line
            .coords()
            .map(|c| LatLng { lat: c.y, lng: c.x })
            .collect(),
        Err(e) => {
            log::warn!("failed to decode route polyline: {}", e);
            Vec::new()
        }
    }
}
