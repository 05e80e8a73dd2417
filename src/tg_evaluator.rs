// Transfer safety evaluation: reconciles the active itinerary against live
// arrival predictions and decides how confident we are in each connection.

use crate::tg_models::{minutes_until, Confidence, Itinerary, Prediction, Result, VehiclePosition};
use std::future::Future;

/// A prediction in a different scheduled run on the same line can look
/// plausible; only match predictions within this window of the scheduled
/// minutes-away.
const MATCH_TOLERANCE_MINUTES: f64 = 15.0;

/// Below this buffer the connection is considered missed.
const MISSED_THRESHOLD_MINUTES: f64 = 1.0;

/// Below this buffer the connection is tight but makeable.
const TIGHT_THRESHOLD_MINUTES: f64 = 5.0;

pub const MISSED_CONNECTION_ADVISORY: &str =
    "Note: The connection has likely been missed. Please find a safe place to stop and check for alternative routes.";

pub const ON_SCHEDULE_ADVISORY: &str =
    "Update: You are on schedule. Proceed at a comfortable pace.";

/// Real-time transit data the evaluator and session consume. The live
/// implementation is an MBTA API client; tests substitute canned data.
pub trait PredictionSource {
    fn predictions_for_stop(
        &self,
        stop_id: &str,
    ) -> impl Future<Output = Result<Vec<Prediction>>> + Send;

    fn vehicles_for_routes(
        &self,
        routes: &[String],
    ) -> impl Future<Output = Result<Vec<VehiclePosition>>> + Send;
}

/// Outcome of one evaluation pass. Confidence and status are always derived
/// together; advisories are pushed to the speech queue by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub confidence: Confidence,
    pub status: String,
    pub advisories: Vec<String>,
}

/// Walk the itinerary's steps in order and derive a fresh confidence level,
/// status text, and the advisories to speak this cycle.
///
/// Each transit step with a stop id gets its predictions fetched one at a
/// time; a missing or failed fetch skips the step without moving confidence
/// either way. `previous` is the confidence shown before this cycle, used
/// only to decide whether the on-schedule reassurance is worth repeating.
/// Once any step classifies as low the rest of the plan is invalid and the
/// walk stops.
pub async fn evaluate<P: PredictionSource>(
    itinerary: &Itinerary,
    now_ms: i64,
    source: &P,
    previous: Confidence,
) -> Evaluation {
    let mut confidence = itinerary.catch_confidence;
    let mut status = "On Schedule".to_string();
    let mut advisories = Vec::new();

    for (i, step) in itinerary.steps.iter().enumerate() {
        if step.is_transit {
            if let (Some(stop_id), Some(departure_time)) = (&step.stop_id, step.departure_time) {
                let predictions = match source.predictions_for_stop(stop_id).await {
                    Ok(predictions) => predictions,
                    Err(e) => {
                        log::warn!("prediction fetch failed for stop {}: {}", stop_id, e);
                        Vec::new()
                    }
                };

                let scheduled_minutes_away = minutes_until(departure_time, now_ms);

                if let Some(target) = closest_prediction(&predictions, scheduled_minutes_away) {
                    let minutes_away = target.minutes;

                    let previous_transit_arrival = if i > 0 && itinerary.steps[i - 1].is_transit {
                        itinerary.steps[i - 1].arrival_time
                    } else {
                        None
                    };

                    let buffer = match previous_transit_arrival {
                        Some(arrival) => minutes_away - minutes_until(arrival, now_ms),
                        None => minutes_away - itinerary.planned_walk_minutes() as f64,
                    };

                    if buffer < MISSED_THRESHOLD_MINUTES {
                        confidence = Confidence::Low;
                        status = "Connection Missed".to_string();
                        advisories.push(MISSED_CONNECTION_ADVISORY.to_string());
                    } else if buffer < TIGHT_THRESHOLD_MINUTES {
                        confidence = Confidence::Medium;
                        status = format!("Tight Connection ({} min)", buffer.floor() as i64);
                        advisories.push(format!(
                            "Advisory: Your train departs in {} minutes. Please proceed directly to the platform.",
                            minutes_away.floor() as i64
                        ));
                    } else {
                        status = format!("On Time: {} min spare", buffer.floor() as i64);
                        if previous != Confidence::High {
                            advisories.push(ON_SCHEDULE_ADVISORY.to_string());
                        }
                    }
                }
            }
        }

        // A missed connection invalidates everything downstream.
        if confidence == Confidence::Low {
            break;
        }
    }

    Evaluation {
        confidence,
        status,
        advisories,
    }
}

/// The prediction whose minutes-away is closest to the scheduled value,
/// rejecting anything outside the match tolerance.
fn closest_prediction(predictions: &[Prediction], scheduled_minutes_away: f64) -> Option<&Prediction> {
    let mut target = None;
    let mut min_diff = f64::INFINITY;

    for prediction in predictions {
        let diff = (prediction.minutes - scheduled_minutes_away).abs();
        if diff < MATCH_TOLERANCE_MINUTES && diff < min_diff {
            min_diff = diff;
            target = Some(prediction);
        }
    }

    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tg_models::Step;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const NOW_MS: i64 = 1_700_000_000_000;
    const NOW_SECS: i64 = 1_700_000_000;

    struct StubSource {
        by_stop: HashMap<String, Vec<Prediction>>,
        fetched: Mutex<Vec<String>>,
        fail: bool,
    }

    impl StubSource {
        fn new(by_stop: Vec<(&str, Vec<f64>)>) -> Self {
            StubSource {
                by_stop: by_stop
                    .into_iter()
                    .map(|(stop, minutes)| {
                        (
                            stop.to_string(),
                            minutes.into_iter().map(prediction).collect(),
                        )
                    })
                    .collect(),
                fetched: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            let mut source = Self::new(vec![]);
            source.fail = true;
            source
        }

        fn fetched_stops(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    impl PredictionSource for StubSource {
        fn predictions_for_stop(
            &self,
            stop_id: &str,
        ) -> impl Future<Output = Result<Vec<Prediction>>> + Send {
            self.fetched.lock().unwrap().push(stop_id.to_string());
            let result = if self.fail {
                Err(crate::tg_models::TGError::Network("stub offline".to_string()))
            } else {
                Ok(self.by_stop.get(stop_id).cloned().unwrap_or_default())
            };
            async move { result }
        }

        fn vehicles_for_routes(
            &self,
            _routes: &[String],
        ) -> impl Future<Output = Result<Vec<VehiclePosition>>> + Send {
            async move { Ok(Vec::new()) }
        }
    }

    fn prediction(minutes: f64) -> Prediction {
        Prediction {
            minutes,
            route: "Red".to_string(),
            destination: "Inbound".to_string(),
            status: "On Time".to_string(),
        }
    }

    fn transit_step(stop_id: Option<&str>, departure: i64, arrival: i64) -> Step {
        Step {
            instruction: "Take Red Line".to_string(),
            is_transit: true,
            departure_time: Some(departure),
            arrival_time: Some(arrival),
            stop_id: stop_id.map(String::from),
            dest_stop_id: None,
            station_name: Some("Park Street".to_string()),
            line_name: Some("Red Line".to_string()),
            accessibility_info: None,
        }
    }

    fn itinerary(steps: Vec<Step>, walk_minutes: &str) -> Itinerary {
        Itinerary {
            id: 0,
            summary: "Via Red Line".to_string(),
            duration: "20 mins".to_string(),
            time_range: String::new(),
            station_eta: String::new(),
            steps,
            path: Vec::new(),
            catch_confidence: Confidence::High,
            warning: None,
            walk_minutes: walk_minutes.to_string(),
            user_arrival_time: String::new(),
            train_departure_time: String::new(),
        }
    }

    #[tokio::test]
    async fn no_predictions_leaves_baseline_and_on_schedule() {
        let steps = vec![
            Step::walking("Walk to Park Street"),
            transit_step(Some("place-pktrm"), NOW_SECS + 300, NOW_SECS + 900),
        ];
        let itinerary = itinerary(steps, "5 min walk");
        let source = StubSource::new(vec![]);

        let eval = evaluate(&itinerary, NOW_MS, &source, Confidence::High).await;

        assert_eq!(eval.confidence, Confidence::High);
        assert_eq!(eval.status, "On Schedule");
        assert!(eval.advisories.is_empty());
        assert_eq!(source.fetched_stops(), vec!["place-pktrm"]);
    }

    #[tokio::test]
    async fn fetch_failure_degrades_gracefully() {
        let steps = vec![transit_step(Some("place-pktrm"), NOW_SECS + 300, NOW_SECS + 900)];
        let itinerary = itinerary(steps, "0 min walk");
        let source = StubSource::failing();

        let eval = evaluate(&itinerary, NOW_MS, &source, Confidence::High).await;

        assert_eq!(eval.confidence, Confidence::High);
        assert_eq!(eval.status, "On Schedule");
    }

    #[tokio::test]
    async fn low_confidence_halts_evaluation_of_later_steps() {
        // Scheduled 2 minutes out, prediction matches, but the rider needs a
        // 5 minute walk: buffer = 2 - 5 < 1.
        let steps = vec![
            Step::walking("Walk to Park Street"),
            transit_step(Some("place-pktrm"), NOW_SECS + 120, NOW_SECS + 600),
            transit_step(Some("place-dwnxg"), NOW_SECS + 720, NOW_SECS + 1200),
        ];
        let itinerary = itinerary(steps, "5 min walk");
        let source = StubSource::new(vec![("place-pktrm", vec![2.0]), ("place-dwnxg", vec![12.0])]);

        let eval = evaluate(&itinerary, NOW_MS, &source, Confidence::High).await;

        assert_eq!(eval.confidence, Confidence::Low);
        assert_eq!(eval.status, "Connection Missed");
        assert_eq!(eval.advisories, vec![MISSED_CONNECTION_ADVISORY.to_string()]);
        // Second stop never fetched.
        assert_eq!(source.fetched_stops(), vec!["place-pktrm"]);
    }

    #[tokio::test]
    async fn buffer_of_exactly_one_minute_is_medium_not_low() {
        // Prediction 6 minutes out, planned walk 5 minutes: buffer = 1.0.
        let steps = vec![
            Step::walking("Walk to Park Street"),
            transit_step(Some("place-pktrm"), NOW_SECS + 360, NOW_SECS + 900),
        ];
        let itinerary = itinerary(steps, "5 min walk");
        let source = StubSource::new(vec![("place-pktrm", vec![6.0])]);

        let eval = evaluate(&itinerary, NOW_MS, &source, Confidence::High).await;

        assert_eq!(eval.confidence, Confidence::Medium);
        assert_eq!(eval.status, "Tight Connection (1 min)");
        assert_eq!(
            eval.advisories,
            vec!["Advisory: Your train departs in 6 minutes. Please proceed directly to the platform.".to_string()]
        );
    }

    #[tokio::test]
    async fn buffer_of_exactly_five_minutes_is_on_time_not_medium() {
        // Prediction 10 minutes out, planned walk 5 minutes: buffer = 5.0.
        let steps = vec![
            Step::walking("Walk to Park Street"),
            transit_step(Some("place-pktrm"), NOW_SECS + 600, NOW_SECS + 1200),
        ];
        let itinerary = itinerary(steps, "5 min walk");
        let source = StubSource::new(vec![("place-pktrm", vec![10.0])]);

        let eval = evaluate(&itinerary, NOW_MS, &source, Confidence::High).await;

        assert_eq!(eval.confidence, Confidence::High);
        assert_eq!(eval.status, "On Time: 5 min spare");
        assert!(eval.advisories.is_empty());
    }

    #[tokio::test]
    async fn reassurance_spoken_only_when_recovering_from_non_high() {
        let steps = vec![
            Step::walking("Walk to Park Street"),
            transit_step(Some("place-pktrm"), NOW_SECS + 600, NOW_SECS + 1200),
        ];
        let itinerary = itinerary(steps, "2 min walk");
        let source = StubSource::new(vec![("place-pktrm", vec![10.0])]);

        let recovering = evaluate(&itinerary, NOW_MS, &source, Confidence::Medium).await;
        assert_eq!(recovering.advisories, vec![ON_SCHEDULE_ADVISORY.to_string()]);

        let steady = evaluate(&itinerary, NOW_MS, &source, Confidence::High).await;
        assert!(steady.advisories.is_empty());
    }

    #[tokio::test]
    async fn prediction_outside_tolerance_is_ignored() {
        // Scheduled departure 30 minutes out; the only prediction is 2
        // minutes away. Diff of 28 exceeds the 15 minute tolerance, so the
        // step is skipped and the baseline stands.
        let steps = vec![transit_step(Some("place-pktrm"), NOW_SECS + 1800, NOW_SECS + 2400)];
        let itinerary = itinerary(steps, "0 min walk");
        let source = StubSource::new(vec![("place-pktrm", vec![2.0])]);

        let eval = evaluate(&itinerary, NOW_MS, &source, Confidence::High).await;

        assert_eq!(eval.confidence, Confidence::High);
        assert_eq!(eval.status, "On Schedule");
    }

    #[tokio::test]
    async fn transit_step_without_stop_id_is_informational() {
        let steps = vec![transit_step(None, NOW_SECS + 120, NOW_SECS + 600)];
        let itinerary = itinerary(steps, "9 min walk");
        let source = StubSource::new(vec![]);

        let eval = evaluate(&itinerary, NOW_MS, &source, Confidence::High).await;

        assert_eq!(eval.confidence, Confidence::High);
        assert!(source.fetched_stops().is_empty());
    }

    #[tokio::test]
    async fn transfer_buffer_uses_previous_transit_legs_arrival() {
        // Walk 5 min, first leg arrives NOW+30s, second leg departs NOW+2min.
        // No predictions for the first stop, so the walk branch never fires
        // there. At the second stop the prediction is 1 minute away and the
        // rider arrives in 0.5 minutes: buffer = 1 - 0.5 = 0.5 -> missed.
        let steps = vec![
            Step::walking("Walk to Park Street"),
            transit_step(Some("place-pktrm"), NOW_SECS - 600, NOW_SECS + 30),
            transit_step(Some("place-dwnxg"), NOW_SECS + 120, NOW_SECS + 900),
        ];
        let itinerary = itinerary(steps, "5 min walk");
        let source = StubSource::new(vec![("place-dwnxg", vec![1.0])]);

        let eval = evaluate(&itinerary, NOW_MS, &source, Confidence::High).await;

        assert_eq!(eval.confidence, Confidence::Low);
        assert_eq!(eval.status, "Connection Missed");
    }

    #[tokio::test]
    async fn transfer_buffer_recovers_when_previous_leg_already_arrived() {
        // Previous leg arrived a minute ago: minutes-until is -1, so a train
        // 1 minute away still leaves a 2 minute buffer -> tight, not missed.
        let steps = vec![
            transit_step(Some("place-pktrm"), NOW_SECS - 600, NOW_SECS - 60),
            transit_step(Some("place-dwnxg"), NOW_SECS + 120, NOW_SECS + 900),
        ];
        let itinerary = itinerary(steps, "5 min walk");
        let source = StubSource::new(vec![("place-dwnxg", vec![1.0])]);

        let eval = evaluate(&itinerary, NOW_MS, &source, Confidence::High).await;

        assert_eq!(eval.confidence, Confidence::Medium);
        assert_eq!(eval.status, "Tight Connection (2 min)");
    }

    #[tokio::test]
    async fn closest_prediction_prefers_nearest_match() {
        let predictions = vec![prediction(3.0), prediction(9.0), prediction(20.0)];
        let target = closest_prediction(&predictions, 8.0).unwrap();
        assert_eq!(target.minutes, 9.0);
        assert!(closest_prediction(&predictions, 40.0).is_none());
    }
}
