// Live navigation session: owns the active itinerary and its current safety
// assessment, drives the periodic evaluation ticker, and coordinates
// rerouting when a connection falls apart.

use crate::tg_evaluator::{evaluate, PredictionSource};
use crate::tg_models::{
    strip_html, Confidence, Itinerary, LatLng, Result, TGError, VehiclePosition,
};
use crate::tg_speech::SpeechQueue;
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Seconds between live evaluation cycles.
pub const POLL_INTERVAL_SECS: u64 = 10;

/// Supplies alternative itineraries during a reroute. The live implementation
/// is the Google Directions client; tests substitute canned routes.
pub trait RouteSource: Send + Sync + 'static {
    fn alternatives(
        &self,
        origin: LatLng,
        destination: &str,
        walking_speed: &str,
    ) -> impl Future<Output = Result<Vec<Itinerary>>> + Send;
}

/// Everything the views need to render one frame of the live display.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub itinerary: Option<Itinerary>,
    pub confidence: Confidence,
    pub status: String,
    pub vehicles: Vec<VehiclePosition>,
    pub alternatives: Vec<Itinerary>,
    pub is_rerouting: bool,
}

struct SessionState {
    // Identifies the active session so a cycle that raced an end/restart can
    // discard its write-back instead of resurrecting stale state.
    session_id: Option<Uuid>,
    itinerary: Option<Itinerary>,
    confidence: Confidence,
    status: String,
    vehicles: Vec<VehiclePosition>,
    alternatives: Vec<Itinerary>,
    is_rerouting: bool,
    destination: String,
    walking_speed: String,
}

impl SessionState {
    fn new() -> Self {
        SessionState {
            session_id: None,
            itinerary: None,
            confidence: Confidence::High,
            status: "On Schedule".to_string(),
            vehicles: Vec::new(),
            alternatives: Vec::new(),
            is_rerouting: false,
            destination: String::new(),
            walking_speed: "normal".to_string(),
        }
    }
}

/// Handle to a live navigation session. Cloneable; all clones share the same
/// state, prediction source, and speech queue.
pub struct LiveSession<P, R> {
    state: Arc<tokio::sync::Mutex<SessionState>>,
    predictions: Arc<P>,
    routes: Arc<R>,
    speech: SpeechQueue,
    ticker: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl<P, R> Clone for LiveSession<P, R> {
    fn clone(&self) -> Self {
        LiveSession {
            state: self.state.clone(),
            predictions: self.predictions.clone(),
            routes: self.routes.clone(),
            speech: self.speech.clone(),
            ticker: self.ticker.clone(),
        }
    }
}

impl<P, R> LiveSession<P, R>
where
    P: PredictionSource + Send + Sync + 'static,
    R: RouteSource,
{
    pub fn new(predictions: Arc<P>, routes: Arc<R>, speech: SpeechQueue) -> Self {
        LiveSession {
            state: Arc::new(tokio::sync::Mutex::new(SessionState::new())),
            predictions,
            routes,
            speech,
            ticker: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Activate an itinerary: speak the briefing, run one evaluation
    /// immediately, then poll every cycle until the session ends.
    pub async fn start_session(&self, itinerary: Itinerary, destination: &str, walking_speed: &str) {
        self.abort_ticker();

        let briefing_text = briefing(&itinerary, destination);
        {
            let mut state = self.state.lock().await;
            state.session_id = Some(Uuid::new_v4());
            state.confidence = itinerary.catch_confidence;
            state.status = "On Schedule".to_string();
            state.itinerary = Some(itinerary);
            state.vehicles.clear();
            state.alternatives.clear();
            state.is_rerouting = false;
            state.destination = destination.to_string();
            state.walking_speed = walking_speed.to_string();
        }

        self.speech.enqueue(&briefing_text);
        self.evaluate_cycle().await;
        self.spawn_ticker();
    }

    /// Tear the session down: stop polling, drop all live state, and forget
    /// the speech dedup memory so a new session starts fresh.
    pub async fn end_session(&self) {
        self.abort_ticker();

        let mut state = self.state.lock().await;
        *state = SessionState::new();
        drop(state);

        self.speech.reset();
        log::info!("live session ended");
    }

    /// Swap the active itinerary for one of the stored alternatives and
    /// restart evaluation from its plan-time baseline.
    pub async fn select_alternative(&self, index: usize) -> Result<()> {
        let (alternative, destination, walking_speed) = {
            let state = self.state.lock().await;
            let alternative = state.alternatives.get(index).cloned().ok_or_else(|| {
                TGError::Config(format!("No alternative route at position {}", index + 1))
            })?;
            (alternative, state.destination.clone(), state.walking_speed.clone())
        };

        self.speech.reset();
        self.start_session(alternative, &destination, &walking_speed).await;
        Ok(())
    }

    /// Ask the route source for fresh alternatives from the rider's current
    /// position. Failure leaves the active itinerary and its confidence
    /// untouched; success stores the candidates and announces the count.
    pub async fn request_reroute(&self, origin: LatLng) -> Result<usize> {
        let (destination, walking_speed) = {
            let mut state = self.state.lock().await;
            if state.itinerary.is_none() {
                return Err(TGError::Config("No active session to reroute".to_string()));
            }
            state.is_rerouting = true;
            (state.destination.clone(), state.walking_speed.clone())
        };

        let result = self
            .routes
            .alternatives(origin, &destination, &walking_speed)
            .await;

        let mut state = self.state.lock().await;
        state.is_rerouting = false;

        match result {
            Ok(alternatives) if alternatives.is_empty() => Err(TGError::NoAlternativesFound),
            Ok(alternatives) => {
                let count = alternatives.len();
                state.alternatives = alternatives;
                drop(state);
                self.speech.enqueue(&format!("Found {} alternative routes.", count));
                Ok(count)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            itinerary: state.itinerary.clone(),
            confidence: state.confidence,
            status: state.status.clone(),
            vehicles: state.vehicles.clone(),
            alternatives: state.alternatives.clone(),
            is_rerouting: state.is_rerouting,
        }
    }

    /// One full evaluation pass: transfer safety plus a vehicle refresh,
    /// written back only if the session is still the one we started with.
    async fn evaluate_cycle(&self) {
        let (session_id, itinerary, previous) = {
            let state = self.state.lock().await;
            let (Some(id), Some(itinerary)) = (state.session_id, state.itinerary.clone()) else {
                return;
            };
            (id, itinerary, state.confidence)
        };

        let now_ms = Utc::now().timestamp_millis();
        let evaluation = evaluate(&itinerary, now_ms, &*self.predictions, previous).await;

        let vehicles = match self
            .predictions
            .vehicles_for_routes(&itinerary.lines_to_track())
            .await
        {
            Ok(vehicles) => Some(vehicles),
            Err(e) => {
                log::warn!("vehicle fetch failed: {}", e);
                None
            }
        };

        {
            let mut state = self.state.lock().await;
            if state.session_id != Some(session_id) {
                return;
            }
            state.confidence = evaluation.confidence;
            state.status = evaluation.status;
            if let Some(vehicles) = vehicles {
                state.vehicles = vehicles;
            }
        }

        for advisory in &evaluation.advisories {
            self.speech.enqueue(advisory);
        }
    }

    fn spawn_ticker(&self) {
        let session = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(POLL_INTERVAL_SECS));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately and the initial evaluation
            // already ran, so consume it before polling.
            interval.tick().await;
            loop {
                interval.tick().await;
                session.evaluate_cycle().await;
            }
        });

        let mut ticker = self.ticker.lock().expect("ticker lock poisoned");
        if let Some(old) = ticker.replace(handle) {
            old.abort();
        }
    }

    fn abort_ticker(&self) {
        let mut ticker = self.ticker.lock().expect("ticker lock poisoned");
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
    }
}

/// Spoken overview of a freshly activated itinerary: destination, the first
/// walk, each train to board, and how comfortable the plan is.
fn briefing(itinerary: &Itinerary, destination: &str) -> String {
    let mut parts = vec![format!("Starting navigation to {}.", destination)];

    if let Some(walk) = itinerary.steps.iter().find(|s| !s.is_transit) {
        parts.push(format!("First, {}.", strip_html(&walk.instruction)));
    }

    for step in itinerary.steps.iter().filter(|s| s.is_transit) {
        parts.push(format!("Then, {}.", strip_html(&step.instruction)));
        if let Some(note) = &step.accessibility_info {
            parts.push(note.clone());
        }
    }

    match itinerary.catch_confidence {
        Confidence::High => parts.push("You have a comfortable connection. Let's go.".to_string()),
        _ => parts.push("Your first connection is tight, so move briskly.".to_string()),
    }

    parts.join(" ")
}
