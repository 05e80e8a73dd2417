// Controllers for the MBTA Transfer Guardian application
use crate::tg_api::{ApiConfig, Endpoint, PredictionClient, RoutingClient};
use crate::tg_models::{LatLng, Result, TGError, DEFAULT_LOCATION};
use crate::tg_session::{LiveSession, POLL_INTERVAL_SECS};
use crate::tg_speech::{ConsoleSpeaker, ElevenLabsSpeaker, SpeechQueue};
use crate::tg_views::TGViews;
use clap::Parser;
use std::io::{self, Write};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "tg", about = "Live transfer safety assistant for the Boston subway", version)]
pub struct CliArgs {
    /// Starting point, e.g. "Park Street"
    pub origin: Option<String>,

    /// Destination, e.g. "South Station"
    pub destination: Option<String>,

    /// Walking speed profile: slow, normal, or fast
    #[arg(long, default_value = "normal")]
    pub walking_speed: String,

    /// Print advisories instead of speaking them
    #[arg(long)]
    pub no_speech: bool,
}

pub struct TGControllers;

impl TGControllers {
    /// Main application flow: plan a trip, then guard it live.
    pub async fn run(args: CliArgs) -> Result<()> {
        TGViews::show_welcome_screen();

        let config = ApiConfig::from_env();
        let Some(google_key) = config.google_key.clone() else {
            return Err(TGError::Config(
                "GOOGLE_DIRECTIONS_API_KEY is not set. Add it to your environment or .env file."
                    .to_string(),
            ));
        };

        let stdin = Self::stdin_channel();

        println!("\n🔄 Loading station directory...");
        let predictions = Arc::new(PredictionClient::new(config.mbta_key.clone())?);
        let stations = match predictions.stations().await {
            Ok(stations) => {
                println!("✓ Station directory ready ({} stations)", stations.len());
                stations
            }
            Err(e) => {
                TGViews::network_error(&e.to_string());
                return Err(e);
            }
        };

        let routes = Arc::new(RoutingClient::new(google_key, stations)?);

        let speech = match config.elevenlabs_key.clone() {
            Some(key) if !args.no_speech => SpeechQueue::start(ElevenLabsSpeaker::new(key)?),
            _ => {
                if !args.no_speech {
                    println!("\nℹ️  No ELEVENLABS_API_KEY set; advisories will be printed, not spoken.");
                }
                SpeechQueue::start(ConsoleSpeaker)
            }
        };

        let origin = match &args.origin {
            Some(origin) => origin.clone(),
            None => {
                TGViews::prompt_origin();
                Self::read_input(&stdin)
            }
        };
        let destination = match &args.destination {
            Some(destination) => destination.clone(),
            None => {
                TGViews::prompt_destination();
                Self::read_input(&stdin)
            }
        };

        if origin.is_empty() || destination.is_empty() {
            println!("\n⚠️  Both an origin and a destination are required.");
            return Ok(());
        }

        TGViews::show_loading("Searching for routes");
        let itineraries = match routes
            .directions(
                &Endpoint::Named(origin.clone()),
                &Endpoint::Named(destination.clone()),
                &args.walking_speed,
            )
            .await
        {
            Ok(itineraries) => {
                TGViews::clear_loading();
                itineraries
            }
            Err(TGError::NoAlternativesFound) => {
                TGViews::clear_loading();
                TGViews::no_routes_found(&destination);
                return Ok(());
            }
            Err(e) => {
                TGViews::clear_loading();
                TGViews::network_error(&e.to_string());
                return Err(e);
            }
        };

        TGViews::show_routes(&itineraries);

        print!("\n➜ Select a route (1-{}), or Enter to quit: ", itineraries.len());
        let _ = io::stdout().flush();
        let choice = Self::read_input(&stdin);
        let Some(index) = Self::parse_selection(&choice, itineraries.len()) else {
            TGViews::goodbye_message();
            return Ok(());
        };

        let itinerary = itineraries[index].clone();
        TGViews::show_steps(&itinerary);

        let session = LiveSession::new(predictions, routes, speech);
        session
            .start_session(itinerary, &destination, &args.walking_speed)
            .await;

        Self::live_loop(&session, &stdin).await;

        TGViews::goodbye_message();
        Ok(())
    }

    /// Render the live display every poll cycle until the rider exits,
    /// handling reroute requests in between.
    async fn live_loop(
        session: &LiveSession<PredictionClient, RoutingClient>,
        stdin: &Receiver<String>,
    ) {
        let mut refresh_count = 0;
        let mut location_warned = false;

        loop {
            refresh_count += 1;
            Self::clear_screen();

            let snapshot = session.snapshot().await;
            TGViews::show_live_status(&snapshot, refresh_count);

            match Self::wait_for_input_or_timeout(stdin, POLL_INTERVAL_SECS) {
                None => {} // Timeout; redraw with fresh state.
                Some(cmd) if cmd.eq_ignore_ascii_case("r") => {
                    Self::handle_reroute(session, stdin, &mut location_warned).await;
                }
                Some(_) => {
                    session.end_session().await;
                    println!("\n👋 Ending navigation session...");
                    return;
                }
            }
        }
    }

    /// Search for alternatives from the rider's position and let them pick one.
    async fn handle_reroute(
        session: &LiveSession<PredictionClient, RoutingClient>,
        stdin: &Receiver<String>,
        location_warned: &mut bool,
    ) {
        let origin = Self::rider_location(location_warned);

        TGViews::show_loading("Searching for alternative routes");
        match session.request_reroute(origin).await {
            Ok(_) => {
                TGViews::clear_loading();
            }
            Err(TGError::NoAlternativesFound) => {
                TGViews::clear_loading();
                println!("\n✗ No alternative routes available right now.");
                Self::pause(stdin);
                return;
            }
            Err(e) => {
                TGViews::clear_loading();
                TGViews::network_error(&e.to_string());
                Self::pause(stdin);
                return;
            }
        }

        let snapshot = session.snapshot().await;
        TGViews::show_alternatives(&snapshot.alternatives);

        let choice = Self::read_input(stdin);
        match Self::parse_selection(&choice, snapshot.alternatives.len()) {
            Some(index) => {
                if let Err(e) = session.select_alternative(index).await {
                    println!("\n✗ {}", e);
                } else {
                    println!("\n✓ Switched to the new route");
                }
            }
            None => println!("\n✓ Keeping the current route"),
        }
    }

    /// The rider's position: an env override when present, otherwise the
    /// downtown default with a one-time notice.
    fn rider_location(warned: &mut bool) -> LatLng {
        match Self::env_location() {
            Ok(location) => location,
            Err(e) => {
                if !*warned {
                    log::warn!("{}", e);
                    TGViews::location_fallback_notice();
                    *warned = true;
                }
                DEFAULT_LOCATION
            }
        }
    }

    fn env_location() -> Result<LatLng> {
        let lat = std::env::var("TG_ORIGIN_LAT").map_err(|_| {
            TGError::PermissionDenied(
                "location access not granted (set TG_ORIGIN_LAT and TG_ORIGIN_LNG)".to_string(),
            )
        })?;
        let lng = std::env::var("TG_ORIGIN_LNG").map_err(|_| {
            TGError::PermissionDenied(
                "location access not granted (set TG_ORIGIN_LAT and TG_ORIGIN_LNG)".to_string(),
            )
        })?;

        Ok(LatLng {
            lat: lat
                .parse::<f64>()
                .map_err(|e| TGError::Parse(format!("Invalid TG_ORIGIN_LAT: {}", e)))?,
            lng: lng
                .parse::<f64>()
                .map_err(|e| TGError::Parse(format!("Invalid TG_ORIGIN_LNG: {}", e)))?,
        })
    }

    /// All stdin goes through one reader thread so the live loop can wait
    /// with a timeout without orphaning readers.
    fn stdin_channel() -> Receiver<String> {
        let (tx, rx) = channel();
        thread::spawn(move || {
            let mut line = String::new();
            loop {
                line.clear();
                if io::stdin().read_line(&mut line).is_err() {
                    break;
                }
                if tx.send(line.trim().to_string()).is_err() {
                    break;
                }
            }
        });
        rx
    }

    /// Blocking read of the next input line.
    fn read_input(stdin: &Receiver<String>) -> String {
        stdin.recv().unwrap_or_default()
    }

    /// Wait up to `seconds` for a line of input.
    fn wait_for_input_or_timeout(stdin: &Receiver<String>, seconds: u64) -> Option<String> {
        stdin.recv_timeout(Duration::from_secs(seconds)).ok()
    }

    /// Simple pause - wait for Enter key
    fn pause(stdin: &Receiver<String>) {
        print!("\n📌 Press Enter to continue...");
        let _ = io::stdout().flush();
        let _ = stdin.recv();
    }

    /// One-based menu selection -> zero-based index, when in range.
    fn parse_selection(input: &str, len: usize) -> Option<usize> {
        match input.trim().parse::<usize>() {
            Ok(num) if num > 0 && num <= len => Some(num - 1),
            _ => None,
        }
    }

    /// Clear screen (cross-platform)
    fn clear_screen() {
        // ANSI escape sequence to clear screen and move cursor to top-left
        print!("\x1B[2J\x1B[1;1H");
        let _ = io::stdout().flush();
    }
}
