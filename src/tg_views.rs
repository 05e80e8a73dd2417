// Views for the MBTA Transfer Guardian application
use crate::tg_models::{strip_html, Confidence, Itinerary};
use crate::tg_session::SessionSnapshot;
use std::io::{self, Write};

pub struct TGViews;

impl TGViews {
    /// Show welcome screen
    pub fn show_welcome_screen() {
        println!("\n{}", "═".repeat(70));
        println!("  ╔═══════════════════════════════════════════════════════════╗");
        println!("  ║        🚇 MBTA TRANSFER GUARDIAN - BOSTON SUBWAY          ║");
        println!("  ║               Live Transfer Safety Assistant              ║");
        println!("  ╚═══════════════════════════════════════════════════════════╝");
        println!("{}", "═".repeat(70));
        println!("\n  📡 Features:");
        println!("     • Ranked subway itineraries with catch confidence");
        println!("     • Live transfer safety tracking every 10 seconds");
        println!("     • Spoken advisories when a connection tightens");
        println!("     • One-key rerouting when a connection is missed");
        println!("\n  🌐 Data sources: MBTA v3 API + Google Directions");
        println!("     https://www.mbta.com/");
        println!("\n{}", "═".repeat(70));
    }

    /// Prompt for a destination with examples
    pub fn prompt_destination() {
        print!("\n📍 Enter your destination\n");
        print!("   Examples: 'South Station', 'Harvard Square', 'Airport'\n");
        print!("➜ Destination: ");
        let _ = io::stdout().flush();
    }

    /// Prompt for an origin with examples
    pub fn prompt_origin() {
        print!("\n🏠 Enter your starting point\n");
        print!("   Examples: 'Park Street', 'Kenmore', 'North Station'\n");
        print!("➜ Origin: ");
        let _ = io::stdout().flush();
    }

    /// Show the ranked candidate itineraries
    pub fn show_routes(itineraries: &[Itinerary]) {
        println!("\n{}", "═".repeat(70));
        println!("🗺️  CANDIDATE ROUTES ({} found, safest first)", itineraries.len());
        println!("{}", "═".repeat(70));

        for (i, itinerary) in itineraries.iter().enumerate() {
            println!(
                "\n  {}. {} {} — {}",
                i + 1,
                itinerary.catch_confidence.glyph(),
                itinerary.summary,
                itinerary.duration
            );
            println!("     🕐 {}", itinerary.time_range);
            println!("     🚶 {} | {}", itinerary.walk_minutes, itinerary.station_eta);
            println!(
                "     🚇 First train departs {} (you arrive {})",
                itinerary.train_departure_time, itinerary.user_arrival_time
            );

            if let Some(warning) = &itinerary.warning {
                println!("     ⚠️  {}", warning);
            }

            if i < itineraries.len() - 1 {
                println!("{}", "  ┄".repeat(35));
            }
        }

        println!("\n{}", "═".repeat(70));
    }

    /// Show the steps of one itinerary
    pub fn show_steps(itinerary: &Itinerary) {
        println!("\n{}", "─".repeat(70));
        println!("📋 STEPS — {}", itinerary.summary);
        println!("{}", "─".repeat(70));

        for (i, step) in itinerary.steps.iter().enumerate() {
            let icon = if step.is_transit { "🚇" } else { "🚶" };
            println!("  {}. {} {}", i + 1, icon, strip_html(&step.instruction));
        }

        println!("{}", "─".repeat(70));
    }

    /// Render one frame of the live display
    pub fn show_live_status(snapshot: &SessionSnapshot, refresh_count: u32) {
        let Some(itinerary) = &snapshot.itinerary else {
            println!("\n✗ No active navigation session");
            return;
        };

        println!("\n{}", "═".repeat(70));
        println!("🧭 LIVE NAVIGATION - Update #{}", refresh_count);
        println!("{}", "═".repeat(70));
        println!("\n  🗺️  Route: {} — {}", itinerary.summary, itinerary.duration);
        println!(
            "  {} Confidence: {} | Status: {}",
            snapshot.confidence.glyph(),
            snapshot.confidence.label().to_uppercase(),
            snapshot.status
        );

        if snapshot.is_rerouting {
            println!("  🔄 Searching for alternative routes...");
        }

        println!("\n  📋 Plan:");
        for step in &itinerary.steps {
            let icon = if step.is_transit { "🚇" } else { "🚶" };
            println!("     {} {}", icon, strip_html(&step.instruction));
        }

        if !snapshot.vehicles.is_empty() {
            println!("\n  🚆 Trains on your lines ({}):", snapshot.vehicles.len());
            for vehicle in snapshot.vehicles.iter().take(8) {
                println!(
                    "     {} {} {} ({:.4}, {:.4})",
                    Self::bearing_arrow(vehicle.bearing),
                    vehicle.route,
                    vehicle.id,
                    vehicle.lat,
                    vehicle.lng
                );
            }
            if snapshot.vehicles.len() > 8 {
                println!("     ... and {} more", snapshot.vehicles.len() - 8);
            }
        }

        println!("\n{}", "─".repeat(70));
        if snapshot.confidence == Confidence::Low {
            println!("🔴 Connection at risk! Press 'r' + Enter to search for alternatives");
        }
        println!("⏱️  Refreshes every 10 seconds | 'r' = reroute | Enter = end session");
        println!("{}", "─".repeat(70));
    }

    /// Show the reroute alternatives for selection
    pub fn show_alternatives(alternatives: &[Itinerary]) {
        println!("\n{}", "═".repeat(70));
        println!("🔀 ALTERNATIVE ROUTES ({} found)", alternatives.len());
        println!("{}", "═".repeat(70));

        for (i, itinerary) in alternatives.iter().enumerate() {
            println!(
                "\n  {}. {} {} — {}",
                i + 1,
                itinerary.catch_confidence.glyph(),
                itinerary.summary,
                itinerary.duration
            );
            println!("     🕐 {} | {}", itinerary.time_range, itinerary.walk_minutes);
            if let Some(warning) = &itinerary.warning {
                println!("     ⚠️  {}", warning);
            }
        }

        println!("\n{}", "─".repeat(70));
        print!("➜ Select a route (1-{}), or Enter to keep the current one: ", alternatives.len());
        let _ = io::stdout().flush();
    }

    pub fn no_routes_found(destination: &str) {
        println!("\n{}", "─".repeat(60));
        println!("✗ No subway routes found to '{}'", destination);
        println!("\n💡 Tips:");
        println!("  • Check the spelling of the destination");
        println!("  • Try a nearby landmark or station name");
        println!("  • The trip may not be possible by subway right now");
        println!("{}", "─".repeat(60));
    }

    /// Network error message
    pub fn network_error(error: &str) {
        println!("\n{}", "═".repeat(60));
        println!("❌ NETWORK ERROR");
        println!("{}", "═".repeat(60));
        println!("\n{}", error);
        println!("\n💡 Troubleshooting:");
        println!("  • Check your internet connection");
        println!("  • The MBTA or Google APIs might be temporarily unavailable");
        println!("  • Try again in a few moments");
        println!("\n{}", "═".repeat(60));
    }

    pub fn location_fallback_notice() {
        println!("\n⚠️  Could not determine your position; using downtown Boston.");
        println!("   Set TG_ORIGIN_LAT and TG_ORIGIN_LNG to reroute from your real location.");
    }

    /// Loading indicator
    pub fn show_loading(message: &str) {
        print!("\r🔄 {}...", message);
        let _ = io::stdout().flush();
    }

    pub fn clear_loading() {
        print!("\r{}\r", " ".repeat(60));
        let _ = io::stdout().flush();
    }

    pub fn goodbye_message() {
        println!("\n{}", "═".repeat(60));
        println!("       👋 Thank you for riding with Transfer Guardian!");
        println!("            Safe travels on the T");
        println!("{}", "═".repeat(60));
        println!();
    }

    /// Compass arrow for a vehicle bearing in degrees
    fn bearing_arrow(bearing: f64) -> &'static str {
        let normalized = bearing.rem_euclid(360.0);
        match (normalized / 45.0).round() as u32 % 8 {
            0 => "⬆️",
            1 => "↗️",
            2 => "➡️",
            3 => "↘️",
            4 => "⬇️",
            5 => "↙️",
            6 => "⬅️",
            _ => "↖️",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearing_arrow_covers_the_compass() {
        assert_eq!(TGViews::bearing_arrow(0.0), "⬆️");
        assert_eq!(TGViews::bearing_arrow(90.0), "➡️");
        assert_eq!(TGViews::bearing_arrow(180.0), "⬇️");
        assert_eq!(TGViews::bearing_arrow(270.0), "⬅️");
        assert_eq!(TGViews::bearing_arrow(359.0), "⬆️");
        assert_eq!(TGViews::bearing_arrow(-90.0), "⬅️");
    }
}
