//! `stayctl`: run booking-engine operations against a JSON state file.
//!
//! ## Usage
//!
//! ```sh
//! # Can property 1 be booked for these dates, and for how much?
//! stayctl --state state.json check --property 1 --check-in 2024-06-05 --check-out 2024-06-07
//!
//! # Search free properties in a city
//! stayctl --state state.json search --check-in 2024-06-05 --check-out 2024-06-07 --city lisbon
//!
//! # Request a booking, then accept it as the host
//! stayctl --state state.json book --property 1 --guest 20 --check-in 2024-06-05 --check-out 2024-06-07 --guests 2
//! stayctl --state state.json confirm --booking 1 --owner 10
//!
//! # Re-import external calendars (all active, one feed, or one property)
//! stayctl --state state.json sync
//! stayctl --state state.json sync --sync-id 3
//! stayctl --state state.json sync --property 1
//! ```
//!
//! Results are printed as JSON on stdout. Commands that change state write
//! the state file back. Logs go to stderr; set `STAY_LOG=debug` (or `RUST_LOG`)
//! for detail.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use stay_engine::{
    BookingId, BookingRequest, EngineConfig, EngineSnapshot, FeedClient, Money, PropertyId,
    SearchFilters, SyncId, UserId,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stayctl",
    version,
    about = "Availability, booking and calendar-sync operations for short-term rentals"
)]
struct Cli {
    /// JSON state file (properties, bookings, calendar, syncs)
    #[arg(short, long, global = true, default_value = "state.json")]
    state: PathBuf,

    /// TOML engine configuration (defaults are used if omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a stay is available and quote its price
    Check {
        #[arg(long)]
        property: u64,
        #[arg(long)]
        check_in: NaiveDate,
        #[arg(long)]
        check_out: NaiveDate,
    },
    /// List published properties free for the whole stay
    Search {
        #[arg(long)]
        check_in: NaiveDate,
        #[arg(long)]
        check_out: NaiveDate,
        /// Case-insensitive part of the city name
        #[arg(long)]
        city: Option<String>,
        /// Highest nightly base price, e.g. 120 or 99.50
        #[arg(long, value_parser = parse_money)]
        max_price: Option<Money>,
        #[arg(long)]
        property_type: Option<String>,
        #[arg(long)]
        min_bedrooms: Option<u32>,
        #[arg(long)]
        min_guests: Option<u32>,
    },
    /// Request a booking as a guest
    Book {
        #[arg(long)]
        property: u64,
        #[arg(long)]
        guest: u64,
        #[arg(long)]
        check_in: NaiveDate,
        #[arg(long)]
        check_out: NaiveDate,
        #[arg(long, default_value_t = 1)]
        guests: u32,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Accept a pending booking as the property owner
    Confirm {
        #[arg(long)]
        booking: u64,
        #[arg(long)]
        owner: u64,
    },
    /// Decline a pending booking as the property owner
    Reject {
        #[arg(long)]
        booking: u64,
        #[arg(long)]
        owner: u64,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Cancel a booking as its guest or the property owner
    Cancel {
        #[arg(long)]
        booking: u64,
        #[arg(long)]
        actor: u64,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Close dates by hand as the property owner
    Block {
        #[arg(long)]
        property: u64,
        #[arg(long)]
        owner: u64,
        #[arg(long)]
        from: NaiveDate,
        /// First date that stays open
        #[arg(long)]
        to: NaiveDate,
    },
    /// Reopen dates by hand as the property owner
    Release {
        #[arg(long)]
        property: u64,
        #[arg(long)]
        owner: u64,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// Re-import external calendar feeds (all active ones by default)
    Sync {
        /// Sync only this feed
        #[arg(long, conflicts_with_all = ["property", "due"])]
        sync_id: Option<u64>,
        /// Sync only the active feeds of this property
        #[arg(long, conflicts_with = "due")]
        property: Option<u64>,
        /// Sync only feeds whose sync frequency has elapsed
        #[arg(long)]
        due: bool,
    },
    /// Show busy and free spans of a property calendar
    Calendar {
        #[arg(long)]
        property: u64,
        #[arg(long)]
        from: NaiveDate,
        #[arg(long)]
        to: NaiveDate,
    },
    /// List bookings of a guest or of an owner's properties
    Bookings {
        #[arg(long, conflicts_with = "owner", required_unless_present = "owner")]
        guest: Option<u64>,
        #[arg(long)]
        owner: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("STAY_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let snapshot = EngineSnapshot::load(&cli.state)
        .with_context(|| format!("Failed to load state: {}", cli.state.display()))?;
    let properties = snapshot.properties.clone();
    let fetcher = FeedClient::new(config.sync.fetch_timeout(), &config.sync.user_agent)
        .context("Failed to set up feed client")?;
    let engine = snapshot.into_engine(config, Arc::new(fetcher));

    let mutated = match cli.command {
        Commands::Check {
            property,
            check_in,
            check_out,
        } => {
            let quote = engine
                .check_availability(PropertyId(property), check_in, check_out)
                .context("Availability check failed")?;
            print_json(&quote)?;
            false
        }
        Commands::Search {
            check_in,
            check_out,
            city,
            max_price,
            property_type,
            min_bedrooms,
            min_guests,
        } => {
            let filters = SearchFilters {
                city,
                max_price,
                property_type,
                min_bedrooms,
                min_guests,
            };
            let ids = engine
                .search(check_in, check_out, &filters)
                .context("Search failed")?;
            print_json(&ids)?;
            false
        }
        Commands::Book {
            property,
            guest,
            check_in,
            check_out,
            guests,
            notes,
        } => {
            let booking = engine
                .create_booking(BookingRequest {
                    property_id: PropertyId(property),
                    guest_id: UserId(guest),
                    check_in,
                    check_out,
                    guests_count: guests,
                    notes,
                })
                .await
                .context("Booking rejected")?;
            print_json(&booking)?;
            true
        }
        Commands::Confirm { booking, owner } => {
            let booking = engine
                .confirm_booking(BookingId(booking), UserId(owner))
                .await
                .context("Confirmation failed")?;
            print_json(&booking)?;
            true
        }
        Commands::Reject {
            booking,
            owner,
            reason,
        } => {
            let booking = engine
                .reject_booking(BookingId(booking), UserId(owner), &reason)
                .await
                .context("Rejection failed")?;
            print_json(&booking)?;
            true
        }
        Commands::Cancel {
            booking,
            actor,
            reason,
        } => {
            let booking = engine
                .cancel_booking(BookingId(booking), UserId(actor), &reason)
                .await
                .context("Cancellation failed")?;
            print_json(&booking)?;
            true
        }
        Commands::Block {
            property,
            owner,
            from,
            to,
        } => {
            let days = engine
                .block_dates(PropertyId(property), UserId(owner), from, to)
                .await
                .context("Blocking dates failed")?;
            print_json(&serde_json::json!({ "blocked_days": days }))?;
            true
        }
        Commands::Release {
            property,
            owner,
            from,
            to,
        } => {
            let days = engine
                .release_dates(PropertyId(property), UserId(owner), from, to)
                .await
                .context("Releasing dates failed")?;
            print_json(&serde_json::json!({ "released_days": days }))?;
            true
        }
        Commands::Sync {
            sync_id,
            property,
            due,
        } => {
            let outcomes = match (sync_id, property) {
                (Some(id), _) => {
                    let report = engine
                        .sync_calendar(SyncId(id))
                        .await
                        .with_context(|| format!("Sync {} failed", id))?;
                    print_json(&report)?;
                    None
                }
                (None, Some(property)) => Some(engine.sync_property(PropertyId(property)).await),
                (None, None) if due => Some(engine.sync_due().await),
                (None, None) => Some(engine.sync_all_active().await),
            };
            if let Some(outcomes) = outcomes {
                let succeeded = outcomes.iter().filter(|o| o.ok).count();
                eprintln!("Synced {}/{} feeds", succeeded, outcomes.len());
                print_json(&outcomes)?;
            }
            true
        }
        Commands::Calendar { property, from, to } => {
            let view = engine
                .calendar_view(PropertyId(property), from, to)
                .context("Calendar view failed")?;
            print_json(&view)?;
            false
        }
        Commands::Bookings { guest, owner } => {
            let bookings = match (guest, owner) {
                (Some(guest), _) => engine.bookings_for_guest(UserId(guest)),
                (None, Some(owner)) => engine.bookings_for_owner(UserId(owner)),
                (None, None) => anyhow::bail!("either --guest or --owner is required"),
            };
            print_json(&bookings)?;
            false
        }
    };

    if mutated {
        engine
            .snapshot(properties)
            .save(&cli.state)
            .with_context(|| format!("Failed to write state: {}", cli.state.display()))?;
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

/// Parse a decimal amount like `120`, `99.5` or `99.50` into cents.
fn parse_money(raw: &str) -> std::result::Result<Money, String> {
    let raw = raw.trim();
    if raw.starts_with('-') {
        return Err(format!("amount must not be negative: {}", raw));
    }
    let invalid = || format!("invalid amount: {}", raw);
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if whole.is_empty() || !is_digits(whole) || fraction.len() > 2 || !is_digits(fraction) {
        return Err(invalid());
    }
    let whole: i64 = whole.parse().map_err(|_| invalid())?;
    let cents: i64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<2}", fraction).parse().map_err(|_| invalid())?
    };
    whole
        .checked_mul(100)
        .and_then(|c| c.checked_add(cents))
        .map(Money)
        .ok_or_else(invalid)
}
