//! RRULE expansion for recurring feed events.
//!
//! Wraps the `rrule` crate (v0.13) and `chrono-tz`. The reconciler only needs
//! the local start date of each occurrence inside a bounded window, since
//! everything in the calendar is day-granular.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rrule::RRuleSet;

use crate::error::{EngineError, Result};
use crate::range::StayRange;

/// Upper bound on occurrences produced for one event.
pub const MAX_OCCURRENCES: u16 = 2000;

/// Expand an RRULE into the local start dates of its occurrences that fall
/// inside `window`.
///
/// # Arguments
/// - `rrule` -- RFC 5545 RRULE value (e.g., "FREQ=WEEKLY;BYDAY=SA;COUNT=4")
/// - `dtstart` -- Local start of the first instance
/// - `timezone` -- IANA timezone of `dtstart` ("UTC" for floating and date values)
/// - `window` -- Only occurrences starting on a date in this range are returned
///
/// # Errors
/// Returns `EngineError::Parse` if the rule is empty or unparseable, or the
/// timezone is not a valid IANA identifier.
pub fn expand_occurrence_dates(
    rrule: &str,
    dtstart: NaiveDateTime,
    timezone: &str,
    window: StayRange,
) -> Result<Vec<NaiveDate>> {
    if rrule.trim().is_empty() {
        return Err(EngineError::Parse("empty RRULE".to_string()));
    }

    let _tz: chrono_tz::Tz = timezone
        .parse()
        .map_err(|_| EngineError::Parse(format!("invalid timezone: {}", timezone)))?;

    let rule = normalize_until(rrule, timezone);
    let rrule_text = format!(
        "DTSTART;TZID={}:{}\nRRULE:{}",
        timezone,
        dtstart.format("%Y%m%dT%H%M%S"),
        rule
    );

    let rrule_set: RRuleSet = rrule_text
        .parse()
        .map_err(|e| EngineError::Parse(format!("invalid RRULE {:?}: {}", rrule, e)))?;

    // The bounds are padded by a day on each side so timezone offsets cannot
    // drop an occurrence whose local date is inside the window.
    let lower = window.start.pred_opt().unwrap_or(window.start);
    let upper = window.end.succ_opt().unwrap_or(window.end);
    let after = Utc
        .from_utc_datetime(&lower.and_time(NaiveTime::MIN))
        .with_timezone(&rrule::Tz::UTC);
    let before = Utc
        .from_utc_datetime(&upper.and_time(NaiveTime::MIN))
        .with_timezone(&rrule::Tz::UTC);

    let instances = rrule_set.after(after).before(before).all(MAX_OCCURRENCES);

    let mut dates: Vec<NaiveDate> = instances
        .dates
        .into_iter()
        .map(|dt| dt.date_naive())
        .filter(|date| window.contains(*date))
        .collect();
    dates.dedup();

    Ok(dates)
}

/// Bring UNTIL into the form the `rrule` crate accepts alongside a TZID
/// DTSTART: UTC rules need a trailing `Z`, other zones use bare local time.
/// Date-only UNTIL values cover the whole final day.
fn normalize_until(rrule: &str, timezone: &str) -> String {
    rrule
        .split(';')
        .map(|part| {
            let Some((key, value)) = part.split_once('=') else {
                return part.to_string();
            };
            if !key.eq_ignore_ascii_case("UNTIL") {
                return part.to_string();
            }
            let mut until = value.trim_end_matches(['Z', 'z']).to_string();
            if until.len() == 8 {
                until.push_str("T235959");
            }
            if timezone == "UTC" {
                until.push('Z');
            }
            format!("UNTIL={}", until)
        })
        .collect::<Vec<_>>()
        .join(";")
}
