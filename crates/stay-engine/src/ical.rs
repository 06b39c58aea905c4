//! Parser for iCalendar (RFC 5545) busy feeds as exported by rental channels.
//!
//! Only what the reconciler needs is read: `VEVENT` components with their
//! `UID`, `DTSTART`, `DTEND`, `RRULE`, `EXDATE`, `RECURRENCE-ID` and `STATUS`.
//! Timestamps are normalized to calendar dates by dropping the time of day.
//! Events are half-open: `DTEND` is the first free date.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::expander::expand_occurrence_dates;
use crate::range::StayRange;

/// One busy interval imported from a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub uid: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FeedEvent {
    pub fn range(&self) -> StayRange {
        StayRange {
            start: self.start,
            end: self.end,
        }
    }
}

/// Parsed feed: busy intervals plus how many components were ignored
/// (cancelled, missing dates, or shorter than one night).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub events: Vec<FeedEvent>,
    pub skipped: usize,
}

/// A date or date-time property value.
#[derive(Debug, Clone, PartialEq)]
struct Stamp {
    local: NaiveDateTime,
    /// IANA zone of `local`; `UTC` for `...Z`, floating and date values.
    timezone: String,
}

impl Stamp {
    fn date(&self) -> NaiveDate {
        self.local.date()
    }
}

#[derive(Debug, Default)]
struct RawEvent {
    uid: Option<String>,
    dtstart: Option<Stamp>,
    dtend: Option<Stamp>,
    rrule: Option<String>,
    exdates: Vec<NaiveDate>,
    recurrence_id: Option<NaiveDate>,
    cancelled: bool,
}

/// Parse a feed and expand recurring events inside `horizon`.
///
/// # Errors
/// Returns `EngineError::Parse` when the payload is not a VCALENDAR, a
/// `VEVENT` is left unterminated, or a date value or RRULE is malformed.
pub fn parse_feed(payload: &str, horizon: StayRange) -> Result<ParsedFeed> {
    let lines = unfold(payload);
    if !lines
        .iter()
        .any(|l| l.eq_ignore_ascii_case("BEGIN:VCALENDAR"))
    {
        return Err(EngineError::Parse("missing BEGIN:VCALENDAR".to_string()));
    }

    let raw = collect_events(&lines)?;

    // Occurrences moved by a RECURRENCE-ID override are dropped from the
    // master series; the override itself is imported as a one-off.
    let mut overridden: BTreeMap<String, BTreeSet<NaiveDate>> = BTreeMap::new();
    for event in &raw {
        if let (Some(uid), Some(date)) = (&event.uid, event.recurrence_id) {
            overridden.entry(uid.clone()).or_default().insert(date);
        }
    }

    let mut parsed = ParsedFeed::default();
    for event in raw {
        if event.cancelled {
            parsed.skipped += 1;
            continue;
        }
        let (Some(start), Some(end)) = (&event.dtstart, &event.dtend) else {
            parsed.skipped += 1;
            continue;
        };
        let length = (end.date() - start.date()).num_days();
        if length <= 0 {
            parsed.skipped += 1;
            continue;
        }
        let uid = event
            .uid
            .clone()
            .unwrap_or_else(|| format!("{}-{}", start.date(), end.date()));

        match (&event.rrule, event.recurrence_id) {
            (Some(rule), None) => {
                let excluded = overridden.get(&uid);
                // Widen the window backwards so an occurrence that started
                // before the horizon but is still running is kept.
                let window = StayRange {
                    start: horizon
                        .start
                        .checked_sub_days(Days::new(length as u64))
                        .unwrap_or(horizon.start),
                    end: horizon.end,
                };
                for date in expand_occurrence_dates(rule, start.local, &start.timezone, window)? {
                    if event.exdates.contains(&date)
                        || excluded.is_some_and(|dates| dates.contains(&date))
                    {
                        continue;
                    }
                    if let Some(occurrence_end) = date.checked_add_days(Days::new(length as u64)) {
                        parsed.events.push(FeedEvent {
                            uid: uid.clone(),
                            start: date,
                            end: occurrence_end,
                        });
                    }
                }
            }
            _ => parsed.events.push(FeedEvent {
                uid,
                start: start.date(),
                end: end.date(),
            }),
        }
    }

    Ok(parsed)
}

/// Join RFC 5545 folded lines (continuations start with a space or tab).
fn unfold(payload: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in payload.lines() {
        let line = line.trim_end_matches('\r');
        match line.strip_prefix([' ', '\t']) {
            Some(rest) if !lines.is_empty() => {
                if let Some(last) = lines.last_mut() {
                    last.push_str(rest);
                }
            }
            _ => {
                if !line.trim().is_empty() {
                    lines.push(line.to_string());
                }
            }
        }
    }
    lines
}

fn collect_events(lines: &[String]) -> Result<Vec<RawEvent>> {
    let mut events = Vec::new();
    let mut current: Option<RawEvent> = None;
    // Components nested inside a VEVENT (VALARM) carry their own properties.
    let mut nested = 0usize;

    for (index, line) in lines.iter().enumerate() {
        let line_no = index + 1;
        let (name, params, value) = split_property(line)
            .ok_or_else(|| EngineError::Parse(format!("line {}: malformed content line", line_no)))?;

        match (name.as_str(), value.to_ascii_uppercase().as_str()) {
            ("BEGIN", "VEVENT") => {
                if current.is_some() {
                    return Err(EngineError::Parse(format!(
                        "line {}: VEVENT opened inside another VEVENT",
                        line_no
                    )));
                }
                current = Some(RawEvent::default());
                continue;
            }
            ("END", "VEVENT") => {
                let event = current.take().ok_or_else(|| {
                    EngineError::Parse(format!("line {}: END:VEVENT without BEGIN", line_no))
                })?;
                events.push(event);
                nested = 0;
                continue;
            }
            ("BEGIN", _) if current.is_some() => {
                nested += 1;
                continue;
            }
            ("END", _) if current.is_some() => {
                nested = nested.saturating_sub(1);
                continue;
            }
            _ => {}
        }

        let Some(event) = current.as_mut() else {
            continue;
        };
        if nested > 0 {
            continue;
        }

        match name.as_str() {
            "UID" => event.uid = Some(value.trim().to_string()),
            "DTSTART" => event.dtstart = Some(parse_stamp(&params, &value, line_no)?),
            "DTEND" => event.dtend = Some(parse_stamp(&params, &value, line_no)?),
            "RRULE" => event.rrule = Some(value.trim().to_string()),
            "EXDATE" => {
                for item in value.split(',').filter(|v| !v.trim().is_empty()) {
                    event.exdates.push(parse_stamp(&params, item, line_no)?.date());
                }
            }
            "RECURRENCE-ID" => {
                event.recurrence_id = Some(parse_stamp(&params, &value, line_no)?.date())
            }
            "STATUS" => event.cancelled = value.trim().eq_ignore_ascii_case("CANCELLED"),
            _ => {}
        }
    }

    if current.is_some() {
        return Err(EngineError::Parse("unterminated VEVENT".to_string()));
    }

    Ok(events)
}

/// Split `NAME;PARAM=V;PARAM=V:value` into its parts. Colons inside quoted
/// parameter values do not end the name section.
fn split_property(line: &str) -> Option<(String, BTreeMap<String, String>, String)> {
    let mut in_quotes = false;
    let mut colon = None;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                colon = Some(i);
                break;
            }
            _ => {}
        }
    }
    let colon = colon?;
    let (head, value) = (&line[..colon], &line[colon + 1..]);

    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }
    let params = parts
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_uppercase(), v.trim().trim_matches('"').to_string()))
        .collect();

    Some((name, params, value.to_string()))
}

fn parse_stamp(params: &BTreeMap<String, String>, value: &str, line_no: usize) -> Result<Stamp> {
    let value = value.trim();
    let bad = || EngineError::Parse(format!("line {}: invalid date value {:?}", line_no, value));

    let is_date = params
        .get("VALUE")
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
        || value.len() == 8;

    if is_date {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").map_err(|_| bad())?;
        return Ok(Stamp {
            local: date.and_time(NaiveTime::MIN),
            timezone: "UTC".to_string(),
        });
    }

    let (text, utc) = match value.strip_suffix(['Z', 'z']) {
        Some(text) => (text, true),
        None => (value, false),
    };
    let local = NaiveDateTime::parse_from_str(text, "%Y%m%dT%H%M%S").map_err(|_| bad())?;
    let timezone = match params.get("TZID") {
        Some(tzid) if !utc => tzid.clone(),
        _ => "UTC".to_string(),
    };

    Ok(Stamp { local, timezone })
}
