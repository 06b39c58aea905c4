//! Half-open date ranges and overlap detection.
//!
//! A stay `[check_in, check_out)` occupies the nights starting on `check_in`
//! up to but not including `check_out`. Back-to-back stays (one checks out the
//! day the next checks in) are NOT overlapping.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A validated half-open interval of calendar dates, `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl StayRange {
    /// Build a range, rejecting empty or inverted intervals.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start >= end {
            return Err(EngineError::Validation(format!(
                "check-out {} must be after check-in {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Two ranges overlap iff `a.start < b.end && b.start < a.end`.
    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Number of shared nights, zero when the ranges do not overlap.
    pub fn overlap_nights(&self, other: &StayRange) -> i64 {
        if !self.overlaps(other) {
            return 0;
        }
        (self.end.min(other.end) - self.start.max(other.start)).num_days()
    }

    /// The shared part of two ranges, if any.
    pub fn intersection(&self, other: &StayRange) -> Option<StayRange> {
        self.overlaps(other).then(|| StayRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    /// Every date in the range, `start` inclusive, `end` exclusive.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        std::iter::successors(Some(self.start), |d| d.checked_add_days(Days::new(1)))
            .take_while(move |d| *d < end)
    }
}

/// A detected overlap between two ranges in the same list.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict<T> {
    pub a: T,
    pub b: T,
    pub overlap_nights: i64,
}

/// Find all pairwise overlaps within one list of keyed ranges.
///
/// Used to audit the no-double-booking invariant for a property.
pub fn find_conflicts<T: Clone>(items: &[(T, StayRange)]) -> Vec<Conflict<T>> {
    let mut conflicts = Vec::new();

    for (i, (key_a, a)) in items.iter().enumerate() {
        for (key_b, b) in &items[i + 1..] {
            if a.overlaps(b) {
                conflicts.push(Conflict {
                    a: key_a.clone(),
                    b: key_b.clone(),
                    overlap_nights: a.overlap_nights(b),
                });
            }
        }
    }

    conflicts
}
