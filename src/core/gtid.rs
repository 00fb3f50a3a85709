// src/core/gtid.rs

//! GTID set arithmetic.
//!
//! A GTID set maps a source UUID to the transaction numbers applied from that
//! source. Replication progress is compared with the subset relation: a member
//! whose set is a superset of every other member's has seen every transaction.

use crate::core::errors::ClusterAdminError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid GTID set '{input}': {reason}")]
pub struct GtidParseError {
    pub input: String,
    pub reason: String,
}

impl From<GtidParseError> for ClusterAdminError {
    fn from(e: GtidParseError) -> Self {
        ClusterAdminError::Protocol(e.to_string())
    }
}

/// An inclusive range of transaction numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

/// A normalised GTID set. Intervals per source are sorted and never overlap or touch,
/// so two sets describing the same transactions compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GtidSet {
    sources: BTreeMap<Uuid, Vec<Interval>>,
}

impl GtidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Total number of transactions in the set, saturating at `u64::MAX`.
    pub fn count(&self) -> u64 {
        self.sources
            .values()
            .flat_map(|ivs| ivs.iter())
            .fold(0u64, |total, iv| {
                total.saturating_add((iv.end - iv.start).saturating_add(1))
            })
    }

    pub fn sources(&self) -> impl Iterator<Item = &Uuid> {
        self.sources.keys()
    }

    pub fn intervals(&self, source: &Uuid) -> &[Interval] {
        self.sources.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, source: &Uuid, gno: u64) -> bool {
        self.intervals(source)
            .iter()
            .any(|iv| iv.start <= gno && gno <= iv.end)
    }

    /// Adds `start..=end` for `source`. Ranges with `start == 0` or `end < start` are ignored.
    pub fn add_interval(&mut self, source: Uuid, start: u64, end: u64) {
        if start == 0 || end < start {
            return;
        }
        let intervals = self.sources.entry(source).or_default();
        intervals.push(Interval { start, end });
        normalize(intervals);
    }

    pub fn add_transaction(&mut self, source: Uuid, gno: u64) {
        self.add_interval(source, gno, gno);
    }

    /// Appends the next transaction number for `source` and returns it.
    pub fn add_next(&mut self, source: Uuid) -> u64 {
        let next = self
            .intervals(&source)
            .last()
            .map_or(1, |iv| iv.end.saturating_add(1));
        self.add_transaction(source, next);
        next
    }

    /// True when every transaction in `self` is also in `other`.
    pub fn is_subset(&self, other: &GtidSet) -> bool {
        self.sources.iter().all(|(source, mine)| {
            let theirs = other.intervals(source);
            mine.iter().all(|iv| covered(iv, theirs))
        })
    }

    pub fn is_superset(&self, other: &GtidSet) -> bool {
        other.is_subset(self)
    }

    pub fn union(&self, other: &GtidSet) -> GtidSet {
        let mut out = self.clone();
        for (source, intervals) in &other.sources {
            let merged = out.sources.entry(*source).or_default();
            merged.extend_from_slice(intervals);
            normalize(merged);
        }
        out
    }

    /// Transactions in `self` that are missing from `other`.
    pub fn difference(&self, other: &GtidSet) -> GtidSet {
        let mut out = GtidSet::new();
        for (source, mine) in &self.sources {
            let theirs = other.intervals(source);
            let rest: Vec<Interval> = mine.iter().flat_map(|iv| subtract(*iv, theirs)).collect();
            if !rest.is_empty() {
                out.sources.insert(*source, rest);
            }
        }
        out
    }
}

/// Sorts and merges overlapping or adjacent intervals in place.
fn normalize(intervals: &mut Vec<Interval>) {
    intervals.sort();
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for iv in intervals.drain(..) {
        match merged.last_mut() {
            Some(last) if iv.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(iv.end);
            }
            _ => merged.push(iv),
        }
    }
    *intervals = merged;
}

fn covered(iv: &Interval, theirs: &[Interval]) -> bool {
    theirs
        .iter()
        .any(|other| other.start <= iv.start && iv.end <= other.end)
}

fn subtract(iv: Interval, theirs: &[Interval]) -> Vec<Interval> {
    let mut remaining = vec![iv];
    for cut in theirs {
        let mut next = Vec::with_capacity(remaining.len() + 1);
        for piece in remaining {
            if cut.end < piece.start || cut.start > piece.end {
                next.push(piece);
                continue;
            }
            if cut.start > piece.start {
                next.push(Interval {
                    start: piece.start,
                    end: cut.start - 1,
                });
            }
            if cut.end < piece.end {
                next.push(Interval {
                    start: cut.end + 1,
                    end: piece.end,
                });
            }
        }
        remaining = next;
    }
    remaining
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first_source = true;
        for (source, intervals) in &self.sources {
            if !first_source {
                f.write_str(",")?;
            }
            first_source = false;
            write!(f, "{}", source.hyphenated())?;
            for iv in intervals {
                if iv.start == iv.end {
                    write!(f, ":{}", iv.start)?;
                } else {
                    write!(f, ":{}-{}", iv.start, iv.end)?;
                }
            }
        }
        Ok(())
    }
}

impl FromStr for GtidSet {
    type Err = GtidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: String| GtidParseError {
            input: s.to_string(),
            reason,
        };

        // Intervals are collected raw and merged once per source at the end.
        let mut set = GtidSet::new();
        for chunk in s.split(',') {
            // Servers wrap long sets with newlines after the comma.
            let chunk = chunk.trim();
            if chunk.is_empty() {
                continue;
            }
            let mut parts = chunk.split(':');
            let source_str = parts.next().unwrap_or_default().trim();
            let source = Uuid::parse_str(source_str)
                .map_err(|e| err(format!("bad source UUID '{source_str}': {e}")))?;

            let mut saw_interval = false;
            for part in parts {
                let part = part.trim();
                let (start, end) = match part.split_once('-') {
                    Some((a, b)) => (a.trim(), b.trim()),
                    None => (part, part),
                };
                let start: u64 = start
                    .parse()
                    .map_err(|_| err(format!("bad transaction number '{start}'")))?;
                let end: u64 = end
                    .parse()
                    .map_err(|_| err(format!("bad transaction number '{end}'")))?;
                if start == 0 {
                    return Err(err("transaction numbers start at 1".to_string()));
                }
                if end < start {
                    return Err(err(format!("interval {start}-{end} is reversed")));
                }
                set.sources
                    .entry(source)
                    .or_default()
                    .push(Interval { start, end });
                saw_interval = true;
            }
            if !saw_interval {
                return Err(err(format!("source {source} has no intervals")));
            }
        }
        for intervals in set.sources.values_mut() {
            normalize(intervals);
        }
        Ok(set)
    }
}

impl Serialize for GtidSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GtidSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
