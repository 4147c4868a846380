//! Segment planning: turns an `HH:MM` start time into absolute segment start instants.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Days, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use log::debug;

use crate::error::{SessionError, SessionResult};

const MAX_GAP_MINUTES: i64 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Waiting,
    Countdown,
    Main,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SegmentKind::Waiting => "waiting",
            SegmentKind::Countdown => "countdown",
            SegmentKind::Main => "main",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub source: PathBuf,
    /// Repeat the source until stopped. Only the waiting segment loops.
    pub looping: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub segment: Segment,
    pub planned_start: DateTime<Local>,
}

/// Ordered segments with non-decreasing start instants. MAIN is always last.
#[derive(Debug, Clone)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn main(&self) -> &TimelineEntry {
        // plan() always pushes MAIN last
        &self.entries[self.entries.len() - 1]
    }

    #[cfg(test)]
    pub fn kinds(&self) -> Vec<SegmentKind> {
        self.entries.iter().map(|e| e.segment.kind).collect()
    }
}

pub struct PlanInputs<'a> {
    pub stream_key: &'a str,
    pub start_time: &'a str,
    pub main_video: &'a Path,
    /// Countdown source and its measured length.
    pub countdown: Option<(&'a Path, Duration)>,
    pub waiting: Option<&'a Path>,
}

pub fn parse_start_time(value: &str) -> SessionResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| SessionError::InvalidTimeFormat(value.to_string()))
}

/// Next occurrence of `time` at or after `now`, rolling to tomorrow when today's has passed.
/// A wall-clock time skipped by a DST change resolves to the first instant after the gap.
pub fn resolve_start(now: DateTime<Local>, time: NaiveTime) -> SessionResult<DateTime<Local>> {
    let today = now.date_naive();
    let at = |date: NaiveDate| {
        first_valid(date.and_time(time), |naive| Local.from_local_datetime(naive))
            .ok_or_else(|| SessionError::InvalidTimeFormat(time.format("%H:%M").to_string()))
    };

    let candidate = at(today)?;
    if candidate >= now {
        return Ok(candidate);
    }
    let tomorrow = today
        .checked_add_days(Days::new(1))
        .ok_or_else(|| SessionError::InvalidTimeFormat(time.format("%H:%M").to_string()))?;
    at(tomorrow)
}

/// Earliest mapping of `naive`, stepping forward a minute at a time through a gap.
fn first_valid<T>(
    naive: NaiveDateTime,
    resolve: impl Fn(&NaiveDateTime) -> LocalResult<T>,
) -> Option<T> {
    (0..=MAX_GAP_MINUTES)
        .map(|m| naive + chrono::Duration::minutes(m))
        .find_map(|candidate| resolve(&candidate).earliest())
}

pub fn plan(now: DateTime<Local>, inputs: &PlanInputs<'_>) -> SessionResult<Timeline> {
    if inputs.stream_key.trim().is_empty() {
        return Err(SessionError::MissingInput("stream key"));
    }
    if inputs.main_video.as_os_str().is_empty() {
        return Err(SessionError::MissingInput("main video"));
    }

    let target = resolve_start(now, parse_start_time(inputs.start_time)?)?;
    let countdown_start = inputs
        .countdown
        .map(|(_, length)| target - chrono::Duration::seconds(length.as_secs() as i64));
    let first_timed = countdown_start.unwrap_or(target);

    let mut entries = Vec::with_capacity(3);

    if let Some(source) = inputs.waiting {
        if first_timed > now {
            entries.push(TimelineEntry {
                segment: Segment {
                    kind: SegmentKind::Waiting,
                    source: source.to_path_buf(),
                    looping: true,
                },
                planned_start: now,
            });
        } else {
            debug!("waiting loop skipped, next segment is due at {}", first_timed);
        }
    }

    if let (Some((source, _)), Some(start)) = (inputs.countdown, countdown_start) {
        entries.push(TimelineEntry {
            segment: Segment {
                kind: SegmentKind::Countdown,
                source: source.to_path_buf(),
                looping: false,
            },
            planned_start: start.max(now),
        });
    }

    entries.push(TimelineEntry {
        segment: Segment {
            kind: SegmentKind::Main,
            source: inputs.main_video.to_path_buf(),
            looping: false,
        },
        planned_start: target,
    });

    Ok(Timeline { entries })
}
