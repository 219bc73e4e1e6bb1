use chrono::{NaiveDateTime, NaiveTime};
use std::fmt;
use std::time::Duration;

/// Daily quiet hours during which no stills are taken. Both ends are
/// inclusive. A start later than the end wraps over midnight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlackoutWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl BlackoutWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    fn wraps_midnight(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.wraps_midnight() {
            time >= self.start || time <= self.end
        } else {
            time >= self.start && time <= self.end
        }
    }

    /// How long until the window closes, or `None` when `now` is outside it.
    pub fn remaining(&self, now: NaiveDateTime) -> Option<Duration> {
        if !self.contains(now.time()) {
            return None;
        }
        let mut end = now.date().and_time(self.end);
        if now.time() > self.end {
            // evening part of a window that ends tomorrow morning
            end += chrono::Duration::days(1);
        }
        Some((end - now).to_std().unwrap_or(Duration::ZERO))
    }
}

impl fmt::Display for BlackoutWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M"),
            self.end.format("%H:%M")
        )
    }
}
