use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::clock::{day_start_ms, time_of_day_ms};
use crate::model::{Ms, Span};

/// Daily window during which rooms may be booked, as offsets from midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingHours {
    pub open: Ms,
    pub close: Ms,
}

impl Default for OperatingHours {
    fn default() -> Self {
        Self {
            open: 8 * 3_600_000,
            close: 22 * 3_600_000,
        }
    }
}

impl OperatingHours {
    /// Parse `HH:MM` bounds. `None` if either is malformed or `open >= close`.
    pub fn parse(open: &str, close: &str) -> Option<Self> {
        let open = offset_of(NaiveTime::parse_from_str(open.trim(), "%H:%M").ok()?);
        let close = offset_of(NaiveTime::parse_from_str(close.trim(), "%H:%M").ok()?);
        (open < close).then_some(Self { open, close })
    }

    /// The whole span must fit inside the window of the day it starts on.
    pub fn admits(&self, span: &Span) -> bool {
        let midnight = span.start - time_of_day_ms(span.start);
        midnight + self.open <= span.start && span.end <= midnight + self.close
    }

    /// The bookable window on `date`.
    pub fn window_on(&self, date: NaiveDate) -> Span {
        let midnight = day_start_ms(date);
        Span::new(midnight + self.open, midnight + self.close)
    }
}

impl std::fmt::Display for OperatingHours {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hm = |ms: Ms| (ms / 3_600_000, (ms / 60_000) % 60);
        let (oh, om) = hm(self.open);
        let (ch, cm) = hm(self.close);
        write!(f, "{oh:02}:{om:02}-{ch:02}:{cm:02}")
    }
}

fn offset_of(t: NaiveTime) -> Ms {
    Ms::from(t.num_seconds_from_midnight()) * 1000
}
