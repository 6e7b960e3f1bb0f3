//! Trading-session calendars.
//!
//! The fetch loop only polls while the relevant market is open; the
//! calendar is the single authority on that. Holiday data is out of scope,
//! so the CN calendar covers weekday sessions only.

use std::sync::atomic::{AtomicBool, Ordering};

use time::{OffsetDateTime, Time, UtcOffset, Weekday};

pub trait MarketCalendar: Send + Sync {
    /// Whether the market is in session at the given instant.
    fn is_open(&self, at: OffsetDateTime) -> bool;
}

/// Mainland CN exchange sessions: Monday through Friday, 09:00-11:30 and
/// 13:00-15:00 at UTC+8. Bounds are inclusive on both ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct CnSessionCalendar;

const CN_OFFSET_HOURS: i8 = 8;

impl MarketCalendar for CnSessionCalendar {
    fn is_open(&self, at: OffsetDateTime) -> bool {
        let offset = match UtcOffset::from_hms(CN_OFFSET_HOURS, 0, 0) {
            Ok(offset) => offset,
            Err(_) => return false,
        };
        let local = at.to_offset(offset);

        if matches!(local.weekday(), Weekday::Saturday | Weekday::Sunday) {
            return false;
        }

        let t = local.time();
        in_session(t, 9, 0, 11, 30) || in_session(t, 13, 0, 15, 0)
    }
}

fn in_session(t: Time, open_h: u8, open_m: u8, close_h: u8, close_m: u8) -> bool {
    let minutes = u16::from(t.hour()) * 60 + u16::from(t.minute());
    let open = u16::from(open_h) * 60 + u16::from(open_m);
    let close = u16::from(close_h) * 60 + u16::from(close_m);
    minutes >= open && minutes <= close
}

/// Fixed-answer calendar for tests and always-on deployments.
#[derive(Debug, Default)]
pub struct StaticCalendar {
    open: AtomicBool,
}

impl StaticCalendar {
    pub fn open() -> Self {
        Self {
            open: AtomicBool::new(true),
        }
    }

    pub fn closed() -> Self {
        Self {
            open: AtomicBool::new(false),
        }
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}

impl MarketCalendar for StaticCalendar {
    fn is_open(&self, _at: OffsetDateTime) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
