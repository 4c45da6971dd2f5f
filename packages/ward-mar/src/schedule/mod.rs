mod frequency;

use crate::error::ScheduleError;
use crate::log::SCHEDULE;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Timelike, Utc};
use tracing::trace;

pub use frequency::Frequency;

const SECONDS_PER_DAY: u32 = 24 * 60 * 60;

/// Calendar years a ward day or order date may fall in
pub const SUPPORTED_YEARS: std::ops::RangeInclusive<i32> = 1900..=9999;

pub fn is_supported_date(date: NaiveDate) -> bool {
    SUPPORTED_YEARS.contains(&date.year())
}

///
/// Local time of day that fixed-frequency schedules align to, and the ward's offset from UTC.
/// Calendar days are always resolved in the ward's offset.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WardClock {
    anchor: NaiveTime,
    offset: FixedOffset,
}

impl WardClock {
    pub fn new(anchor: NaiveTime, offset: FixedOffset) -> Self {
        WardClock { anchor, offset }
    }

    pub fn anchor(&self) -> NaiveTime {
        self.anchor
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The ward calendar day an instant falls on
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// The instant local midnight begins on `date`, or `None` outside the supported years
    pub fn start_of_day(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        if !is_supported_date(date) {
            return None;
        }
        let offset = TimeDelta::try_seconds(self.offset.local_minus_utc() as i64)?;
        date.and_time(NaiveTime::MIN)
            .checked_sub_signed(offset)
            .map(|local| local.and_utc())
    }

    pub fn end_of_day(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.start_of_day(date)?
            .checked_add_signed(TimeDelta::days(1))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Plan {
    Empty,
    Single(DateTime<Utc>),
    Every {
        first: DateTime<Utc>,
        interval: TimeDelta,
        count: u32,
    },
}

///
/// The administration instants of one order on one ward day.
///
/// The schedule is a value: iterating does not consume it and every call to `iter` starts again
/// from the first instant. Instants before the order's start, or at or after its effective end,
/// are never yielded.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DailySchedule {
    plan: Plan,
    from: DateTime<Utc>,
    until: Option<DateTime<Utc>>,
}

impl DailySchedule {
    fn empty(from: DateTime<Utc>) -> Self {
        DailySchedule {
            plan: Plan::Empty,
            from,
            until: None,
        }
    }

    pub fn iter(&self) -> ScheduleIter<'_> {
        ScheduleIter {
            schedule: self,
            next: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    fn includes(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.from && self.until.map_or(true, |until| instant < until)
    }
}

impl<'a> IntoIterator for &'a DailySchedule {
    type Item = DateTime<Utc>;
    type IntoIter = ScheduleIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct ScheduleIter<'a> {
    schedule: &'a DailySchedule,
    next: u32,
}

impl Iterator for ScheduleIter<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let instant = match self.schedule.plan {
                Plan::Empty => return None,
                Plan::Single(instant) => {
                    if self.next > 0 {
                        return None;
                    }
                    instant
                }
                Plan::Every {
                    first,
                    interval,
                    count,
                } => {
                    if self.next >= count {
                        return None;
                    }
                    first + interval * self.next as i32
                }
            };

            self.next += 1;

            if self.schedule.includes(instant) {
                return Some(instant);
            }
        }
    }
}

///
/// Administration instants for an order on `day`.
///
/// Fixed frequencies are spaced `24h / n` apart and aligned so that one instant falls on the
/// clock's anchor time. `STAT` and `CONTINUOUS` produce a single instant at `start` on the start
/// day only. `PRN` never produces instants.
///
pub fn generate(
    frequency: Frequency,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    day: NaiveDate,
    clock: &WardClock,
) -> DailySchedule {
    let mut schedule = DailySchedule::empty(start);
    schedule.until = end;

    schedule.plan = match frequency {
        Frequency::Prn => Plan::Empty,
        Frequency::Stat | Frequency::Continuous => {
            if clock.date_of(start) == day {
                Plan::Single(start)
            } else {
                Plan::Empty
            }
        }
        fixed => match (fixed.per_day(), clock.start_of_day(day)) {
            (Some(count), Some(midnight)) if count > 0 => {
                let interval_secs = SECONDS_PER_DAY / count;
                let offset_secs = clock.anchor().num_seconds_from_midnight() % interval_secs;

                Plan::Every {
                    first: midnight + TimeDelta::seconds(offset_secs as i64),
                    interval: TimeDelta::seconds(interval_secs as i64),
                    count,
                }
            }
            _ => Plan::Empty,
        },
    };

    trace!(target: SCHEDULE, msg = "Generated schedule", %frequency, %day, plan = ?schedule.plan);

    schedule
}

pub fn generate_for_code(
    code: &str,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    day: NaiveDate,
    clock: &WardClock,
) -> Result<DailySchedule, ScheduleError> {
    let frequency = code.parse::<Frequency>()?;
    Ok(generate(frequency, start, end, day, clock))
}
