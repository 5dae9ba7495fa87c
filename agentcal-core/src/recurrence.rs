//! Recurrence rules and occurrence generation.
//!
//! Implements the rule subset agents actually schedule with: a frequency
//! (daily/weekly/monthly), an optional day-of-week filter, and an optional
//! bound by count or end date. Expansion is a pure function of
//! (rule, anchor, timezone, horizon) and is DST-safe: the occurrence wall
//! time is fixed, its absolute instant shifts with the zone's offset on
//! that date.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::error::{AgentCalError, AgentCalResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
        }
    }
}

/// A parsed recurrence rule, e.g. `FREQ=DAILY;BYDAY=MO,TU,WE,TH,FR;COUNT=10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub freq: Frequency,
    /// Day-of-week filter. Empty means no filter.
    pub by_day: Vec<Weekday>,
    pub count: Option<u32>,
    /// Inclusive end date (in the series' timezone).
    pub until: Option<NaiveDate>,
}

impl FromStr for RecurrenceRule {
    type Err = AgentCalError;

    fn from_str(s: &str) -> AgentCalResult<Self> {
        let mut freq = None;
        let mut by_day = Vec::new();
        let mut count = None;
        let mut until = None;

        for part in s.split(';').filter(|p| !p.trim().is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| AgentCalError::invalid_rule(part, "expected KEY=VALUE"))?;

            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    freq = Some(match value.trim().to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        other => {
                            return Err(AgentCalError::invalid_rule(
                                other,
                                "frequency must be DAILY, WEEKLY or MONTHLY",
                            ))
                        }
                    });
                }
                "BYDAY" => {
                    for token in value.split(',') {
                        by_day.push(parse_weekday(token.trim())?);
                    }
                }
                "COUNT" => {
                    let n: u32 = value
                        .trim()
                        .parse()
                        .map_err(|_| AgentCalError::invalid_rule(value, "COUNT must be a positive integer"))?;
                    if n == 0 {
                        return Err(AgentCalError::invalid_rule(value, "COUNT must be at least 1"));
                    }
                    count = Some(n);
                }
                "UNTIL" => {
                    until = Some(parse_until(value.trim())?);
                }
                other => {
                    return Err(AgentCalError::invalid_rule(other, "unrecognized rule part"));
                }
            }
        }

        let freq = freq.ok_or_else(|| AgentCalError::invalid_rule("FREQ", "missing required part"))?;

        if count.is_some() && until.is_some() {
            return Err(AgentCalError::invalid_rule(
                "COUNT",
                "COUNT and UNTIL are mutually exclusive",
            ));
        }
        if freq == Frequency::Monthly && !by_day.is_empty() {
            return Err(AgentCalError::invalid_rule(
                "BYDAY",
                "BYDAY is not supported for FREQ=MONTHLY",
            ));
        }

        Ok(RecurrenceRule {
            freq,
            by_day,
            count,
            until,
        })
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FREQ={}", self.freq.as_str())?;
        if !self.by_day.is_empty() {
            let days: Vec<&str> = self.by_day.iter().map(|d| weekday_token(*d)).collect();
            write!(f, ";BYDAY={}", days.join(","))?;
        }
        if let Some(count) = self.count {
            write!(f, ";COUNT={}", count)?;
        }
        if let Some(until) = self.until {
            write!(f, ";UNTIL={}", until.format("%Y%m%d"))?;
        }
        Ok(())
    }
}

fn parse_weekday(token: &str) -> AgentCalResult<Weekday> {
    match token.to_ascii_uppercase().as_str() {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        _ => Err(AgentCalError::invalid_rule(token, "unrecognized weekday")),
    }
}

fn weekday_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn parse_until(value: &str) -> AgentCalResult<NaiveDate> {
    // Accept the ICS basic form, an ISO date, and the basic datetime form.
    let date_part = value.split('T').next().unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(date_part, "%Y-%m-%d"))
        .map_err(|_| AgentCalError::invalid_rule(value, "UNTIL must be a date (YYYYMMDD)"))
}

/// One concrete occurrence of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// The calendar date this occurrence represents within the series,
    /// in the series' timezone. Used as the instance's `occurrence_key`.
    pub key: NaiveDate,
}

/// Lazy, bounded occurrence sequence. Restartable: every call to
/// [`occurrences`] yields the same sequence for the same inputs.
pub struct Occurrences {
    rule: RecurrenceRule,
    tz: Tz,
    wall: NaiveTime,
    duration: Duration,
    anchor: NaiveDate,
    cursor: NaiveDate,
    horizon: NaiveDate,
    emitted: u32,
}

/// Expand `rule` against an anchor (start, end) pair up to `horizon_end`.
///
/// The anchor's duration and wall-clock time-of-day in `tz` are preserved
/// for every occurrence.
pub fn occurrences(
    rule: &RecurrenceRule,
    anchor_start: DateTime<Utc>,
    anchor_end: DateTime<Utc>,
    tz: Tz,
    horizon_end: DateTime<Utc>,
) -> Occurrences {
    let local = anchor_start.with_timezone(&tz);
    let anchor = local.date_naive();
    Occurrences {
        rule: rule.clone(),
        tz,
        wall: local.time(),
        duration: anchor_end - anchor_start,
        anchor,
        cursor: anchor,
        horizon: horizon_end.with_timezone(&tz).date_naive(),
        emitted: 0,
    }
}

impl Occurrences {
    fn matches(&self, date: NaiveDate) -> bool {
        if !self.rule.by_day.is_empty() {
            return self.rule.by_day.contains(&date.weekday());
        }
        match self.rule.freq {
            Frequency::Daily => true,
            Frequency::Weekly => date.weekday() == self.anchor.weekday(),
            Frequency::Monthly => date.day() == self.anchor.day(),
        }
    }
}

impl Iterator for Occurrences {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        loop {
            if let Some(count) = self.rule.count {
                if self.emitted >= count {
                    return None;
                }
            }
            let date = self.cursor;
            if date > self.horizon {
                return None;
            }
            if let Some(until) = self.rule.until {
                if date > until {
                    return None;
                }
            }
            self.cursor = date.succ_opt()?;
            if !self.matches(date) {
                continue;
            }
            self.emitted += 1;
            let start = resolve_local(self.tz, date, self.wall).with_timezone(&Utc);
            return Some(Occurrence {
                start,
                end: start + self.duration,
                key: date,
            });
        }
    }
}

/// Resolve a wall-clock time on a date in a zone, handling DST transitions:
/// ambiguous times (fall-back) take the earlier instant, nonexistent times
/// (spring-forward gap) shift forward an hour.
fn resolve_local(tz: Tz, date: NaiveDate, wall: NaiveTime) -> DateTime<Tz> {
    let naive = date.and_time(wall);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .unwrap_or_else(|| tz.from_utc_datetime(&naive))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn rule(s: &str) -> RecurrenceRule {
        s.parse().unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn date(y: i32, mo: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap()
    }

    #[test]
    fn parses_full_rule() {
        let r = rule("FREQ=DAILY;BYDAY=MO,TU,WE,TH,FR;COUNT=10");
        assert_eq!(r.freq, Frequency::Daily);
        assert_eq!(r.by_day.len(), 5);
        assert_eq!(r.count, Some(10));
        assert!(r.until.is_none());
    }

    #[test]
    fn display_round_trips() {
        for s in [
            "FREQ=DAILY",
            "FREQ=WEEKLY;BYDAY=MO,FR",
            "FREQ=DAILY;COUNT=5",
            "FREQ=MONTHLY;UNTIL=20251231",
        ] {
            assert_eq!(rule(s).to_string(), s);
        }
    }

    #[test]
    fn rejects_unknown_part_naming_token() {
        let err = "FREQ=DAILY;FOO=1".parse::<RecurrenceRule>().unwrap_err();
        match err {
            AgentCalError::InvalidRecurrenceRule { token, .. } => assert_eq!(token, "FOO"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_missing_freq() {
        let err = "COUNT=5".parse::<RecurrenceRule>().unwrap_err();
        match err {
            AgentCalError::InvalidRecurrenceRule { token, .. } => assert_eq!(token, "FREQ"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_bad_weekday() {
        let err = "FREQ=WEEKLY;BYDAY=MO,XX".parse::<RecurrenceRule>().unwrap_err();
        match err {
            AgentCalError::InvalidRecurrenceRule { token, .. } => assert_eq!(token, "XX"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_count_with_until() {
        assert!("FREQ=DAILY;COUNT=3;UNTIL=20250401"
            .parse::<RecurrenceRule>()
            .is_err());
    }

    #[test]
    fn rejects_byday_on_monthly() {
        assert!("FREQ=MONTHLY;BYDAY=MO".parse::<RecurrenceRule>().is_err());
    }

    #[test]
    fn rejects_zero_count_and_missing_equals() {
        assert!("FREQ=DAILY;COUNT=0".parse::<RecurrenceRule>().is_err());
        assert!("FREQ=DAILY;COUNT".parse::<RecurrenceRule>().is_err());
    }

    #[test]
    fn daily_count_five() {
        let occs: Vec<_> = occurrences(
            &rule("FREQ=DAILY;COUNT=5"),
            utc(2025, 3, 1, 9, 0),
            utc(2025, 3, 1, 10, 0),
            chrono_tz::UTC,
            utc(2025, 6, 1, 0, 0),
        )
        .collect();
        assert_eq!(occs.len(), 5);
        assert_eq!(occs[0].key, date(2025, 3, 1));
        assert_eq!(occs[4].key, date(2025, 3, 5));
        for occ in &occs {
            assert_eq!(occ.end - occ.start, Duration::hours(1));
        }
    }

    #[test]
    fn weekday_filter_skips_weekend_anchor() {
        // 2025-03-01 is a Saturday; the first weekday occurrence is Monday.
        let occs: Vec<_> = occurrences(
            &rule("FREQ=DAILY;BYDAY=MO,TU,WE,TH,FR;COUNT=3"),
            utc(2025, 3, 1, 9, 0),
            utc(2025, 3, 1, 9, 30),
            chrono_tz::UTC,
            utc(2025, 6, 1, 0, 0),
        )
        .collect();
        let keys: Vec<_> = occs.iter().map(|o| o.key).collect();
        assert_eq!(
            keys,
            vec![date(2025, 3, 3), date(2025, 3, 4), date(2025, 3, 5)]
        );
    }

    #[test]
    fn weekly_repeats_on_anchor_weekday() {
        // 2025-03-04 is a Tuesday.
        let occs: Vec<_> = occurrences(
            &rule("FREQ=WEEKLY;COUNT=3"),
            utc(2025, 3, 4, 12, 0),
            utc(2025, 3, 4, 13, 0),
            chrono_tz::UTC,
            utc(2025, 6, 1, 0, 0),
        )
        .collect();
        let keys: Vec<_> = occs.iter().map(|o| o.key).collect();
        assert_eq!(
            keys,
            vec![date(2025, 3, 4), date(2025, 3, 11), date(2025, 3, 18)]
        );
    }

    #[test]
    fn monthly_on_31st_skips_short_months() {
        let occs: Vec<_> = occurrences(
            &rule("FREQ=MONTHLY"),
            utc(2025, 1, 31, 8, 0),
            utc(2025, 1, 31, 9, 0),
            chrono_tz::UTC,
            utc(2025, 6, 15, 0, 0),
        )
        .collect();
        let keys: Vec<_> = occs.iter().map(|o| o.key).collect();
        assert_eq!(
            keys,
            vec![date(2025, 1, 31), date(2025, 3, 31), date(2025, 5, 31)]
        );
    }

    #[test]
    fn until_is_inclusive() {
        let occs: Vec<_> = occurrences(
            &rule("FREQ=DAILY;UNTIL=20250303"),
            utc(2025, 3, 1, 9, 0),
            utc(2025, 3, 1, 10, 0),
            chrono_tz::UTC,
            utc(2025, 6, 1, 0, 0),
        )
        .collect();
        assert_eq!(occs.len(), 3);
        assert_eq!(occs.last().unwrap().key, date(2025, 3, 3));
    }

    #[test]
    fn horizon_bounds_unbounded_rules() {
        let occs: Vec<_> = occurrences(
            &rule("FREQ=DAILY"),
            utc(2025, 3, 1, 9, 0),
            utc(2025, 3, 1, 10, 0),
            chrono_tz::UTC,
            utc(2025, 3, 10, 23, 0),
        )
        .collect();
        assert_eq!(occs.len(), 10);
    }

    #[test]
    fn dst_transition_keeps_wall_time() {
        // US DST starts 2025-03-09: 09:00 New York goes from UTC-5 to UTC-4.
        let tz: Tz = "America/New_York".parse().unwrap();
        let anchor = tz
            .with_ymd_and_hms(2025, 3, 8, 9, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let occs: Vec<_> = occurrences(
            &rule("FREQ=DAILY;COUNT=2"),
            anchor,
            anchor + Duration::hours(1),
            tz,
            utc(2025, 6, 1, 0, 0),
        )
        .collect();
        assert_eq!(occs[0].start.hour(), 14);
        assert_eq!(occs[1].start.hour(), 13);
        for occ in &occs {
            assert_eq!(occ.start.with_timezone(&tz).hour(), 9);
        }
    }

    #[test]
    fn expansion_is_restartable() {
        let r = rule("FREQ=WEEKLY;BYDAY=MO,WE;COUNT=6");
        let run = || -> Vec<Occurrence> {
            occurrences(
                &r,
                utc(2025, 3, 3, 15, 0),
                utc(2025, 3, 3, 16, 0),
                chrono_tz::UTC,
                utc(2025, 9, 1, 0, 0),
            )
            .collect()
        };
        assert_eq!(run(), run());
    }
}
