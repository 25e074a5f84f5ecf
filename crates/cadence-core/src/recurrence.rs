use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

use crate::models::{Frequency, RecurrenceRule};

/// Date-only key for a timestamp. Every date-equality decision in the engine
/// (exceptions, holidays, rule end bounds, split points) goes through this
/// one helper so that comparisons cannot drift between representations.
#[inline]
pub fn date_key(dt: DateTime<Utc>) -> NaiveDate {
    dt.date_naive()
}

/// Normalizes a timestamp to UTC midnight, the fixed reference offset for
/// exception dates.
#[inline]
pub fn to_utc_midnight(dt: DateTime<Utc>) -> DateTime<Utc> {
    date_key(dt).and_hms_opt(0, 0, 0).unwrap().and_utc()
}

/// Why an expansion fell back to the entry's own start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradeReason {
    ZeroInterval,
    InvalidDayOfMonth(u32),
    InvalidMonth(u32),
    EndBeforeStart,
    EmptyWeekdaySet,
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeReason::ZeroInterval => write!(f, "interval must be at least 1"),
            DegradeReason::InvalidDayOfMonth(d) => write!(f, "day-of-month {} out of range", d),
            DegradeReason::InvalidMonth(m) => write!(f, "month {} out of range", m),
            DegradeReason::EndBeforeStart => write!(f, "rule ends before it starts"),
            DegradeReason::EmptyWeekdaySet => write!(f, "weekday set is empty"),
        }
    }
}

/// Result of expanding a rule over a query window.
///
/// A malformed rule never errors and never produces an empty result: the
/// expansion degrades to the entry's single literal start, and `degraded`
/// records why, so callers and tests can tell the fallback from a clean run
/// instead of inferring it from output length.
#[derive(Debug, Clone)]
pub struct Expansion {
    /// Ordered occurrence start timestamps.
    pub starts: Vec<DateTime<Utc>>,
    pub degraded: Option<DegradeReason>,
}

impl Expansion {
    fn clean(starts: Vec<DateTime<Utc>>) -> Self {
        Self {
            starts,
            degraded: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Expansion policy knobs shared by the generator and the mutation engine.
#[derive(Debug, Clone)]
pub struct RecurrenceConfig {
    /// Hard cap on occurrences produced for a single window.
    pub max_occurrences_per_window: usize,
    /// How far [`next_occurrence_after`] searches for a promotion candidate.
    pub promotion_horizon_days: i64,
    /// Upper bound on the day-by-day scan, guarding open-ended rules against
    /// absurd windows.
    pub max_scan_days: i64,
}

impl Default for RecurrenceConfig {
    fn default() -> Self {
        Self {
            max_occurrences_per_window: 1000,
            promotion_horizon_days: 365,
            max_scan_days: 36_600,
        }
    }
}

/// Expands a recurrence rule into the ordered occurrence starts that fall in
/// `[window_start, window_end]`.
///
/// The rule's own start date is never part of the output — the generator
/// produces only the occurrences *beyond* the master's literal first
/// instance. Each candidate date carries the entry's original time of day.
/// Dates matching an exception or a supplied holiday are removed by
/// date-only comparison.
///
/// With no rule, the entry's own start is returned (the degenerate
/// single-occurrence case). A rule that parsed but is semantically invalid
/// degrades the same way, with a warning logged and
/// [`Expansion::degraded`] set.
pub fn expand(
    rule: Option<&RecurrenceRule>,
    entry_start: DateTime<Utc>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    holidays: &[NaiveDate],
    config: &RecurrenceConfig,
) -> Expansion {
    let Some(rule) = rule else {
        return Expansion::clean(vec![entry_start]);
    };

    match expand_rule(rule, entry_start, window_start, window_end, holidays, config) {
        Ok(starts) => Expansion::clean(starts),
        Err(reason) => {
            warn!(%reason, "recurrence rule rejected, falling back to the entry's own start");
            Expansion {
                starts: vec![entry_start],
                degraded: Some(reason),
            }
        }
    }
}

fn validate(rule: &RecurrenceRule) -> Result<(), DegradeReason> {
    if rule.interval == 0 {
        return Err(DegradeReason::ZeroInterval);
    }
    if let Some(day) = rule.day_of_month {
        if !(1..=31).contains(&day) {
            return Err(DegradeReason::InvalidDayOfMonth(day));
        }
    }
    if let Some(month) = rule.month_of_year {
        if !(1..=12).contains(&month) {
            return Err(DegradeReason::InvalidMonth(month));
        }
    }
    if let Some(ends_on) = rule.ends_on {
        if date_key(ends_on) < date_key(rule.starts_on) {
            return Err(DegradeReason::EndBeforeStart);
        }
    }
    if let Some(days) = &rule.days_of_week {
        if days.is_empty() {
            return Err(DegradeReason::EmptyWeekdaySet);
        }
    }
    Ok(())
}

fn expand_rule(
    rule: &RecurrenceRule,
    entry_start: DateTime<Utc>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    holidays: &[NaiveDate],
    config: &RecurrenceConfig,
) -> Result<Vec<DateTime<Utc>>, DegradeReason> {
    validate(rule)?;

    let start_date = date_key(rule.starts_on);
    let time_of_day = entry_start.time();
    let exception_dates: HashSet<NaiveDate> =
        rule.exceptions.iter().map(|dt| date_key(*dt)).collect();
    let holiday_dates: HashSet<NaiveDate> = holidays.iter().copied().collect();

    let mut scan_end = date_key(window_end);
    if let Some(ends_on) = rule.ends_on {
        scan_end = scan_end.min(date_key(ends_on));
    }
    let scan_cap = start_date + Duration::days(config.max_scan_days);
    scan_end = scan_end.min(scan_cap);

    let mut out = Vec::new();
    // The master's own start occupies the first pattern slot; `count` bounds
    // the pattern as a whole, so generation may emit at most count - 1 more.
    let mut produced: u32 = 1;
    let mut date = start_date.succ_opt().unwrap_or(start_date);

    while date <= scan_end {
        if !matches_pattern(rule, start_date, date) {
            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
            continue;
        }

        if let Some(count) = rule.count {
            if produced >= count {
                break;
            }
        }
        // Pattern dates count against `count` even when excluded or outside
        // the window.
        produced += 1;

        let start = date.and_time(time_of_day).and_utc();
        if start > window_end {
            break;
        }
        if start >= window_start
            && !exception_dates.contains(&date)
            && !holiday_dates.contains(&date)
        {
            out.push(start);
            if out.len() >= config.max_occurrences_per_window {
                break;
            }
        }

        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    Ok(out)
}

/// Whether `date` belongs to the rule's pattern, judged relative to the
/// rule's start date. The start date itself is handled by the caller and
/// never reaches this check.
fn matches_pattern(rule: &RecurrenceRule, start_date: NaiveDate, date: NaiveDate) -> bool {
    let interval = i64::from(rule.interval);
    match rule.frequency {
        Frequency::Daily => (date - start_date).num_days() % interval == 0,
        Frequency::Weekly => {
            let aligned = week_index(start_date, date) % interval == 0;
            match &rule.days_of_week {
                Some(days) => aligned && days.contains(&date.weekday()),
                None => aligned && date.weekday() == start_date.weekday(),
            }
        }
        Frequency::Monthly => {
            let wanted_day = rule.day_of_month.unwrap_or(start_date.day());
            date.day() == wanted_day && month_offset(start_date, date) % interval == 0
        }
        Frequency::Yearly => {
            let wanted_month = rule.month_of_year.unwrap_or(start_date.month());
            let wanted_day = rule.day_of_month.unwrap_or(start_date.day());
            date.month() == wanted_month
                && date.day() == wanted_day
                && i64::from(date.year() - start_date.year()) % interval == 0
        }
    }
}

/// Whole weeks between the ISO weeks containing the two dates.
fn week_index(start_date: NaiveDate, date: NaiveDate) -> i64 {
    let start_week = start_date - Duration::days(i64::from(start_date.weekday().num_days_from_monday()));
    let this_week = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    (this_week - start_week).num_days() / 7
}

fn month_offset(start_date: NaiveDate, date: NaiveDate) -> i64 {
    i64::from(date.year() - start_date.year()) * 12 + i64::from(date.month() as i32 - start_date.month() as i32)
}

/// Finds the next generated occurrence strictly after `after`, searching up
/// to the configured promotion horizon. Exceptions are skipped like in any
/// expansion. Returns `None` when the series has ended, the horizon is
/// exhausted, or the rule degrades.
pub fn next_occurrence_after(
    rule: &RecurrenceRule,
    entry_start: DateTime<Utc>,
    after: DateTime<Utc>,
    config: &RecurrenceConfig,
) -> Option<DateTime<Utc>> {
    let horizon = after + Duration::days(config.promotion_horizon_days);
    let expansion = expand(Some(rule), entry_start, after, horizon, &[], config);
    if expansion.is_degraded() {
        return None;
    }
    expansion.starts.into_iter().find(|start| *start > after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecurrenceRule;
    use chrono::{TimeZone, Weekday};
    use proptest::prelude::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    fn day(y: i32, mo: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap()
    }

    fn cfg() -> RecurrenceConfig {
        RecurrenceConfig::default()
    }

    #[test]
    fn no_rule_yields_single_literal_start() {
        let start = ts(2024, 1, 15, 9);
        let expansion = expand(None, start, ts(2024, 1, 1, 0), ts(2024, 2, 1, 0), &[], &cfg());
        assert_eq!(expansion.starts, vec![start]);
        assert!(!expansion.is_degraded());
    }

    #[test]
    fn daily_rule_excludes_master_start_date() {
        // rule = daily/1 starting 2024-01-15, window [01-14, 01-20]
        let rule = RecurrenceRule::daily(ts(2024, 1, 15, 9));
        let expansion = expand(
            Some(&rule),
            ts(2024, 1, 15, 9),
            ts(2024, 1, 14, 0),
            ts(2024, 1, 20, 23),
            &[],
            &cfg(),
        );
        assert_eq!(
            expansion.starts,
            vec![
                ts(2024, 1, 16, 9),
                ts(2024, 1, 17, 9),
                ts(2024, 1, 18, 9),
                ts(2024, 1, 19, 9),
                ts(2024, 1, 20, 9),
            ]
        );
        assert!(!expansion.is_degraded());
    }

    #[test]
    fn exception_removes_matching_date_regardless_of_time() {
        let mut rule = RecurrenceRule::daily(ts(2024, 1, 15, 9));
        // Exception carries a different time of day than the occurrences.
        rule.add_exception(ts(2024, 1, 17, 23));
        let expansion = expand(
            Some(&rule),
            ts(2024, 1, 15, 9),
            ts(2024, 1, 14, 0),
            ts(2024, 1, 19, 23),
            &[],
            &cfg(),
        );
        assert_eq!(
            expansion.starts,
            vec![ts(2024, 1, 16, 9), ts(2024, 1, 18, 9), ts(2024, 1, 19, 9)]
        );
    }

    #[test]
    fn holiday_exclusions_apply_by_date() {
        let rule = RecurrenceRule::daily(ts(2024, 1, 15, 9));
        let holidays = vec![day(2024, 1, 16), day(2024, 1, 18)];
        let expansion = expand(
            Some(&rule),
            ts(2024, 1, 15, 9),
            ts(2024, 1, 14, 0),
            ts(2024, 1, 19, 23),
            &holidays,
            &cfg(),
        );
        assert_eq!(expansion.starts, vec![ts(2024, 1, 17, 9), ts(2024, 1, 19, 9)]);
    }

    #[test]
    fn count_bounds_master_plus_generated() {
        let mut rule = RecurrenceRule::daily(ts(2024, 1, 15, 9));
        rule.count = Some(3);
        let expansion = expand(
            Some(&rule),
            ts(2024, 1, 15, 9),
            ts(2024, 1, 1, 0),
            ts(2024, 3, 1, 0),
            &[],
            &cfg(),
        );
        // Master is slot one; only two more may be generated.
        assert_eq!(expansion.starts, vec![ts(2024, 1, 16, 9), ts(2024, 1, 17, 9)]);
    }

    #[test]
    fn count_consumed_by_pattern_dates_before_window() {
        let mut rule = RecurrenceRule::daily(ts(2024, 1, 15, 9));
        rule.count = Some(4);
        // Window starts after the first two generated slots are spent.
        let expansion = expand(
            Some(&rule),
            ts(2024, 1, 15, 9),
            ts(2024, 1, 18, 0),
            ts(2024, 3, 1, 0),
            &[],
            &cfg(),
        );
        assert_eq!(expansion.starts, vec![ts(2024, 1, 18, 9)]);
    }

    #[test]
    fn interval_skips_units() {
        let mut rule = RecurrenceRule::daily(ts(2024, 1, 15, 9));
        rule.interval = 3;
        let expansion = expand(
            Some(&rule),
            ts(2024, 1, 15, 9),
            ts(2024, 1, 14, 0),
            ts(2024, 1, 25, 0),
            &[],
            &cfg(),
        );
        assert_eq!(
            expansion.starts,
            vec![ts(2024, 1, 18, 9), ts(2024, 1, 21, 9), ts(2024, 1, 24, 9)]
        );
    }

    #[test]
    fn weekly_with_day_set() {
        // 2024-01-15 is a Monday.
        let mut rule = RecurrenceRule::weekly(ts(2024, 1, 15, 9));
        rule.days_of_week = Some(vec![Weekday::Mon, Weekday::Thu]);
        let expansion = expand(
            Some(&rule),
            ts(2024, 1, 15, 9),
            ts(2024, 1, 14, 0),
            ts(2024, 1, 28, 23),
            &[],
            &cfg(),
        );
        assert_eq!(
            expansion.starts,
            vec![ts(2024, 1, 18, 9), ts(2024, 1, 22, 9), ts(2024, 1, 25, 9)]
        );
    }

    #[test]
    fn biweekly_alignment_counts_whole_weeks() {
        let mut rule = RecurrenceRule::weekly(ts(2024, 1, 15, 9));
        rule.interval = 2;
        let expansion = expand(
            Some(&rule),
            ts(2024, 1, 15, 9),
            ts(2024, 1, 14, 0),
            ts(2024, 2, 15, 0),
            &[],
            &cfg(),
        );
        assert_eq!(expansion.starts, vec![ts(2024, 1, 29, 9), ts(2024, 2, 12, 9)]);
    }

    #[test]
    fn monthly_on_day_of_month() {
        let mut rule = RecurrenceRule::new(Frequency::Monthly, ts(2024, 1, 31, 9));
        rule.day_of_month = Some(31);
        let expansion = expand(
            Some(&rule),
            ts(2024, 1, 31, 9),
            ts(2024, 1, 1, 0),
            ts(2024, 6, 1, 0),
            &[],
            &cfg(),
        );
        // Months without a 31st simply produce nothing.
        assert_eq!(expansion.starts, vec![ts(2024, 3, 31, 9), ts(2024, 5, 31, 9)]);
    }

    #[test]
    fn yearly_with_month_and_day() {
        let mut rule = RecurrenceRule::new(Frequency::Yearly, ts(2024, 3, 10, 12));
        rule.month_of_year = Some(3);
        rule.day_of_month = Some(10);
        let expansion = expand(
            Some(&rule),
            ts(2024, 3, 10, 12),
            ts(2024, 1, 1, 0),
            ts(2027, 1, 1, 0),
            &[],
            &cfg(),
        );
        assert_eq!(expansion.starts, vec![ts(2025, 3, 10, 12), ts(2026, 3, 10, 12)]);
    }

    #[test]
    fn rule_end_bounds_generation_by_date() {
        let mut rule = RecurrenceRule::daily(ts(2024, 1, 15, 9));
        rule.ends_on = Some(ts(2024, 1, 17, 0));
        let expansion = expand(
            Some(&rule),
            ts(2024, 1, 15, 9),
            ts(2024, 1, 14, 0),
            ts(2024, 2, 1, 0),
            &[],
            &cfg(),
        );
        assert_eq!(expansion.starts, vec![ts(2024, 1, 16, 9), ts(2024, 1, 17, 9)]);
    }

    #[test]
    fn malformed_rules_degrade_to_single_start() {
        let start = ts(2024, 1, 15, 9);
        let window = (ts(2024, 1, 1, 0), ts(2024, 2, 1, 0));

        let mut zero_interval = RecurrenceRule::daily(start);
        zero_interval.interval = 0;
        let e = expand(Some(&zero_interval), start, window.0, window.1, &[], &cfg());
        assert_eq!(e.starts, vec![start]);
        assert_eq!(e.degraded, Some(DegradeReason::ZeroInterval));

        let mut bad_day = RecurrenceRule::new(Frequency::Monthly, start);
        bad_day.day_of_month = Some(42);
        let e = expand(Some(&bad_day), start, window.0, window.1, &[], &cfg());
        assert_eq!(e.starts, vec![start]);
        assert_eq!(e.degraded, Some(DegradeReason::InvalidDayOfMonth(42)));

        let mut inverted = RecurrenceRule::daily(start);
        inverted.ends_on = Some(ts(2024, 1, 1, 0));
        let e = expand(Some(&inverted), start, window.0, window.1, &[], &cfg());
        assert_eq!(e.starts, vec![start]);
        assert_eq!(e.degraded, Some(DegradeReason::EndBeforeStart));

        let mut no_days = RecurrenceRule::weekly(start);
        no_days.days_of_week = Some(vec![]);
        let e = expand(Some(&no_days), start, window.0, window.1, &[], &cfg());
        assert_eq!(e.degraded, Some(DegradeReason::EmptyWeekdaySet));
    }

    #[test]
    fn next_occurrence_skips_exceptions() {
        let mut rule = RecurrenceRule::daily(ts(2024, 1, 15, 9));
        rule.add_exception(ts(2024, 1, 16, 0));
        let next = next_occurrence_after(&rule, ts(2024, 1, 15, 9), ts(2024, 1, 15, 9), &cfg());
        assert_eq!(next, Some(ts(2024, 1, 17, 9)));
    }

    #[test]
    fn next_occurrence_none_past_series_end() {
        let mut rule = RecurrenceRule::daily(ts(2024, 1, 15, 9));
        rule.ends_on = Some(ts(2024, 1, 16, 0));
        let next = next_occurrence_after(&rule, ts(2024, 1, 15, 9), ts(2024, 1, 16, 9), &cfg());
        assert_eq!(next, None);
    }

    proptest! {
        #[test]
        fn master_start_never_generated(
            interval in 1u32..5,
            day_offset in 0i64..60,
            window_days in 1i64..120,
        ) {
            let start = ts(2024, 1, 1, 8) + Duration::days(day_offset);
            let mut rule = RecurrenceRule::daily(start);
            rule.interval = interval;
            let window_start = start - Duration::days(7);
            let window_end = start + Duration::days(window_days);
            let expansion = expand(Some(&rule), start, window_start, window_end, &[], &cfg());
            prop_assert!(!expansion.starts.iter().any(|s| date_key(*s) == date_key(start)));
        }

        #[test]
        fn expansion_is_idempotent_and_ordered(
            interval in 1u32..4,
            window_days in 1i64..90,
        ) {
            let start = ts(2024, 2, 1, 10);
            let mut rule = RecurrenceRule::weekly(start);
            rule.interval = interval;
            let window_end = start + Duration::days(window_days);
            let first = expand(Some(&rule), start, start, window_end, &[], &cfg());
            let second = expand(Some(&rule), start, start, window_end, &[], &cfg());
            prop_assert_eq!(&first.starts, &second.starts);
            let mut sorted = first.starts.clone();
            sorted.sort();
            prop_assert_eq!(sorted, first.starts);
        }
    }
}
