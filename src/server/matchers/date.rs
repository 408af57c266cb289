use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, Timelike, Utc};

use crate::server::matchers::{definition::PatternDefinition, Error, MatchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeComparison {
    Before,
    After,
    EqualTo,
}

impl DateTimeComparison {
    pub fn operator(&self) -> &'static str {
        match self {
            DateTimeComparison::Before => "before",
            DateTimeComparison::After => "after",
            DateTimeComparison::EqualTo => "equalToDateTime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl DateTimeUnit {
    pub fn parse(unit: &str) -> Option<Self> {
        let unit = unit.trim().to_lowercase();
        let unit = unit.strip_suffix('s').unwrap_or(&unit);

        match unit {
            "second" => Some(DateTimeUnit::Seconds),
            "minute" => Some(DateTimeUnit::Minutes),
            "hour" => Some(DateTimeUnit::Hours),
            "day" => Some(DateTimeUnit::Days),
            "week" => Some(DateTimeUnit::Weeks),
            "month" => Some(DateTimeUnit::Months),
            "year" => Some(DateTimeUnit::Years),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DateTimeUnit::Seconds => "seconds",
            DateTimeUnit::Minutes => "minutes",
            DateTimeUnit::Hours => "hours",
            DateTimeUnit::Days => "days",
            DateTimeUnit::Weeks => "weeks",
            DateTimeUnit::Months => "months",
            DateTimeUnit::Years => "years",
        }
    }
}

/// Rounds a date/time to a calendar boundary. Every variant lands at midnight except
/// `FirstMinuteOfHour`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    FirstMinuteOfHour,
    FirstHourOfDay,
    FirstDayOfMonth,
    FirstDayOfNextMonth,
    LastDayOfMonth,
    FirstDayOfYear,
    FirstDayOfNextYear,
    LastDayOfYear,
}

impl Truncation {
    /// Accepts `first day of month`, `FIRST_DAY_OF_MONTH` and `first-day-of-month`.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace(['_', '-'], " ");

        match normalized.as_str() {
            "first minute of hour" => Some(Truncation::FirstMinuteOfHour),
            "first hour of day" => Some(Truncation::FirstHourOfDay),
            "first day of month" => Some(Truncation::FirstDayOfMonth),
            "first day of next month" => Some(Truncation::FirstDayOfNextMonth),
            "last day of month" => Some(Truncation::LastDayOfMonth),
            "first day of year" => Some(Truncation::FirstDayOfYear),
            "first day of next year" => Some(Truncation::FirstDayOfNextYear),
            "last day of year" => Some(Truncation::LastDayOfYear),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Truncation::FirstMinuteOfHour => "first minute of hour",
            Truncation::FirstHourOfDay => "first hour of day",
            Truncation::FirstDayOfMonth => "first day of month",
            Truncation::FirstDayOfNextMonth => "first day of next month",
            Truncation::LastDayOfMonth => "last day of month",
            Truncation::FirstDayOfYear => "first day of year",
            Truncation::FirstDayOfNextYear => "first day of next year",
            Truncation::LastDayOfYear => "last day of year",
        }
    }

    pub fn apply(&self, dt: DateTime<Utc>) -> DateTime<Utc> {
        let (year, month) = (dt.year(), dt.month());

        let truncated = match self {
            Truncation::FirstMinuteOfHour => dt
                .date_naive()
                .and_hms_opt(dt.hour(), 0, 0)
                .map(|n| n.and_utc()),
            Truncation::FirstHourOfDay => midnight(dt.date_naive()),
            Truncation::FirstDayOfMonth => NaiveDate::from_ymd_opt(year, month, 1).and_then(midnight),
            Truncation::FirstDayOfNextMonth => first_of_next_month(year, month).and_then(midnight),
            Truncation::LastDayOfMonth => first_of_next_month(year, month)
                .and_then(|d| d.pred_opt())
                .and_then(midnight),
            Truncation::FirstDayOfYear => NaiveDate::from_ymd_opt(year, 1, 1).and_then(midnight),
            Truncation::FirstDayOfNextYear => {
                NaiveDate::from_ymd_opt(year + 1, 1, 1).and_then(midnight)
            }
            Truncation::LastDayOfYear => NaiveDate::from_ymd_opt(year, 12, 31).and_then(midnight),
        };

        truncated.unwrap_or(dt)
    }
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|n| n.and_utc())
}

fn first_of_next_month(year: i32, month: u32) -> Option<NaiveDate> {
    if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ExpectedDateTime {
    Now(Option<(i64, DateTimeUnit)>),
    Literal(DateTime<Utc>),
}

/// Compares a date/time value against a literal or a `now +/- offset` expression.
///
/// Evaluation order: parse, apply the offset to the expected value, truncate both, compare.
#[derive(Debug, Clone, PartialEq)]
pub struct DateTimePattern {
    comparison: DateTimeComparison,
    expected_raw: String,
    expected: ExpectedDateTime,
    offset: Option<(i64, DateTimeUnit)>,
    expected_format: Option<String>,
    actual_format: Option<String>,
    truncate_expected: Option<Truncation>,
    truncate_actual: Option<Truncation>,
}

impl DateTimePattern {
    pub fn new(comparison: DateTimeComparison, expected: &str) -> Result<Self, Error> {
        Self::with_expected_format(comparison, expected, None)
    }

    /// Like [`DateTimePattern::new`], but a literal expected value is parsed with `format`
    /// (a chrono format string, `unix` or `epoch`). `now` expressions ignore the format.
    pub fn with_expected_format(
        comparison: DateTimeComparison,
        expected: &str,
        format: Option<&str>,
    ) -> Result<Self, Error> {
        let parsed = parse_expected(expected, format).ok_or_else(|| {
            let hint = match format {
                Some(f) => format!("expected a date/time in format '{}' or 'now'", f),
                None => "expected an ISO-8601 date/time or 'now [+|-]<amount> <unit>'".to_string(),
            };
            Error::InvalidDateTime(expected.to_string(), hint)
        })?;

        Ok(Self {
            comparison,
            expected_raw: expected.to_string(),
            expected: parsed,
            offset: None,
            expected_format: format.map(str::to_string),
            actual_format: None,
            truncate_expected: None,
            truncate_actual: None,
        })
    }

    pub fn with_offset(mut self, amount: i64, unit: DateTimeUnit) -> Self {
        self.offset = Some((amount, unit));
        self
    }

    pub fn with_actual_format<S: Into<String>>(mut self, format: S) -> Self {
        self.actual_format = Some(format.into());
        self
    }

    pub fn truncate_expected(mut self, truncation: Truncation) -> Self {
        self.truncate_expected = Some(truncation);
        self
    }

    pub fn truncate_actual(mut self, truncation: Truncation) -> Self {
        self.truncate_actual = Some(truncation);
        self
    }

    pub fn comparison(&self) -> DateTimeComparison {
        self.comparison
    }

    /// The expected instant at this moment, offset and truncated.
    pub fn expected_instant(&self) -> Option<DateTime<Utc>> {
        let mut expected = match &self.expected {
            ExpectedDateTime::Literal(dt) => *dt,
            ExpectedDateTime::Now(inline_offset) => match inline_offset {
                None => Utc::now(),
                Some((amount, unit)) => apply_offset(Utc::now(), *amount, *unit)?,
            },
        };

        if let Some((amount, unit)) = self.offset {
            expected = apply_offset(expected, amount, unit)?;
        }

        Some(match self.truncate_expected {
            None => expected,
            Some(t) => t.apply(expected),
        })
    }

    pub fn evaluate(&self, actual: &str) -> MatchResult {
        let actual = match parse_formatted(actual, self.actual_format.as_deref()) {
            Some(dt) => dt,
            None => return MatchResult::NO_MATCH,
        };

        let expected = match self.expected_instant() {
            Some(dt) => dt,
            None => return MatchResult::NO_MATCH,
        };

        let actual = match self.truncate_actual {
            None => actual,
            Some(t) => t.apply(actual),
        };

        MatchResult::of(match self.comparison {
            DateTimeComparison::Before => actual < expected,
            DateTimeComparison::After => actual > expected,
            DateTimeComparison::EqualTo => actual == expected,
        })
    }

    pub fn describe(&self) -> String {
        let mut description = self.expected_raw.clone();

        if let Some((amount, unit)) = self.offset {
            description.push_str(&format!(" {:+} {}", amount, unit.as_str()));
        }

        if let Some(t) = self.truncate_expected {
            description.push_str(&format!(" (truncated to {})", t.as_str()));
        }

        description
    }

    pub(crate) fn write_definition(&self, def: &mut PatternDefinition) {
        let expected = Some(self.expected_raw.clone());
        match self.comparison {
            DateTimeComparison::Before => def.before = expected,
            DateTimeComparison::After => def.after = expected,
            DateTimeComparison::EqualTo => def.equal_to_date_time = expected,
        }

        def.expected_format = self.expected_format.clone();
        def.actual_format = self.actual_format.clone();
        if let Some((amount, unit)) = self.offset {
            def.expected_offset = Some(amount);
            def.expected_offset_unit = Some(unit.as_str().to_string());
        }
        def.truncate_expected = self.truncate_expected.map(|t| t.as_str().to_string());
        def.truncate_actual = self.truncate_actual.map(|t| t.as_str().to_string());
    }
}

fn parse_expected(expected: &str, format: Option<&str>) -> Option<ExpectedDateTime> {
    let trimmed = expected.trim();

    if let Some(rest) = trimmed.to_lowercase().strip_prefix("now") {
        let rest = rest.trim();
        if rest.is_empty() {
            return Some(ExpectedDateTime::Now(None));
        }

        let (sign, rest) = match rest.chars().next()? {
            '+' => (1, &rest[1..]),
            '-' => (-1, &rest[1..]),
            _ => return None,
        };

        let rest = rest.trim_start();
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let amount: i64 = rest[..digits_end].parse().ok()?;
        let unit = DateTimeUnit::parse(&rest[digits_end..])?;

        return Some(ExpectedDateTime::Now(Some((sign * amount, unit))));
    }

    parse_formatted(trimmed, format).map(ExpectedDateTime::Literal)
}

fn apply_offset(dt: DateTime<Utc>, amount: i64, unit: DateTimeUnit) -> Option<DateTime<Utc>> {
    let seconds_per_unit = match unit {
        DateTimeUnit::Seconds => 1,
        DateTimeUnit::Minutes => 60,
        DateTimeUnit::Hours => 3_600,
        DateTimeUnit::Days => 86_400,
        DateTimeUnit::Weeks => 604_800,
        DateTimeUnit::Months => return add_months(dt, amount),
        DateTimeUnit::Years => return add_months(dt, amount.checked_mul(12)?),
    };

    let seconds = amount.checked_mul(seconds_per_unit)?;
    if seconds.unsigned_abs() > 1_000_000_000_000 {
        return None;
    }

    dt.checked_add_signed(Duration::seconds(seconds))
}

fn add_months(dt: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        dt.checked_add_months(magnitude)
    } else {
        dt.checked_sub_months(magnitude)
    }
}

/// Parses ISO-8601 / RFC 3339 date-times, dates and RFC 2822 (HTTP) dates. Values without an
/// offset are taken as UTC.
pub fn parse_date_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return midnight(date);
    }

    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parses a value with an optional format. `unix` and `epoch` are seconds and milliseconds
/// since the epoch; any other format is a chrono format string.
fn parse_formatted(value: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value.trim();

    let format = match format {
        None => return parse_date_time(value),
        Some(f) => f,
    };

    match format {
        "unix" => return DateTime::from_timestamp(value.parse().ok()?, 0),
        "epoch" => return DateTime::from_timestamp_millis(value.parse().ok()?),
        _ => {}
    }

    if let Ok(dt) = DateTime::parse_from_str(value, format) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
        return Some(dt.and_utc());
    }

    NaiveDate::parse_from_str(value, format)
        .ok()
        .and_then(midnight)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        parse_date_time(s).unwrap()
    }

    #[test]
    fn literal_comparisons() {
        let before = DateTimePattern::new(DateTimeComparison::Before, "2021-06-01T00:00:00Z").unwrap();
        assert!(before.evaluate("2021-05-31T23:59:59Z").is_exact_match());
        assert!(!before.evaluate("2021-06-01T00:00:01Z").is_exact_match());

        let after = DateTimePattern::new(DateTimeComparison::After, "2021-06-01").unwrap();
        assert!(after.evaluate("2021-06-01T10:00:00+02:00").is_exact_match());

        let equal = DateTimePattern::new(DateTimeComparison::EqualTo, "2021-06-01T12:00:00Z").unwrap();
        assert!(equal.evaluate("2021-06-01T14:00:00+02:00").is_exact_match());
    }

    #[test]
    fn expected_literals_use_their_own_format() {
        let before = DateTimePattern::with_expected_format(
            DateTimeComparison::Before,
            "01/06/2021",
            Some("%d/%m/%Y"),
        )
        .unwrap()
        .with_actual_format("%Y%m%d");

        assert!(before.evaluate("20210531").is_exact_match());
        assert!(!before.evaluate("20210602").is_exact_match());

        assert!(DateTimePattern::new(DateTimeComparison::Before, "01/06/2021").is_err());
        assert!(DateTimePattern::with_expected_format(
            DateTimeComparison::Before,
            "2021-06-01",
            Some("%d/%m/%Y"),
        )
        .is_err());

        let epoch =
            DateTimePattern::with_expected_format(DateTimeComparison::After, "1622505600", Some("unix"))
                .unwrap();
        assert!(epoch.evaluate("2021-06-01T00:00:01Z").is_exact_match());
        assert_eq!(
            epoch.expected_instant(),
            Some(utc("2021-06-01T00:00:00Z"))
        );
    }

    #[test]
    fn unparsable_actual_is_a_mismatch() {
        let p = DateTimePattern::new(DateTimeComparison::Before, "now").unwrap();
        assert_eq!(p.evaluate("yesterday-ish"), MatchResult::NO_MATCH);
    }

    #[test]
    fn now_with_offset() {
        let p = DateTimePattern::new(DateTimeComparison::After, "now -1 days").unwrap();
        let recent = (Utc::now() - Duration::hours(1)).to_rfc3339();
        let old = (Utc::now() - Duration::days(3)).to_rfc3339();

        assert!(p.evaluate(&recent).is_exact_match());
        assert!(!p.evaluate(&old).is_exact_match());
    }

    #[test]
    fn offset_is_applied_before_truncation() {
        let p = DateTimePattern::new(DateTimeComparison::EqualTo, "2021-01-31T10:00:00Z")
            .unwrap()
            .with_offset(1, DateTimeUnit::Days)
            .truncate_expected(Truncation::FirstDayOfMonth);

        // 2021-01-31 + 1 day = 2021-02-01, truncated to the first of February.
        assert_eq!(p.expected_instant(), Some(utc("2021-02-01T00:00:00Z")));
        assert!(p.evaluate("2021-02-01").is_exact_match());
    }

    #[test]
    fn truncations() {
        let dt = utc("2020-02-14T13:45:30Z");

        assert_eq!(Truncation::FirstMinuteOfHour.apply(dt), utc("2020-02-14T13:00:00Z"));
        assert_eq!(Truncation::FirstHourOfDay.apply(dt), utc("2020-02-14T00:00:00Z"));
        assert_eq!(Truncation::FirstDayOfMonth.apply(dt), utc("2020-02-01T00:00:00Z"));
        assert_eq!(Truncation::FirstDayOfNextMonth.apply(dt), utc("2020-03-01T00:00:00Z"));
        assert_eq!(Truncation::LastDayOfMonth.apply(dt), utc("2020-02-29T00:00:00Z"));
        assert_eq!(Truncation::FirstDayOfYear.apply(dt), utc("2020-01-01T00:00:00Z"));
        assert_eq!(Truncation::FirstDayOfNextYear.apply(dt), utc("2021-01-01T00:00:00Z"));
        assert_eq!(Truncation::LastDayOfYear.apply(dt), utc("2020-12-31T00:00:00Z"));
    }

    #[test]
    fn actual_formats() {
        let p = DateTimePattern::new(DateTimeComparison::EqualTo, "2021-06-01T00:00:00Z")
            .unwrap()
            .with_actual_format("%d/%m/%Y");
        assert!(p.evaluate("01/06/2021").is_exact_match());

        let p = DateTimePattern::new(DateTimeComparison::EqualTo, "2021-06-01T00:00:00Z")
            .unwrap()
            .with_actual_format("unix");
        assert!(p.evaluate("1622505600").is_exact_match());
    }

    #[test]
    fn http_dates_are_understood() {
        let p = DateTimePattern::new(DateTimeComparison::Before, "2000-01-01").unwrap();
        assert!(p.evaluate("Tue, 15 Nov 1994 08:12:31 GMT").is_exact_match());
    }

    #[test]
    fn invalid_expected_value_fails_construction() {
        assert!(matches!(
            DateTimePattern::new(DateTimeComparison::Before, "next tuesday"),
            Err(Error::InvalidDateTime(_, _))
        ));
        assert!(DateTimePattern::new(DateTimeComparison::Before, "now + 3 fortnights").is_err());
    }
}
