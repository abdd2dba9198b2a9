//! Time-range scopes
//!
//! A time range lives in the state of an ordinary node under the `from` and
//! `to` keys. Nodes that own one carry the [`TimeRangeScope`] marker so that
//! descendants can find the nearest range by walking up the tree.
//!
//! Expressions follow dashboard date math: `now`, `now-6h`, `now+1d`,
//! `now/d`, `now-1d/d`, with units `s m h d w M y`. Absolute values may be
//! RFC 3339 timestamps or epoch milliseconds.

use crate::node::SceneNode;
use crate::state::StatePatch;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// State key of the range start expression
pub const FROM_KEY: &str = "from";
/// State key of the range end expression
pub const TO_KEY: &str = "to";

/// Time range errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeRangeError {
    /// Expression could not be parsed
    #[error("invalid time expression: {0:?}")]
    InvalidExpression(String),

    /// Resolved start is after resolved end
    #[error("time range start {from} is after end {to}")]
    Inverted {
        /// Resolved start
        from: DateTime<Utc>,
        /// Resolved end
        to: DateTime<Utc>,
    },
}

/// Unresolved time range, as typed by a user or stored in a dashboard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawTimeRange {
    /// Start expression
    pub from: String,
    /// End expression
    pub to: String,
}

impl RawTimeRange {
    /// Create raw range
    #[inline]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Resolve against `now`
    ///
    /// # Errors
    /// - `TimeRangeError::InvalidExpression` for unparseable bounds
    /// - `TimeRangeError::Inverted` if start resolves after end
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<TimeRange, TimeRangeError> {
        let from = parse_time_expression(&self.from, now, false)?;
        let to = parse_time_expression(&self.to, now, true)?;
        if from > to {
            return Err(TimeRangeError::Inverted { from, to });
        }
        Ok(TimeRange {
            raw: self.clone(),
            from,
            to,
        })
    }
}

impl Default for RawTimeRange {
    fn default() -> Self {
        Self::new("now-6h", "now")
    }
}

/// Resolved time range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Expressions this range was resolved from
    pub raw: RawTimeRange,
    /// Resolved start
    pub from: DateTime<Utc>,
    /// Resolved end
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Start in epoch milliseconds
    #[inline]
    #[must_use]
    pub fn from_ms(&self) -> i64 {
        self.from.timestamp_millis()
    }

    /// End in epoch milliseconds
    #[inline]
    #[must_use]
    pub fn to_ms(&self) -> i64 {
        self.to.timestamp_millis()
    }

    /// Span of the range
    #[inline]
    #[must_use]
    pub fn span(&self) -> Duration {
        self.to - self.from
    }
}

/// Parse one bound of a time range
///
/// `round_up` selects the end of the rounding unit instead of its start,
/// so that `now/d` as an end bound means "end of today".
///
/// # Errors
/// `TimeRangeError::InvalidExpression` if the text is not date math, RFC 3339
/// or epoch milliseconds
pub fn parse_time_expression(
    expr: &str,
    now: DateTime<Utc>,
    round_up: bool,
) -> Result<DateTime<Utc>, TimeRangeError> {
    let text = expr.trim();
    let invalid = || TimeRangeError::InvalidExpression(expr.to_string());

    if let Some(rest) = text.strip_prefix("now") {
        return apply_date_math(now, rest, round_up).ok_or_else(invalid);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(ms) = text.parse::<i64>() {
        return Utc.timestamp_millis_opt(ms).single().ok_or_else(invalid);
    }
    Err(invalid())
}

fn apply_date_math(mut at: DateTime<Utc>, mut ops: &str, round_up: bool) -> Option<DateTime<Utc>> {
    while let Some(op) = ops.chars().next() {
        let rest = &ops[op.len_utf8()..];
        match op {
            '/' => {
                let (unit, rest) = take_unit(rest)?;
                at = round(at, unit, round_up)?;
                ops = rest;
            }
            '+' | '-' => {
                let digits = rest.chars().take_while(char::is_ascii_digit).count();
                let amount: u32 = if digits == 0 { 1 } else { rest[..digits].parse().ok()? };
                let (unit, rest) = take_unit(&rest[digits..])?;
                at = shift(at, unit, i64::from(amount), op == '-')?;
                ops = rest;
            }
            _ => return None,
        }
    }
    Some(at)
}

fn take_unit(s: &str) -> Option<(char, &str)> {
    let unit = s.chars().next()?;
    matches!(unit, 's' | 'm' | 'h' | 'd' | 'w' | 'M' | 'y').then(|| (unit, &s[1..]))
}

fn shift(at: DateTime<Utc>, unit: char, amount: i64, subtract: bool) -> Option<DateTime<Utc>> {
    let delta = match unit {
        's' => Duration::try_seconds(amount)?,
        'm' => Duration::try_minutes(amount)?,
        'h' => Duration::try_hours(amount)?,
        'd' => Duration::try_days(amount)?,
        'w' => Duration::try_weeks(amount)?,
        'M' | 'y' => {
            let months = u32::try_from(if unit == 'y' { amount * 12 } else { amount }).ok()?;
            return if subtract {
                at.checked_sub_months(Months::new(months))
            } else {
                at.checked_add_months(Months::new(months))
            };
        }
        _ => return None,
    };
    if subtract {
        at.checked_sub_signed(delta)
    } else {
        at.checked_add_signed(delta)
    }
}

fn round(at: DateTime<Utc>, unit: char, round_up: bool) -> Option<DateTime<Utc>> {
    let start = start_of(at, unit)?;
    if !round_up {
        return Some(start);
    }
    let next = shift(start, unit, 1, false)?;
    next.checked_sub_signed(Duration::try_milliseconds(1)?)
}

fn start_of(at: DateTime<Utc>, unit: char) -> Option<DateTime<Utc>> {
    let midnight = |date: NaiveDate| date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    match unit {
        's' => at.with_nanosecond(0),
        'm' => at.with_nanosecond(0)?.with_second(0),
        'h' => at.with_nanosecond(0)?.with_second(0)?.with_minute(0),
        'd' => midnight(at.date_naive()),
        'w' => {
            let days_from_monday = i64::from(at.weekday().num_days_from_monday());
            midnight(at.date_naive() - Duration::try_days(days_from_monday)?)
        }
        'M' => midnight(NaiveDate::from_ymd_opt(at.year(), at.month(), 1)?),
        'y' => midnight(NaiveDate::from_ymd_opt(at.year(), 1, 1)?),
        _ => None,
    }
}

/// Marker extension for nodes that own a time range
#[derive(Debug, Default)]
pub struct TimeRangeScope;

impl TimeRangeScope {
    /// Make `node` a time-range scope holding `range`
    pub fn install(node: &SceneNode, range: &RawTimeRange) {
        node.insert_extension(Arc::new(TimeRangeScope));
        Self::update(node, range);
    }

    /// Replace the range held by `node`
    pub fn update(node: &SceneNode, range: &RawTimeRange) {
        node.set_state(
            StatePatch::new()
                .set(FROM_KEY, range.from.clone())
                .set(TO_KEY, range.to.clone()),
        );
    }

    /// Range held by `node`, if it has both bounds
    #[must_use]
    pub fn read(node: &SceneNode) -> Option<RawTimeRange> {
        let state = node.state();
        Some(RawTimeRange::new(state.get_str(FROM_KEY)?, state.get_str(TO_KEY)?))
    }

    /// Nearest time-range scope: `node` itself or an ancestor
    #[must_use]
    pub fn nearest(node: &SceneNode) -> Option<Arc<SceneNode>> {
        node.find_in_scope(|n| n.has_extension::<TimeRangeScope>())
    }

    /// State keys a dependent should watch
    #[must_use]
    pub fn keys() -> [&'static str; 2] {
        [FROM_KEY, TO_KEY]
    }
}
