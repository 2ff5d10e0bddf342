// used to order estimates
use std::cmp::Ordering;
// used to print out readable forms of a data type
use std::fmt;
// used to overload common operations for datatypes
use std::ops;

// ------------- Estimate --------------
/// Upper-bound projection of how many results a supplier or variable will
/// eventually yield. `Unbounded` stands for "nothing observed yet" as well as
/// for ratios that could not be computed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Estimate {
    Bounded(f64),
    Unbounded,
}

impl Estimate {
    /// Non-finite numbers become `Unbounded`, negative numbers are clamped to zero.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Estimate::Bounded(value.max(0.0))
        } else {
            Estimate::Unbounded
        }
    }
    pub fn is_bounded(&self) -> bool {
        matches!(self, Estimate::Bounded(_))
    }
    pub fn as_f64(&self) -> f64 {
        match self {
            Estimate::Bounded(value) => *value,
            Estimate::Unbounded => f64::INFINITY,
        }
    }
    /// Largest of the given estimates, `Unbounded` beating every bounded value.
    pub fn max_of(estimates: impl IntoIterator<Item = Estimate>) -> Option<Estimate> {
        estimates.into_iter().reduce(|a, b| if b > a { b } else { a })
    }
}
impl Default for Estimate {
    fn default() -> Self {
        Estimate::Unbounded
    }
}
impl PartialOrd for Estimate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Estimate::Unbounded, Estimate::Unbounded) => Some(Ordering::Equal),
            (Estimate::Unbounded, Estimate::Bounded(_)) => Some(Ordering::Greater),
            (Estimate::Bounded(_), Estimate::Unbounded) => Some(Ordering::Less),
            (Estimate::Bounded(a), Estimate::Bounded(b)) => a.partial_cmp(b),
        }
    }
}
impl From<u64> for Estimate {
    fn from(count: u64) -> Self {
        Estimate::Bounded(count as f64)
    }
}
impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Estimate::Bounded(value) => write!(f, "{}", value),
            Estimate::Unbounded => write!(f, "∞"),
        }
    }
}

// ------------- MatchRate --------------
/// Observed fraction of a supplier's triples that survived the join.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct MatchRate(f64);

impl MatchRate {
    pub const ZERO: MatchRate = MatchRate(0.0);

    /// `matches / triple_count`, or zero when that is not a finite number.
    pub fn observed(matches: u64, triple_count: u64) -> Self {
        Self::new(matches as f64 / triple_count as f64)
    }
    pub fn new(rate: f64) -> Self {
        if rate.is_finite() {
            MatchRate(rate)
        } else {
            MatchRate::ZERO
        }
    }
    pub fn value(&self) -> f64 {
        self.0
    }
}
impl ops::Mul<Estimate> for MatchRate {
    type Output = Estimate;
    // 0 × ∞ is not a number, so it stays unbounded as well
    fn mul(self, count: Estimate) -> Estimate {
        match count {
            Estimate::Unbounded => Estimate::Unbounded,
            Estimate::Bounded(count) => Estimate::from_f64(self.0 * count),
        }
    }
}
impl fmt::Display for MatchRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}
impl From<MatchRate> for f64 {
    fn from(r: MatchRate) -> f64 {
        r.0
    }
}
