//! Interval sets proven for a symbolic value
//!
//! A [`RangeSet`] keeps the values a bit-vector may still take as disjoint,
//! sorted, closed intervals over its raw (unsigned) encoding. Constraints of
//! the form `(x + adjustment) kind rhs` are intersected in under modular
//! arithmetic, so many comparisons against the same value collapse into one
//! interval disjunction.

use super::kind::{Kind, Signedness};
use super::{mask, to_signed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet {
    width: u32,
    intervals: Vec<(u64, u64)>,
}

impl RangeSet {
    /// Every value of the given width
    pub fn full(width: u32) -> Self {
        Self {
            width,
            intervals: vec![(0, mask(width))],
        }
    }

    fn from_raw(width: u32, mut intervals: Vec<(u64, u64)>) -> Self {
        intervals.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(intervals.len());
        for (from, to) in intervals {
            match merged.last_mut() {
                Some(last) if from <= last.1.saturating_add(1) => {
                    last.1 = last.1.max(to);
                }
                _ => merged.push((from, to)),
            }
        }
        Self {
            width,
            intervals: merged,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn contains(&self, value: u64) -> bool {
        let value = value & mask(self.width);
        self.intervals
            .iter()
            .any(|&(from, to)| from <= value && value <= to)
    }

    /// Values `t` with `t kind rhs`
    fn satisfying(width: u32, kind: Kind, rhs: u64) -> Self {
        let max = mask(width);
        let rhs = rhs & max;
        let raw = match kind {
            Kind::Equal => vec![(rhs, rhs)],
            Kind::Distinct => {
                let mut v = Vec::new();
                if rhs > 0 {
                    v.push((0, rhs - 1));
                }
                if rhs < max {
                    v.push((rhs + 1, max));
                }
                v
            }
            Kind::Ult if rhs == 0 => Vec::new(),
            Kind::Ult => vec![(0, rhs - 1)],
            Kind::Ule => vec![(0, rhs)],
            Kind::Ugt if rhs == max => Vec::new(),
            Kind::Ugt => vec![(rhs + 1, max)],
            Kind::Uge => vec![(rhs, max)],
            Kind::Slt | Kind::Sle | Kind::Sgt | Kind::Sge => {
                let smin = to_signed(1u64 << (width - 1), width);
                let smax = to_signed(max >> 1, width);
                let r = to_signed(rhs, width);
                let bounds = match kind {
                    Kind::Slt if r == smin => None,
                    Kind::Slt => Some((smin, r - 1)),
                    Kind::Sle => Some((smin, r)),
                    Kind::Sgt if r == smax => None,
                    Kind::Sgt => Some((r + 1, smax)),
                    _ => Some((r, smax)),
                };
                match bounds {
                    None => Vec::new(),
                    Some((lo, hi)) => signed_to_raw(lo, hi, width),
                }
            }
            _ => vec![(0, max)],
        };
        Self::from_raw(width, raw)
    }

    /// Add `delta` to every member, modulo 2^width
    fn shift(&self, delta: u64) -> Self {
        let max = mask(self.width);
        let delta = delta & max;
        if delta == 0 {
            return self.clone();
        }
        let mut raw = Vec::with_capacity(self.intervals.len() + 1);
        for &(from, to) in &self.intervals {
            let a = from.wrapping_add(delta) & max;
            let b = to.wrapping_add(delta) & max;
            if a <= b {
                raw.push((a, b));
            } else {
                raw.push((a, max));
                raw.push((0, b));
            }
        }
        Self::from_raw(self.width, raw)
    }

    pub fn intersect(&self, other: &RangeSet) -> Self {
        debug_assert_eq!(self.width, other.width);
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() && j < other.intervals.len() {
            let (a0, a1) = self.intervals[i];
            let (b0, b1) = other.intervals[j];
            let lo = a0.max(b0);
            let hi = a1.min(b1);
            if lo <= hi {
                out.push((lo, hi));
            }
            if a1 < b1 {
                i += 1;
            } else {
                j += 1;
            }
        }
        Self {
            width: self.width,
            intervals: out,
        }
    }

    /// Restrict to values `x` satisfying `(x + adjustment) kind rhs`
    pub fn constrain(&mut self, kind: Kind, rhs: u64, adjustment: u64) {
        let allowed = Self::satisfying(self.width, kind, rhs).shift(adjustment.wrapping_neg());
        *self = self.intersect(&allowed);
    }

    /// Intervals ordered under the given interpretation, as raw bounds
    ///
    /// In the signed view an interval crossing the sign boundary is split,
    /// and negative intervals come first.
    pub fn intervals(&self, signedness: Signedness) -> Vec<(u64, u64)> {
        match signedness {
            Signedness::Unsigned => self.intervals.clone(),
            Signedness::Signed => {
                let half = 1u64 << (self.width - 1);
                let mut negative = Vec::new();
                let mut positive = Vec::new();
                for &(from, to) in &self.intervals {
                    if to < half {
                        positive.push((from, to));
                    } else if from >= half {
                        negative.push((from, to));
                    } else {
                        positive.push((from, half - 1));
                        negative.push((half, to));
                    }
                }
                negative.extend(positive);
                negative
            }
        }
    }
}

/// Raw encoding of the signed interval `[lo, hi]`
fn signed_to_raw(lo: i64, hi: i64, width: u32) -> Vec<(u64, u64)> {
    let max = mask(width);
    let raw = |v: i64| (v as u64) & max;
    if lo < 0 && hi >= 0 {
        vec![(raw(lo), max), (0, raw(hi))]
    } else {
        vec![(raw(lo), raw(hi))]
    }
}
