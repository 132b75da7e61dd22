//! Dense lexicographic order keys.
//!
//! A [`Rank`] is a base-62 fraction written without the leading "0.". Between
//! any two distinct ranks another rank exists, so an item can always be placed
//! between its neighbours without touching any other row. Keys never end in
//! the smallest digit, which keeps room open below every key.

use serde::{Deserialize, Serialize};

use std::fmt;

/// Digit alphabet in ASCII order, so byte comparison equals numeric comparison.
const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: usize = 62;

/// An order key. Compare with `Ord`; the empty key is not a valid rank.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rank(String);

impl Rank {
    /// The initial key for an empty list (middle of the digit range).
    pub fn first() -> Self {
        Self((DIGITS[BASE / 2] as char).to_string())
    }

    /// A key strictly between `lower` and `upper`.
    ///
    /// `None` stands for negative infinity on the left and positive infinity on
    /// the right. Fails when both bounds are given and `lower >= upper`.
    pub fn between(lower: Option<&Rank>, upper: Option<&Rank>) -> Result<Self, RankError> {
        if let (Some(a), Some(b)) = (lower, upper) {
            if a >= b {
                return Err(RankError::OutOfOrder {
                    lower: a.0.clone(),
                    upper: b.0.clone(),
                });
            }
        }
        let a = lower.map(|r| r.0.as_bytes()).unwrap_or(&[]);
        let b = upper.map(|r| r.0.as_bytes());
        let key = midpoint(a, b);
        // Digits are ASCII; this cannot fail.
        Ok(Self(String::from_utf8_lossy(&key).into_owned()))
    }

    /// A key after `last` (or the first key when the list is empty).
    pub fn after(last: Option<&Rank>) -> Self {
        match last {
            Some(r) => Self(String::from_utf8_lossy(&midpoint(r.0.as_bytes(), None)).into_owned()),
            None => Self::first(),
        }
    }

    /// Parse a stored key, validating the alphabet and the trailing-digit rule.
    pub fn parse(s: &str) -> Result<Self, RankError> {
        if s.is_empty() {
            return Err(RankError::Invalid(s.to_string()));
        }
        if !s.bytes().all(|b| digit_value(b).is_some()) || s.ends_with('0') {
            return Err(RankError::Invalid(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generate `count` evenly ordered keys for seeding a list.
    pub fn sequence(count: usize) -> Vec<Rank> {
        let mut out = Vec::with_capacity(count);
        let mut last: Option<Rank> = None;
        for _ in 0..count {
            let next = Rank::after(last.as_ref());
            out.push(next.clone());
            last = Some(next);
        }
        out
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digit_value(b: u8) -> Option<usize> {
    DIGITS.iter().position(|d| *d == b)
}

/// Midpoint of two base-62 fractions `a < b`; `b == None` is 1.0.
fn midpoint(a: &[u8], b: Option<&[u8]>) -> Vec<u8> {
    if let Some(b) = b {
        // Shared prefix (padding `a` with zeros) is carried over unchanged.
        let mut n = 0;
        while n < b.len() && a.get(n).copied().unwrap_or(DIGITS[0]) == b[n] {
            n += 1;
        }
        if n > 0 {
            let mut out = b[..n].to_vec();
            let rest_a = if n < a.len() { &a[n..] } else { &[][..] };
            out.extend(midpoint(rest_a, Some(&b[n..])));
            return out;
        }
    }

    let digit_a = a.first().and_then(|d| digit_value(*d)).unwrap_or(0);
    let digit_b = b
        .and_then(|b| b.first())
        .and_then(|d| digit_value(*d))
        .unwrap_or(BASE);

    if digit_b - digit_a > 1 {
        let mid = (digit_a + digit_b).div_ceil(2);
        vec![DIGITS[mid]]
    } else if let Some(b) = b.filter(|b| b.len() > 1) {
        vec![b[0]]
    } else {
        let mut out = vec![DIGITS[digit_a]];
        let rest = if a.len() > 1 { &a[1..] } else { &[][..] };
        out.extend(midpoint(rest, None));
        out
    }
}

/// Errors produced by rank computation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RankError {
    #[error("rank bounds out of order: '{lower}' >= '{upper}'")]
    OutOfOrder { lower: String, upper: String },

    #[error("invalid rank key '{0}'")]
    Invalid(String),
}

impl RankError {
    pub fn kind(&self) -> crate::error::ErrorKind {
        crate::error::ErrorKind::InvalidArgument
    }
}
