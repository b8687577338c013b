use std::{fmt::Display, ops::Deref};

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percentage(f64);

impl Display for Percentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

impl Percentage {
    pub fn new_opt(value: f64) -> Option<Percentage> {
        if value < 0. {
            None
        } else {
            Some(Percentage(value))
        }
    }
}

impl Deref for Percentage {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// How far `total` points are into the current hundred. Negative totals count down from the
/// previous hundred, so the result always lies in 0..100.
pub fn hundred_progress(total: i64) -> Percentage {
    Percentage(total.rem_euclid(100) as f64)
}
