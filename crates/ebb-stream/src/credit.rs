//! Outstanding demand granted by a consumer.

use std::fmt;

/// Number of items a producer may still push.
///
/// `usize::MAX` is reserved for unbounded demand: adding to it or consuming
/// from it leaves it unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Credit(usize);

impl Credit {
    pub const ZERO: Credit = Credit(0);
    pub const UNBOUNDED: Credit = Credit(usize::MAX);

    pub fn new(count: usize) -> Self {
        Self(count)
    }

    pub fn get(self) -> usize {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_unbounded(self) -> bool {
        self.0 == usize::MAX
    }

    /// Add `count` units. Returns `true` when this moved the credit from
    /// zero to positive, i.e. a suspended producer should resume.
    pub fn grant(&mut self, count: usize) -> bool {
        let was_zero = self.is_zero();
        self.0 = self.0.saturating_add(count);
        was_zero && !self.is_zero()
    }

    /// Use up one unit. Returns `false` if there was nothing to use.
    pub fn consume(&mut self) -> bool {
        match self.0 {
            0 => false,
            usize::MAX => true,
            _ => {
                self.0 -= 1;
                true
            }
        }
    }

    /// Move all units out, leaving zero behind.
    pub fn take(&mut self) -> Credit {
        std::mem::take(self)
    }
}

impl fmt::Display for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            f.write_str("unbounded")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
