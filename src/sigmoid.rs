//! Logistic function and inverse square root, exact or approximate.

use crate::real;

pub const EXP_TABLE_SIZE: usize = 1000;
pub const MAX_EXP: real = 6.0;

/// Precomputed logistic function on `[-MAX_EXP, MAX_EXP)` in
/// `EXP_TABLE_SIZE` bins. Build one per model and share it by reference.
#[derive(Debug, Clone)]
pub struct SigmoidTable {
    table: Vec<real>,
}

impl SigmoidTable {
    pub fn new() -> Self {
        let bin = 2.0 * MAX_EXP / EXP_TABLE_SIZE as real;
        let table = (0..EXP_TABLE_SIZE)
            .map(|i| {
                let x = bin * i as real - MAX_EXP;
                let e = x.exp();
                e / (e + 1.0)
            })
            .collect();
        SigmoidTable { table }
    }

    /// Approximate the logistic function, 1 / (1 + e^-x). Saturates to 0 and
    /// 1 outside the table's range.
    pub fn lookup(&self, x: real) -> real {
        if x >= MAX_EXP {
            1.0
        } else if x <= -MAX_EXP {
            0.0
        } else {
            let i = ((x + MAX_EXP) * (EXP_TABLE_SIZE as real / (2.0 * MAX_EXP))) as usize;
            self.table[i.min(EXP_TABLE_SIZE - 1)]
        }
    }

    pub fn sigmoid(&self, x: real, kind: SigmoidKind) -> real {
        match kind {
            SigmoidKind::Table => self.lookup(x),
            SigmoidKind::Exact => sigmoid(x),
        }
    }
}

impl Default for SigmoidTable {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sigmoid(x: real) -> real {
    1.0 / (1.0 + (-x).exp())
}

/// The bit-level initial guess of 1/sqrt(x), with no Newton step. Relative
/// error is a few percent.
pub fn fast_inv_sqrt(x: real) -> real {
    real::from_bits(0x5f3759df - (x.to_bits() >> 1))
}

pub fn inv_sqrt(x: real, kind: InvSqrtKind) -> real {
    match kind {
        InvSqrtKind::Fast => fast_inv_sqrt(x),
        InvSqrtKind::Exact => 1.0 / x.sqrt(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SigmoidKind {
    #[default]
    Table,
    Exact,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InvSqrtKind {
    #[default]
    Fast,
    Exact,
}

/// How the optimizer evaluates its two nonlinear functions. The default
/// uses the lookup table and the fast inverse square root; use
/// [`Numerics::EXACT`] for reproducible arithmetic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Numerics {
    pub sigmoid: SigmoidKind,
    pub inv_sqrt: InvSqrtKind,
}

impl Numerics {
    pub const EXACT: Numerics = Numerics {
        sigmoid: SigmoidKind::Exact,
        inv_sqrt: InvSqrtKind::Exact,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_close_to_exact() {
        let table = SigmoidTable::new();
        let mut x = -5.99;
        while x < 5.99 {
            let err = (table.lookup(x) - sigmoid(x)).abs();
            assert!(err < 0.01, "sigmoid({x}): table {} exact {}", table.lookup(x), sigmoid(x));
            x += 0.037;
        }
    }

    #[test]
    fn lookup_saturates() {
        let table = SigmoidTable::new();
        assert_eq!(table.lookup(6.0), 1.0);
        assert_eq!(table.lookup(100.0), 1.0);
        assert_eq!(table.lookup(-6.0), 0.0);
        assert_eq!(table.lookup(-100.0), 0.0);
        assert!((table.lookup(0.0) - 0.5).abs() < 0.01);
    }

    #[test]
    fn kinds_dispatch() {
        let table = SigmoidTable::new();
        assert_eq!(table.sigmoid(0.3, SigmoidKind::Exact), sigmoid(0.3));
        assert_eq!(table.sigmoid(0.3, SigmoidKind::Table), table.lookup(0.3));
        assert_eq!(inv_sqrt(4.0, InvSqrtKind::Exact), 0.5);
    }

    #[test]
    fn fast_inv_sqrt_is_within_a_few_percent() {
        for x in [1e-8, 1e-3, 0.5, 1.0, 2.0, 123.0, 1e6] {
            let exact = 1.0 / (x as real).sqrt();
            let rel = (fast_inv_sqrt(x) - exact).abs() / exact;
            assert!(rel < 0.04, "x={x}: relative error {rel}");
        }
    }
}
