//! Discrete renewal-equation simulator.
//!
//! `infections[0] = seed` and, for `t >= 1`,
//! `infections[t] = r_t[t] * sum_{k=1}^{min(t, K-1)} g[k] * infections[t-k]`.
//!
//! The generation-interval weights for every step are laid out once as a
//! sparse `(L-1) x L` matrix whose row `t-1` holds the reversed kernel over
//! columns `[max(0, t-K+1), t)`. Each step is then a single row dot product,
//! which on the AD tape becomes one linear node.

use rt_ad::{Tape, Var};
use rt_core::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
struct KernelRow {
    begin: usize,
    weights: Vec<f64>,
}

/// Precomputed generation-interval weights for a horizon of `len` days.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionKernel {
    len: usize,
    rows: Vec<KernelRow>,
}

impl ConvolutionKernel {
    /// Lay out kernel `g` for `len` days. Requires `len >= 2`.
    pub fn new(g: &[f64], len: usize) -> Result<Self> {
        if len <= 1 {
            return Err(Error::Computation(format!(
                "renewal simulation needs at least 2 days, got {len}"
            )));
        }
        if g.len() < 2 {
            return Err(Error::Validation(format!(
                "generation interval must cover at least 2 days, got {}",
                g.len()
            )));
        }
        let rows = (1..len)
            .map(|t| {
                let begin = (t + 1).saturating_sub(g.len());
                let weights = (begin..t).map(|j| g[t - j]).collect();
                KernelRow { begin, weights }
            })
            .collect();
        Ok(Self { len, rows })
    }

    /// Horizon in days.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Never true for a constructed kernel.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of stored weights (the non-zero pattern of the matrix).
    pub fn nnz(&self) -> usize {
        self.rows.iter().map(|r| r.weights.len()).sum()
    }

    /// Dense view of the `(len-1) x len` matrix.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        self.rows
            .iter()
            .map(|row| {
                let mut dense = vec![0.0; self.len];
                dense[row.begin..row.begin + row.weights.len()].copy_from_slice(&row.weights);
                dense
            })
            .collect()
    }

    fn check_len(&self, n: usize) -> Result<()> {
        if n != self.len {
            return Err(Error::Validation(format!(
                "r_t length {n} does not match kernel horizon {}",
                self.len
            )));
        }
        Ok(())
    }

    /// Infections path for `r_t` and `seed`.
    pub fn simulate(&self, r_t: &[f64], seed: f64) -> Result<Vec<f64>> {
        self.check_len(r_t.len())?;
        let mut infections = Vec::with_capacity(self.len);
        infections.push(seed);
        for (t, row) in (1..self.len).zip(&self.rows) {
            let history = &infections[row.begin..row.begin + row.weights.len()];
            let pressure: f64 = history.iter().zip(&row.weights).map(|(y, w)| y * w).sum();
            infections.push(r_t[t] * pressure);
        }
        Ok(infections)
    }

    /// [`simulate`](Self::simulate) recorded on a tape.
    pub fn simulate_on_tape(&self, tape: &mut Tape, r_t: &[Var], seed: Var) -> Result<Vec<Var>> {
        self.check_len(r_t.len())?;
        let mut infections = Vec::with_capacity(self.len);
        infections.push(seed);
        let mut terms = Vec::new();
        for (t, row) in (1..self.len).zip(&self.rows) {
            terms.clear();
            terms.extend(
                infections[row.begin..row.begin + row.weights.len()].iter().copied().zip(row.weights.iter().copied()),
            );
            let pressure = tape.linear(&terms);
            infections.push(tape.mul(r_t[t], pressure));
        }
        Ok(infections)
    }
}
