//! Tape-based reverse-mode automatic differentiation.
//!
//! Records a computation graph (forward pass), then computes **all** gradients
//! in a single backward sweep.  Cost: one forward + one backward pass regardless
//! of the number of inputs.
//!
//! # Example
//! ```
//! use rt_ad::tape::Tape;
//!
//! let mut tape = Tape::new();
//! let x = tape.var(3.0);
//! let y = tape.var(5.0);
//! let z = tape.mul(x, y);       // z = x * y = 15
//! let w = tape.add(z, x);       // w = z + x = 18
//! tape.backward(w);
//! assert_eq!(tape.adjoint(x), 6.0);  // dw/dx = y + 1 = 6
//! assert_eq!(tape.adjoint(y), 3.0);  // dw/dy = x = 3
//! ```

use statrs::function::gamma::{digamma, ln_gamma};

/// Handle to a node on the tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Var(pub(crate) usize);

impl Var {
    /// Position of the node on the tape.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Operation recorded on the tape.
#[derive(Debug, Clone, Copy)]
enum Op {
    /// Input variable (leaf).
    Input,
    /// Constant (adjoint never propagated).
    Const,
    // Binary ops
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    // Unary ops
    Ln(usize),
    Exp(usize),
    LnGamma(usize),
    Powi(usize, i32),
    /// `sum_i w_i * x_i` over `terms[start..end]`.
    Linear(usize, usize),
}

/// Node on the tape: value + operation that produced it.
#[derive(Debug, Clone)]
struct Node {
    val: f64,
    op: Op,
}

/// Reverse-mode AD tape.
///
/// Build a computation graph by calling methods (var, add, mul, ln, …),
/// then call [`backward`](Tape::backward) and read gradients with [`adjoint`](Tape::adjoint).
#[derive(Debug)]
pub struct Tape {
    nodes: Vec<Node>,
    /// Parent/weight pairs referenced by [`Op::Linear`] nodes.
    terms: Vec<(usize, f64)>,
    adjoints: Vec<f64>,
}

impl Tape {
    /// Create an empty tape.
    pub fn new() -> Self {
        Self { nodes: Vec::new(), terms: Vec::new(), adjoints: Vec::new() }
    }

    /// Create a tape pre-allocated for `nodes` nodes and `terms` linear terms.
    pub fn with_capacity(nodes: usize, terms: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(nodes),
            terms: Vec::with_capacity(terms),
            adjoints: Vec::with_capacity(nodes),
        }
    }

    /// Number of nodes on the tape.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tape is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Clear the tape for reuse (avoids reallocation).
    #[inline]
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.terms.clear();
        self.adjoints.clear();
    }

    #[inline]
    fn push(&mut self, val: f64, op: Op) -> Var {
        let idx = self.nodes.len();
        self.nodes.push(Node { val, op });
        Var(idx)
    }

    // --- Leaf constructors ---

    /// Record an input variable.
    #[inline]
    pub fn var(&mut self, val: f64) -> Var {
        self.push(val, Op::Input)
    }

    /// Record a constant (gradient never flows through it).
    #[inline]
    pub fn constant(&mut self, val: f64) -> Var {
        self.push(val, Op::Const)
    }

    // --- Value access ---

    /// Get the primal value of a node.
    #[inline]
    pub fn val(&self, v: Var) -> f64 {
        self.nodes[v.0].val
    }

    // --- Binary operations ---

    /// `a + b`
    #[inline]
    pub fn add(&mut self, a: Var, b: Var) -> Var {
        let val = self.nodes[a.0].val + self.nodes[b.0].val;
        self.push(val, Op::Add(a.0, b.0))
    }

    /// `a - b`
    #[inline]
    pub fn sub(&mut self, a: Var, b: Var) -> Var {
        let val = self.nodes[a.0].val - self.nodes[b.0].val;
        self.push(val, Op::Sub(a.0, b.0))
    }

    /// `a * b`
    #[inline]
    pub fn mul(&mut self, a: Var, b: Var) -> Var {
        let val = self.nodes[a.0].val * self.nodes[b.0].val;
        self.push(val, Op::Mul(a.0, b.0))
    }

    // --- Unary operations ---

    /// `ln(a)`
    #[inline]
    pub fn ln(&mut self, a: Var) -> Var {
        let val = self.nodes[a.0].val.ln();
        self.push(val, Op::Ln(a.0))
    }

    /// `exp(a)`
    #[inline]
    pub fn exp(&mut self, a: Var) -> Var {
        let val = self.nodes[a.0].val.exp();
        self.push(val, Op::Exp(a.0))
    }

    /// `ln(Gamma(a))` for `a > 0`; the derivative is the digamma function.
    #[inline]
    pub fn ln_gamma(&mut self, a: Var) -> Var {
        let val = ln_gamma(self.nodes[a.0].val);
        self.push(val, Op::LnGamma(a.0))
    }

    /// `a^n` (integer exponent)
    pub fn powi(&mut self, a: Var, n: i32) -> Var {
        let val = self.nodes[a.0].val.powi(n);
        self.push(val, Op::Powi(a.0, n))
    }

    // --- N-ary operations ---

    /// Weighted sum `sum_i w_i * x_i` recorded as a single node.
    ///
    /// This is the workhorse for convolutions: one node per output element
    /// instead of one multiply and one add per kernel tap.
    pub fn linear(&mut self, terms: &[(Var, f64)]) -> Var {
        let start = self.terms.len();
        let mut val = 0.0;
        for &(v, w) in terms {
            val += w * self.nodes[v.0].val;
            self.terms.push((v.0, w));
        }
        let end = self.terms.len();
        self.push(val, Op::Linear(start, end))
    }

    /// Plain sum of nodes.
    pub fn sum(&mut self, vars: &[Var]) -> Var {
        let start = self.terms.len();
        let mut val = 0.0;
        for &v in vars {
            val += self.nodes[v.0].val;
            self.terms.push((v.0, 1.0));
        }
        let end = self.terms.len();
        self.push(val, Op::Linear(start, end))
    }

    // --- Convenience: scalar helpers ---

    /// `a + scalar`
    #[inline]
    pub fn add_f64(&mut self, a: Var, s: f64) -> Var {
        let c = self.constant(s);
        self.add(a, c)
    }

    /// `a * scalar`
    #[inline]
    pub fn mul_f64(&mut self, a: Var, s: f64) -> Var {
        let c = self.constant(s);
        self.mul(a, c)
    }

    // --- Backward pass ---

    /// Run reverse-mode AD from output node `out`.
    ///
    /// After calling this, use [`adjoint`](Tape::adjoint) to read ∂out/∂x
    /// for any input `x`.
    pub fn backward(&mut self, out: Var) {
        let n = self.nodes.len();
        self.adjoints.resize(n, 0.0);
        self.adjoints.fill(0.0);
        self.adjoints[out.0] = 1.0;

        for i in (0..n).rev() {
            let adj = self.adjoints[i];
            if adj == 0.0 {
                continue; // skip zero-adjoint nodes
            }

            match self.nodes[i].op {
                Op::Input | Op::Const => {}
                Op::Add(a, b) => {
                    self.adjoints[a] += adj;
                    self.adjoints[b] += adj;
                }
                Op::Sub(a, b) => {
                    self.adjoints[a] += adj;
                    self.adjoints[b] -= adj;
                }
                Op::Mul(a, b) => {
                    let va = self.nodes[a].val;
                    let vb = self.nodes[b].val;
                    self.adjoints[a] += adj * vb;
                    self.adjoints[b] += adj * va;
                }
                Op::Ln(a) => {
                    self.adjoints[a] += adj / self.nodes[a].val;
                }
                Op::Exp(a) => {
                    // d/da exp(a) = exp(a) = self.nodes[i].val
                    self.adjoints[a] += adj * self.nodes[i].val;
                }
                Op::LnGamma(a) => {
                    self.adjoints[a] += adj * digamma(self.nodes[a].val);
                }
                Op::Powi(a, n) => {
                    self.adjoints[a] += adj * (n as f64) * self.nodes[a].val.powi(n - 1);
                }
                Op::Linear(start, end) => {
                    for &(j, w) in &self.terms[start..end] {
                        self.adjoints[j] += adj * w;
                    }
                }
            }
        }
    }

    /// Read ∂output/∂v after calling [`backward`](Tape::backward).
    #[inline]
    pub fn adjoint(&self, v: Var) -> f64 {
        self.adjoints.get(v.0).copied().unwrap_or(0.0)
    }
}

impl Default for Tape {
    fn default() -> Self {
        Self::new()
    }
}
