// ABOUTME: Symbolic differentiation of Calc expression trees
// A pure tree-to-tree transformation; chain-rule composition across user
// functions goes through the registry of previously derived functions.

use crate::ast::{BinaryOp, Expr, Function, Prototype};
use std::collections::HashMap;

/// Derives Calc functions with respect to a named formal parameter.
///
/// The input tree is never mutated; every rule builds from clones. Missing
/// derivative functions and arity mismatches do not abort the
/// transformation: the offending subtree derives to `Number(0.0)` and a
/// diagnostic is recorded for the driver to report.
pub struct Differentiator<'a> {
    prototypes: &'a HashMap<String, Prototype>,
    derivatives: &'a HashMap<String, Function>,
    simplify: bool,
    diagnostics: Vec<String>,
}

impl<'a> Differentiator<'a> {
    pub fn new(
        prototypes: &'a HashMap<String, Prototype>,
        derivatives: &'a HashMap<String, Function>,
    ) -> Self {
        Differentiator {
            prototypes,
            derivatives,
            simplify: true,
            diagnostics: Vec::new(),
        }
    }

    /// Disables peephole simplification, keeping the raw rule output.
    #[allow(dead_code)]
    pub fn without_simplification(mut self) -> Self {
        self.simplify = false;
        self
    }

    /// The registry name of the derivative of `function` with respect to
    /// `param`: `d<function>_d<param>`.
    pub fn derivative_name(function: &str, param: &str) -> String {
        format!("d{}_d{}", function, param)
    }

    /// Diagnostics accumulated since the last call, oldest first.
    pub fn take_diagnostics(&mut self) -> Vec<String> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Builds the partial-derivative function of `function` with respect
    /// to `param`. The result keeps the original parameter list under the
    /// registry name, so `dsq_dx(3)` is an ordinary one-argument call.
    pub fn derive_function(&mut self, function: &Function, param: &str) -> Function {
        let name = Self::derivative_name(&function.prototype.name, param);
        let prototype = Prototype::new(name, function.prototype.params.clone());
        let body = self.derive(&function.body, param);
        Function::new(prototype, body)
    }

    /// The derivative of `expr` with respect to `var`.
    pub fn derive(&mut self, expr: &Expr, var: &str) -> Expr {
        match expr {
            Expr::Number(_) => Expr::Number(0.0),
            Expr::Variable(name) => {
                if name == var {
                    Expr::Number(1.0)
                } else {
                    Expr::Number(0.0)
                }
            }
            Expr::Binary { op, lhs, rhs } => self.derive_binary(expr, *op, lhs, rhs, var),
            Expr::Call { callee, args } => self.derive_call(callee, args, var),
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => Expr::If {
                cond: cond.clone(),
                then_branch: Box::new(self.derive(then_branch, var)),
                else_branch: Box::new(self.derive(else_branch, var)),
            },
            // The loop structure is preserved and only the body derived.
            // This assumes `var` does not occur in start, end, or step.
            Expr::For {
                var: loop_var,
                start,
                end,
                step,
                body,
            } => Expr::For {
                var: loop_var.clone(),
                start: start.clone(),
                end: end.clone(),
                step: step.clone(),
                body: Box::new(self.derive(body, var)),
            },
        }
    }

    fn derive_binary(
        &mut self,
        original: &Expr,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        var: &str,
    ) -> Expr {
        match op {
            BinaryOp::Add => {
                let dl = self.derive(lhs, var);
                let dr = self.derive(rhs, var);
                self.add(dl, dr)
            }
            BinaryOp::Sub => {
                let dl = self.derive(lhs, var);
                let dr = self.derive(rhs, var);
                self.sub(dl, dr)
            }
            // (L * R)' = L' * R + R' * L
            BinaryOp::Mul => {
                let dl = self.derive(lhs, var);
                let dr = self.derive(rhs, var);
                let left = self.mul(dl, rhs.clone());
                let right = self.mul(dr, lhs.clone());
                self.add(left, right)
            }
            // (L / R)' = (L' * R - R' * L) / (R * R)
            BinaryOp::Div => {
                let dl = self.derive(lhs, var);
                let dr = self.derive(rhs, var);
                let left = self.mul(dl, rhs.clone());
                let right = self.mul(dr, lhs.clone());
                let numerator = self.sub(left, right);
                let denominator = self.mul(rhs.clone(), rhs.clone());
                self.div(numerator, denominator)
            }
            BinaryOp::Pow => self.derive_pow(original, lhs, rhs, var),
            // The comparison is piecewise constant 0/1; its derivative is
            // left as a structural copy for the caller to interpret.
            BinaryOp::Less => original.clone(),
        }
    }

    /// The general exponent rule, d(L^R) = L^R * (R' ln L + R * L' / L),
    /// with a shortcut for constant exponents: d(L^n) = n * L^(n-1) * L'.
    fn derive_pow(&mut self, original: &Expr, lhs: &Expr, rhs: &Expr, var: &str) -> Expr {
        if self.simplify {
            if let Expr::Number(exponent) = rhs {
                let exponent = *exponent;
                let dl = self.derive(lhs, var);
                let reduced = self.pow(lhs.clone(), Expr::Number(exponent - 1.0));
                let scaled = self.mul(Expr::Number(exponent), reduced);
                return self.mul(scaled, dl);
            }
        }
        let dl = self.derive(lhs, var);
        let dr = self.derive(rhs, var);
        let log_term = self.mul(
            dr,
            Expr::Call {
                callee: "log".to_string(),
                args: vec![lhs.clone()],
            },
        );
        let slope = self.mul(dl, rhs.clone());
        let ratio = self.div(slope, lhs.clone());
        let factor = self.add(log_term, ratio);
        self.mul(original.clone(), factor)
    }

    /// Chain rule over a user-defined call:
    /// d f(a₀…aₙ)/dx = Σᵢ dfdpᵢ(a₀…aₙ) * daᵢ/dx.
    fn derive_call(&mut self, callee: &str, args: &[Expr], var: &str) -> Expr {
        let prototype = match self.prototypes.get(callee) {
            Some(prototype) => prototype,
            None => {
                self.diagnostics.push(format!(
                    "cannot differentiate call to unknown function '{}'; using 0",
                    callee
                ));
                return Expr::Number(0.0);
            }
        };
        if prototype.params.len() != args.len() {
            self.diagnostics.push(format!(
                "cannot differentiate call to '{}': expected {} arguments, got {}; using 0",
                callee,
                prototype.params.len(),
                args.len()
            ));
            return Expr::Number(0.0);
        }

        let params = prototype.params.clone();
        let mut sum = Expr::Number(0.0);
        for (param, arg) in params.iter().zip(args) {
            let derivative_name = Self::derivative_name(callee, param);
            if !self.derivatives.contains_key(&derivative_name) {
                self.diagnostics.push(format!(
                    "no derivative '{}' registered for call to '{}'; using 0",
                    derivative_name, callee
                ));
                return Expr::Number(0.0);
            }
            let outer = Expr::Call {
                callee: derivative_name,
                args: args.to_vec(),
            };
            let inner = self.derive(arg, var);
            let term = self.mul(outer, inner);
            sum = self.add(sum, term);
        }
        sum
    }

    // ===== Peephole constructors =====
    // Each emits the shorter equivalent form when an operand is a literal;
    // with simplification off they build the plain binary node.

    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn add(&self, lhs: Expr, rhs: Expr) -> Expr {
        if self.simplify {
            match (&lhs, &rhs) {
                (Expr::Number(a), Expr::Number(b)) => return Expr::Number(a + b),
                (Expr::Number(a), _) if *a == 0.0 => return rhs,
                (_, Expr::Number(b)) if *b == 0.0 => return lhs,
                _ => {}
            }
        }
        Self::binary(BinaryOp::Add, lhs, rhs)
    }

    fn sub(&self, lhs: Expr, rhs: Expr) -> Expr {
        if self.simplify {
            match (&lhs, &rhs) {
                (Expr::Number(a), Expr::Number(b)) => return Expr::Number(a - b),
                (_, Expr::Number(b)) if *b == 0.0 => return lhs,
                _ => {}
            }
        }
        Self::binary(BinaryOp::Sub, lhs, rhs)
    }

    fn mul(&self, lhs: Expr, rhs: Expr) -> Expr {
        if self.simplify {
            match (&lhs, &rhs) {
                (Expr::Number(a), Expr::Number(b)) => return Expr::Number(a * b),
                (Expr::Number(a), _) if *a == 0.0 => return Expr::Number(0.0),
                (_, Expr::Number(b)) if *b == 0.0 => return Expr::Number(0.0),
                (Expr::Number(a), _) if *a == 1.0 => return rhs,
                (_, Expr::Number(b)) if *b == 1.0 => return lhs,
                _ => {}
            }
        }
        Self::binary(BinaryOp::Mul, lhs, rhs)
    }

    fn div(&self, lhs: Expr, rhs: Expr) -> Expr {
        if self.simplify {
            match (&lhs, &rhs) {
                (Expr::Number(a), Expr::Number(b)) if *b != 0.0 => {
                    return Expr::Number(a / b)
                }
                (_, Expr::Number(b)) if *b == 1.0 => return lhs,
                _ => {}
            }
        }
        Self::binary(BinaryOp::Div, lhs, rhs)
    }

    fn pow(&self, lhs: Expr, rhs: Expr) -> Expr {
        if self.simplify {
            match (&lhs, &rhs) {
                (Expr::Number(a), Expr::Number(b)) => return Expr::Number(a.powf(*b)),
                (_, Expr::Number(b)) if *b == 1.0 => return lhs,
                (_, Expr::Number(b)) if *b == 0.0 => return Expr::Number(1.0),
                _ => {}
            }
        }
        Self::binary(BinaryOp::Pow, lhs, rhs)
    }
}
