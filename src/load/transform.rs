//! Variable transforms: derived indexing variables.
//!
//! Transforms are ordered so that a producer runs before every transform that
//! reads its output. A transform reading its own output (`E = E * 1.02`) is
//! self-contained: it never acts as a producer for ordering purposes.
//! Evaluation is pull-based; only transforms whose output is requested,
//! directly or through another active transform, ever run.

use std::collections::BinaryHeap;
use std::cmp::Reverse;

use crate::domain::types::{TransformConfig, substitute_toy};
use crate::error::{AppError, Result};
use crate::expr::CompiledExpr;

#[derive(Debug, Clone)]
pub struct VarTransform {
    pub output: String,
    /// Formula inputs, in the formula's variable order.
    pub inputs: Vec<String>,
    pub expr: CompiledExpr,
    /// Position in the configuration.
    pub declared: usize,
    evaluations: u64,
}

impl VarTransform {
    pub fn formula(output: impl Into<String>, formula: &str) -> Result<Self> {
        let expr = CompiledExpr::compile(formula)?;
        Ok(VarTransform {
            output: output.into(),
            inputs: expr.required_vars.clone(),
            expr,
            declared: 0,
            evaluations: 0,
        })
    }

    pub fn is_self_referencing(&self) -> bool {
        self.inputs.contains(&self.output)
    }

    /// How many times this transform has been evaluated.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    fn eval(&self, inputs: &[f64]) -> f64 {
        self.expr.eval_row(inputs)
    }
}

/// Transforms in evaluation order.
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    transforms: Vec<VarTransform>,
}

impl TransformChain {
    pub fn from_configs(configs: &[TransformConfig], toy_index: Option<usize>) -> Result<Self> {
        let transforms = configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| {
                let formula = substitute_toy(&c.formula, toy_index)?;
                VarTransform::formula(&c.output, &formula).map_err(|e| {
                    AppError::config(format!("transform '{}': {e}", c.output))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(transforms)
    }

    /// Order transforms: declaration order, except that producers are moved
    /// ahead of their consumers.
    pub fn new(mut transforms: Vec<VarTransform>) -> Result<Self> {
        for (i, t) in transforms.iter_mut().enumerate() {
            t.declared = i;
        }
        let n = transforms.len();
        let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut pending = vec![0usize; n];

        for (p, producer) in transforms.iter().enumerate() {
            if producer.is_self_referencing() {
                continue;
            }
            for (c, consumer) in transforms.iter().enumerate() {
                if c != p && consumer.inputs.contains(&producer.output) {
                    consumers[p].push(c);
                    pending[c] += 1;
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> =
            (0..n).filter(|&i| pending[i] == 0).map(Reverse).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &c in &consumers[i] {
                pending[c] -= 1;
                if pending[c] == 0 {
                    ready.push(Reverse(c));
                }
            }
        }

        if order.len() != n {
            let stuck: Vec<&str> = (0..n)
                .filter(|&i| pending[i] > 0)
                .map(|i| transforms[i].output.as_str())
                .collect();
            return Err(AppError::config(format!(
                "variable transforms form a dependency cycle: {}",
                stuck.join(", ")
            )));
        }

        let mut slots: Vec<Option<VarTransform>> = transforms.into_iter().map(Some).collect();
        let transforms = order.into_iter().filter_map(|i| slots[i].take()).collect();
        Ok(TransformChain { transforms })
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn transforms(&self) -> &[VarTransform] {
        &self.transforms
    }

    /// Index of the last non-self-referencing transform producing `name`.
    pub fn producer_of(&self, name: &str) -> Option<usize> {
        self.transforms
            .iter()
            .rposition(|t| t.output == name && !t.is_self_referencing())
    }

    /// Any transform, self-referencing or not, writing `name`.
    pub fn writes(&self, name: &str) -> bool {
        self.transforms.iter().any(|t| t.output == name)
    }

    /// Flag the transforms needed to produce `requested`.
    ///
    /// Walks the chain backwards: a transform is active if its output is
    /// needed, and then its inputs become needed too.
    pub fn activate(&self, requested: &[String]) -> Vec<bool> {
        let mut needed: Vec<String> = requested.to_vec();
        let mut active = vec![false; self.transforms.len()];
        for (i, t) in self.transforms.iter().enumerate().rev() {
            if needed.contains(&t.output) {
                active[i] = true;
                for input in &t.inputs {
                    if !needed.contains(input) {
                        needed.push(input.clone());
                    }
                }
            }
        }
        active
    }

    /// Add per-run evaluation counts (from [`ActiveTransforms`]) to the totals.
    pub fn record_evaluations(&mut self, counts: &[(usize, u64)]) {
        for &(i, n) in counts {
            if let Some(t) = self.transforms.get_mut(i) {
                t.evaluations += n;
            }
        }
    }

    pub fn evaluations(&self) -> Vec<(String, u64)> {
        self.transforms
            .iter()
            .map(|t| (t.output.clone(), t.evaluations))
            .collect()
    }
}

/// An active transform bound to indexing-buffer positions.
#[derive(Debug, Clone)]
struct BoundTransform {
    chain_index: usize,
    output_slot: usize,
    input_slots: Vec<usize>,
}

/// The active subset of a chain, ready to run on an indexing buffer.
#[derive(Debug, Clone, Default)]
pub struct ActiveTransforms {
    bound: Vec<BoundTransform>,
}

impl ActiveTransforms {
    pub fn bind<F>(chain: &TransformChain, active: &[bool], slot_of: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<usize>,
    {
        let mut bound = Vec::new();
        for (i, t) in chain.transforms.iter().enumerate() {
            if !active.get(i).copied().unwrap_or(false) {
                continue;
            }
            let output_slot = slot_of(&t.output)
                .ok_or_else(|| AppError::unresolved(&t.output, "transform output"))?;
            let input_slots = t
                .inputs
                .iter()
                .map(|name| {
                    slot_of(name).ok_or_else(|| {
                        AppError::unresolved(name, format!("input of transform '{}'", t.output))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            bound.push(BoundTransform {
                chain_index: i,
                output_slot,
                input_slots,
            });
        }
        Ok(ActiveTransforms { bound })
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    /// Chain indices of the active transforms, in run order.
    pub fn chain_indices(&self) -> Vec<usize> {
        self.bound.iter().map(|b| b.chain_index).collect()
    }

    /// Run every active transform in order. `counts[k]` tallies runs of the
    /// k-th active transform; `scratch` is reused for inputs.
    pub fn apply(
        &self,
        chain: &TransformChain,
        buffer: &mut [f64],
        scratch: &mut Vec<f64>,
        counts: &mut [u64],
    ) {
        for (k, b) in self.bound.iter().enumerate() {
            scratch.clear();
            scratch.extend(b.input_slots.iter().map(|&s| buffer[s]));
            buffer[b.output_slot] = chain.transforms[b.chain_index].eval(scratch);
            counts[k] += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(output: &str, formula: &str) -> VarTransform {
        VarTransform::formula(output, formula).unwrap()
    }

    fn outputs(chain: &TransformChain) -> Vec<&str> {
        chain.transforms().iter().map(|t| t.output.as_str()).collect()
    }

    #[test]
    fn producers_move_ahead_of_consumers() {
        let chain = TransformChain::new(vec![t("z", "y + 1"), t("y", "x * 2"), t("w", "x")]).unwrap();
        assert_eq!(outputs(&chain), vec!["y", "z", "w"]);
    }

    #[test]
    fn self_referencing_transform_keeps_its_place() {
        let chain = TransformChain::new(vec![t("a", "E * 2"), t("E", "E * 1.02")]).unwrap();
        assert_eq!(outputs(&chain), vec!["a", "E"]);
        assert!(chain.transforms()[1].is_self_referencing());
        assert_eq!(chain.producer_of("E"), None);
    }

    #[test]
    fn cycles_are_config_errors() {
        let err = TransformChain::new(vec![t("a", "b"), t("b", "a")]).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn activation_pulls_transitive_inputs() {
        let chain = TransformChain::new(vec![t("y", "x * 2"), t("z", "y + 1"), t("q", "x")]).unwrap();
        assert_eq!(chain.activate(&["z".to_string()]), vec![true, true, false]);
        assert_eq!(chain.activate(&["x".to_string()]), vec![false, false, false]);
    }

    #[test]
    fn apply_runs_active_transforms_in_order() {
        let mut chain = TransformChain::new(vec![t("z", "y + 1"), t("y", "x * 2")]).unwrap();
        let active = chain.activate(&["z".to_string()]);
        let names = ["x", "y", "z"];
        let bound =
            ActiveTransforms::bind(&chain, &active, |n| names.iter().position(|m| *m == n)).unwrap();

        let mut buf = vec![3.0, 0.0, 0.0];
        let mut scratch = Vec::new();
        let mut counts = vec![0u64; bound.len()];
        bound.apply(&chain, &mut buf, &mut scratch, &mut counts);
        assert_eq!(buf, vec![3.0, 6.0, 7.0]);

        let record: Vec<(usize, u64)> = bound.chain_indices().into_iter().zip(counts).collect();
        chain.record_evaluations(&record);
        assert_eq!(chain.evaluations(), vec![("y".to_string(), 1), ("z".to_string(), 1)]);
    }
}
