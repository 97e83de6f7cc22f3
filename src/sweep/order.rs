// src/sweep/order.rs

//! Axis identifiers and the nesting order used by the expander.

use std::fmt;

use serde::Deserialize;

use crate::sweep::spec::SweepSpec;

/// One independently varying generation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Prompt,
    Iteration,
    Scale,
    Step,
    RefinerStrength,
    InitImage,
    InitStrength,
    FineTuneWeight,
}

impl Axis {
    /// Default nesting, outermost first.
    pub const DEFAULT_ORDER: [Axis; 8] = [
        Axis::Prompt,
        Axis::Iteration,
        Axis::Scale,
        Axis::Step,
        Axis::RefinerStrength,
        Axis::InitImage,
        Axis::InitStrength,
        Axis::FineTuneWeight,
    ];
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::Prompt => "prompt",
            Axis::Iteration => "iteration",
            Axis::Scale => "scale",
            Axis::Step => "step",
            Axis::RefinerStrength => "refiner_strength",
            Axis::InitImage => "init_image",
            Axis::InitStrength => "init_strength",
            Axis::FineTuneWeight => "fine_tune_weight",
        };
        f.write_str(name)
    }
}

/// Nesting order of the axes plus the per-axis seed policies.
///
/// Entering a value of a *seed-reset* axis puts the seed back to the
/// sweep's start seed. While a *seed-increment* axis is part of the order,
/// every other step of the iteration advances the seed by one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisOrder {
    axes: Vec<Axis>,
    seed_reset: Vec<Axis>,
    seed_increment: Vec<Axis>,
}

impl Default for AxisOrder {
    fn default() -> Self {
        AxisOrder::new(Axis::DEFAULT_ORDER.to_vec())
            .with_seed_reset(Axis::Prompt)
            .with_seed_increment(Axis::Iteration)
    }
}

impl AxisOrder {
    /// Order without any seed policy.
    pub fn new(axes: Vec<Axis>) -> Self {
        Self {
            axes,
            seed_reset: Vec::new(),
            seed_increment: Vec::new(),
        }
    }

    /// Build an order from a user-supplied (possibly partial) list.
    ///
    /// Duplicates are rejected; axes missing from `axes` are appended
    /// innermost in their default relative order.
    pub fn from_partial(
        axes: &[Axis],
        seed_reset: &[Axis],
        seed_increment: &[Axis],
    ) -> Result<Self, String> {
        let mut ordered: Vec<Axis> = Vec::with_capacity(Axis::DEFAULT_ORDER.len());
        for axis in axes {
            if ordered.contains(axis) {
                return Err(format!("axis '{axis}' listed more than once in axis order"));
            }
            ordered.push(*axis);
        }
        for axis in Axis::DEFAULT_ORDER {
            if !ordered.contains(&axis) {
                ordered.push(axis);
            }
        }

        if let Some(axis) = seed_reset.iter().find(|a| seed_increment.contains(*a)) {
            return Err(format!(
                "axis '{axis}' cannot both reset and increment the seed"
            ));
        }

        Ok(Self {
            axes: ordered,
            seed_reset: seed_reset.to_vec(),
            seed_increment: seed_increment.to_vec(),
        })
    }

    pub fn with_seed_reset(mut self, axis: Axis) -> Self {
        if !self.seed_reset.contains(&axis) {
            self.seed_reset.push(axis);
        }
        self
    }

    pub fn with_seed_increment(mut self, axis: Axis) -> Self {
        if !self.seed_increment.contains(&axis) {
            self.seed_increment.push(axis);
        }
        self
    }

    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    pub fn contains(&self, axis: Axis) -> bool {
        self.axes.contains(&axis)
    }

    pub fn resets_seed(&self, axis: Axis) -> bool {
        self.seed_reset.contains(&axis)
    }

    pub fn increments_seed(&self, axis: Axis) -> bool {
        self.seed_increment.contains(&axis)
    }

    /// Whether any axis still in the order advances the seed.
    pub fn has_seed_increment(&self) -> bool {
        self.axes.iter().any(|a| self.increments_seed(*a))
    }

    /// Copy of this order with `axis` removed; other axes keep their
    /// relative order.
    pub fn without(&self, axis: Axis) -> Self {
        Self {
            axes: self.axes.iter().copied().filter(|a| *a != axis).collect(),
            seed_reset: self.seed_reset.clone(),
            seed_increment: self.seed_increment.clone(),
        }
    }

    /// Remove the axes that are degenerate for `spec`: source strengths
    /// without source images, fine-tune weights without fine-tunes.
    pub fn pruned_for(&self, spec: &SweepSpec) -> Self {
        let mut order = self.clone();
        if !spec.has_init_images() {
            order = order.without(Axis::InitStrength);
        }
        if spec.fine_tunes.is_empty() {
            order = order.without(Axis::FineTuneWeight);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::spec::FineTune;
    use std::path::PathBuf;

    #[test]
    fn partial_order_appends_missing_axes() {
        let order = AxisOrder::from_partial(&[Axis::Step, Axis::Prompt], &[], &[]).unwrap();
        assert_eq!(
            order.axes(),
            &[
                Axis::Step,
                Axis::Prompt,
                Axis::Iteration,
                Axis::Scale,
                Axis::RefinerStrength,
                Axis::InitImage,
                Axis::InitStrength,
                Axis::FineTuneWeight,
            ]
        );
    }

    #[test]
    fn duplicate_and_conflicting_axes_are_rejected() {
        assert!(AxisOrder::from_partial(&[Axis::Step, Axis::Step], &[], &[]).is_err());
        assert!(AxisOrder::from_partial(&[], &[Axis::Prompt], &[Axis::Prompt]).is_err());
    }

    #[test]
    fn pruning_depends_on_spec() {
        let order = AxisOrder::default();
        let mut spec = SweepSpec::default();

        let pruned = order.pruned_for(&spec);
        assert!(!pruned.contains(Axis::InitStrength));
        assert!(!pruned.contains(Axis::FineTuneWeight));
        assert!(pruned.contains(Axis::InitImage));

        spec.init_images.push(PathBuf::from("a.png"));
        spec.fine_tunes.push(FineTune {
            name: "ink".into(),
            weights: vec![1.0],
        });
        assert_eq!(order.pruned_for(&spec), order);
    }
}
