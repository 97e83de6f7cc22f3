// src/sweep/expand.rs

//! Expansion of a [`SweepSpec`] into the ordered list of [`Job`]s.
//!
//! Iteration is an odometer over the active axes: the innermost axis
//! advances on every job, an outer axis advances when every axis nested
//! inside it wrapped around. The position where the odometer carried to
//! decides the seed of the next job (see [`AxisOrder`]).

use std::path::PathBuf;

use crate::sweep::order::{Axis, AxisOrder};
use crate::sweep::spec::SweepSpec;

/// One fully resolved combination of axis values.
///
/// `None` means the axis had no configured values and the worker default
/// applies.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Position in expansion order, starting at 0.
    pub index: usize,
    pub prompt_index: usize,
    pub prompt: String,
    pub iteration: u32,
    pub seed: i64,
    pub scale: Option<f32>,
    pub steps: Option<u32>,
    pub refiner_strength: Option<f32>,
    pub init_image: Option<PathBuf>,
    pub init_strength: Option<f32>,
    pub fine_tune_weight: Option<f32>,
}

/// Lazily yields the jobs of a sweep in iteration order.
#[derive(Debug)]
pub struct Expander<'a> {
    spec: &'a SweepSpec,
    order: AxisOrder,
    dims: Vec<usize>,
    cursor: Vec<usize>,
    next_index: usize,
    total: usize,
    seed: i64,
}

impl<'a> Expander<'a> {
    /// `order` is used as given; call [`AxisOrder::pruned_for`] first to
    /// drop degenerate axes.
    pub fn new(spec: &'a SweepSpec, order: &AxisOrder) -> Self {
        let dims: Vec<usize> = order
            .axes()
            .iter()
            .map(|axis| axis_len(spec, *axis))
            .collect();
        let total = dims.iter().product();

        Self {
            spec,
            order: order.clone(),
            cursor: vec![0; dims.len()],
            dims,
            next_index: 0,
            total,
            seed: spec.seed,
        }
    }

    /// Advance the odometer; returns the outermost position that moved.
    fn advance(&mut self) -> usize {
        let mut pos = self.cursor.len();
        while pos > 0 {
            pos -= 1;
            self.cursor[pos] += 1;
            if self.cursor[pos] < self.dims[pos] {
                return pos;
            }
            self.cursor[pos] = 0;
        }
        0
    }

    fn next_seed(&self, changed: &[Axis]) -> i64 {
        if self.spec.lock_seed {
            return self.spec.seed;
        }
        if changed.iter().any(|axis| self.order.resets_seed(*axis)) {
            return self.spec.seed;
        }
        if self.order.has_seed_increment() {
            self.seed.saturating_add(1)
        } else {
            self.seed
        }
    }

    fn position_of(&self, axis: Axis) -> usize {
        self.order
            .axes()
            .iter()
            .position(|a| *a == axis)
            .map(|pos| self.cursor[pos])
            .unwrap_or(0)
    }

    fn build_job(&self) -> Job {
        let spec = self.spec;
        let prompt_index = self.position_of(Axis::Prompt);

        Job {
            index: self.next_index,
            prompt_index,
            prompt: spec.prompts.get(prompt_index).cloned().unwrap_or_default(),
            iteration: self.position_of(Axis::Iteration) as u32,
            seed: self.seed,
            scale: spec.scales.get(self.position_of(Axis::Scale)).copied(),
            steps: spec.steps.get(self.position_of(Axis::Step)).copied(),
            refiner_strength: spec
                .refiner_strengths
                .get(self.position_of(Axis::RefinerStrength))
                .copied(),
            init_image: spec
                .init_images
                .get(self.position_of(Axis::InitImage))
                .cloned(),
            init_strength: if self.order.contains(Axis::InitStrength) {
                spec.init_strengths
                    .get(self.position_of(Axis::InitStrength))
                    .copied()
            } else {
                None
            },
            fine_tune_weight: fine_tune_value(spec, self.position_of(Axis::FineTuneWeight)),
        }
    }
}

impl Iterator for Expander<'_> {
    type Item = Job;

    fn next(&mut self) -> Option<Job> {
        if self.next_index >= self.total {
            return None;
        }

        if self.next_index > 0 {
            let changed_from = self.advance();
            let changed: Vec<Axis> = self.order.axes()[changed_from..].to_vec();
            self.seed = self.next_seed(&changed);
        }

        let job = self.build_job();
        self.next_index += 1;
        Some(job)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next_index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Expander<'_> {}

/// Materialize every job of the sweep.
pub fn expand(spec: &SweepSpec, order: &AxisOrder) -> Vec<Job> {
    Expander::new(spec, order).collect()
}

/// Cardinality of an axis, never 0.
fn axis_len(spec: &SweepSpec, axis: Axis) -> usize {
    let len = match axis {
        Axis::Prompt => spec.prompts.len(),
        Axis::Iteration => spec.iterations as usize,
        Axis::Scale => spec.scales.len(),
        Axis::Step => spec.steps.len(),
        Axis::RefinerStrength => spec.refiner_strengths.len(),
        Axis::InitImage => spec.init_images.len(),
        Axis::InitStrength if spec.has_init_images() => spec.init_strengths.len(),
        Axis::InitStrength => 1,
        Axis::FineTuneWeight => spec.fine_tune_multiplier(),
    };
    len.max(1)
}

fn fine_tune_value(spec: &SweepSpec, position: usize) -> Option<f32> {
    match spec.fine_tunes.as_slice() {
        [] => None,
        [single] => single.weights.get(position).copied(),
        [first, ..] => first.weights.first().copied(),
    }
}

/// `"seed 100 → seed 103"` style summary of the seeds a job list uses.
pub fn first_last_seed(jobs: &[Job]) -> String {
    match (jobs.first(), jobs.last()) {
        (Some(first), Some(last)) if first.seed != last.seed => {
            format!("seed {} → seed {}", first.seed, last.seed)
        }
        (Some(first), _) => format!("seed {}", first.seed),
        _ => "no seeds".to_string(),
    }
}

/// Human-readable breakdown of the job count, e.g.
/// `"2 prompts * 1 image * 2 step values * 1 scale = 4 images total."`.
pub fn describe_count(spec: &SweepSpec, job_count: usize, post_doubling: bool) -> String {
    let mut log = format!(
        "{} * {} * {} * {}",
        plural(spec.prompts.len().max(1), "prompt"),
        plural(spec.iterations.max(1) as usize, "image"),
        plural(spec.steps.len().max(1), "step value"),
        plural(spec.scales.len().max(1), "scale"),
    );

    if spec.refiner_strengths.len() > 1 {
        log.push_str(&format!(
            " * {}",
            plural(spec.refiner_strengths.len(), "refiner strength")
        ));
    }

    if spec.has_init_images() {
        log.push_str(&format!(
            " and {} using {}",
            plural(spec.init_images.len(), "image"),
            plural(spec.init_strengths.len().max(1), "strength")
        ));
    }

    if spec.fine_tune_multiplier() > 1 {
        log.push_str(&format!(
            " * {}",
            plural(spec.fine_tune_multiplier(), "fine-tune weight")
        ));
    }

    log.push_str(&format!(" = {} total", plural(job_count, "image")));

    if post_doubling {
        log.push_str(&format!(" ({} with post-processed images)", job_count * 2));
    }

    log.push('.');
    log
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::spec::FineTune;

    fn order(axes: &[Axis]) -> AxisOrder {
        AxisOrder::new(axes.to_vec())
            .with_seed_reset(Axis::Prompt)
            .with_seed_increment(Axis::Iteration)
    }

    fn summary(jobs: &[Job]) -> Vec<(String, Option<u32>, i64)> {
        jobs.iter()
            .map(|j| (j.prompt.clone(), j.steps, j.seed))
            .collect()
    }

    #[test]
    fn two_prompts_two_steps() {
        let spec = SweepSpec {
            prompts: vec!["prompt1".into(), "prompt2".into()],
            iterations: 1,
            steps: vec![20, 30],
            scales: vec![7.5],
            seed: 100,
            ..SweepSpec::default()
        };
        let jobs = expand(&spec, &order(&[Axis::Prompt, Axis::Iteration, Axis::Step]));

        assert_eq!(
            summary(&jobs),
            vec![
                ("prompt1".to_string(), Some(20), 100),
                ("prompt1".to_string(), Some(30), 101),
                ("prompt2".to_string(), Some(20), 100),
                ("prompt2".to_string(), Some(30), 101),
            ]
        );
        assert_eq!(jobs.iter().map(|j| j.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn iterations_count_up_then_reset_per_prompt() {
        let spec = SweepSpec {
            prompts: vec!["a".into(), "b".into()],
            iterations: 4,
            seed: 7,
            ..SweepSpec::default()
        };
        let jobs = expand(&spec, &order(&[Axis::Prompt, Axis::Iteration]));
        let seeds: Vec<i64> = jobs.iter().map(|j| j.seed).collect();
        assert_eq!(seeds, vec![7, 8, 9, 10, 7, 8, 9, 10]);
        assert_eq!(first_last_seed(&jobs[..4]), "seed 7 → seed 10");
    }

    #[test]
    fn lock_seed_keeps_start_seed() {
        let spec = SweepSpec {
            prompts: vec!["a".into(), "b".into()],
            iterations: 3,
            steps: vec![10, 20],
            seed: 42,
            lock_seed: true,
            ..SweepSpec::default()
        };
        let jobs = expand(&spec, &AxisOrder::default().pruned_for(&spec));
        assert_eq!(jobs.len(), 12);
        assert!(jobs.iter().all(|j| j.seed == 42));
    }

    #[test]
    fn without_increment_axis_seed_is_constant() {
        let spec = SweepSpec {
            iterations: 3,
            seed: 5,
            ..SweepSpec::default()
        };
        let jobs = expand(&spec, &AxisOrder::new(vec![Axis::Iteration]));
        assert!(jobs.iter().all(|j| j.seed == 5));
    }

    #[test]
    fn init_images_cross_strengths() {
        let spec = SweepSpec {
            init_images: vec![PathBuf::from("a.png"), PathBuf::from("b.png")],
            init_strengths: vec![0.25, 0.5],
            ..SweepSpec::default()
        };
        let jobs = expand(&spec, &AxisOrder::default().pruned_for(&spec));
        let combos: Vec<(PathBuf, f32)> = jobs
            .iter()
            .map(|j| (j.init_image.clone().unwrap(), j.init_strength.unwrap()))
            .collect();
        assert_eq!(
            combos,
            vec![
                (PathBuf::from("a.png"), 0.25),
                (PathBuf::from("a.png"), 0.5),
                (PathBuf::from("b.png"), 0.25),
                (PathBuf::from("b.png"), 0.5),
            ]
        );
    }

    #[test]
    fn strengths_ignored_without_images() {
        let spec = SweepSpec {
            init_strengths: vec![0.25, 0.5, 0.75],
            ..SweepSpec::default()
        };
        let jobs = expand(&spec, &AxisOrder::default().pruned_for(&spec));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].init_strength, None);
        assert_eq!(jobs[0].init_image, None);
    }

    #[test]
    fn multiple_fine_tunes_use_first_weight_once() {
        let spec = SweepSpec {
            fine_tunes: vec![
                FineTune {
                    name: "ink".into(),
                    weights: vec![0.4, 0.8],
                },
                FineTune {
                    name: "oil".into(),
                    weights: vec![1.0],
                },
            ],
            ..SweepSpec::default()
        };
        let jobs = expand(&spec, &AxisOrder::default().pruned_for(&spec));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].fine_tune_weight, Some(0.4));
    }

    #[test]
    fn expander_reports_exact_size() {
        let spec = SweepSpec {
            prompts: vec!["a".into()],
            iterations: 2,
            scales: vec![5.0, 7.0, 9.0],
            ..SweepSpec::default()
        };
        let order = AxisOrder::default().pruned_for(&spec);
        let mut expander = Expander::new(&spec, &order);
        assert_eq!(expander.len(), 6);
        expander.next();
        assert_eq!(expander.len(), 5);
    }

    #[test]
    fn count_description() {
        let spec = SweepSpec {
            prompts: vec!["a".into(), "b".into()],
            iterations: 1,
            steps: vec![20, 30],
            scales: vec![7.5],
            ..SweepSpec::default()
        };
        assert_eq!(
            describe_count(&spec, 4, false),
            "2 prompts * 1 image * 2 step values * 1 scale = 4 images total."
        );
        assert!(describe_count(&spec, 4, true).ends_with("(8 with post-processed images)."));
    }
}
