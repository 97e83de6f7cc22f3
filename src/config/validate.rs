// src/config/validate.rs

use std::time::Duration;

use crate::backend::WorkerSettings;
use crate::cancel::CancelOptions;
use crate::config::model::{
    RawRunFile, RawRunSection, RawSweep, RawWorkerSection, RunFile, SweepEntry, ValueList,
};
use crate::engine::RunOptions;
use crate::errors::{Result, SweepError};
use crate::sweep::values::{parse_float_list, parse_int_list};
use crate::sweep::{Axis, AxisOrder, FineTune, GenerationFlags, Resolution, SweepSpec};

impl TryFrom<RawRunFile> for RunFile {
    type Error = SweepError;

    fn try_from(raw: RawRunFile) -> std::result::Result<Self, Self::Error> {
        if raw.sweep.is_empty() {
            return Err(SweepError::ConfigError(
                "run file must contain at least one [[sweep]] section".to_string(),
            ));
        }

        let worker = validate_worker(raw.worker)?;
        let options = validate_run(&raw.run)?;
        let sweeps = raw
            .sweep
            .into_iter()
            .enumerate()
            .map(|(i, sweep)| validate_sweep(i, sweep))
            .collect::<Result<Vec<_>>>()?;

        Ok(RunFile {
            worker,
            options,
            sweeps,
        })
    }
}

fn validate_worker(raw: RawWorkerSection) -> Result<WorkerSettings> {
    if raw.model.trim().is_empty() {
        return Err(SweepError::ConfigError(
            "[worker].model must not be empty".to_string(),
        ));
    }
    if raw.program.trim().is_empty() {
        return Err(SweepError::ConfigError(
            "[worker].program must not be empty".to_string(),
        ));
    }

    Ok(WorkerSettings {
        backend: raw.backend,
        program: raw.program,
        args: raw.args,
        env: raw.env,
        working_dir: raw.working_dir,
        model: raw.model,
        models_dir: raw.models_dir,
        output_dir: raw.output_dir,
        device_index: raw.device_index,
        clip_skip: raw.clip_skip,
        optimize: raw.optimize,
        ready_pattern: raw.ready_pattern,
    })
}

fn validate_run(raw: &RawRunSection) -> Result<RunOptions> {
    let defaults = RunOptions::default();
    let duration = |value: &Option<String>, field: &str| -> Result<Option<Duration>> {
        value
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(|e| SweepError::ConfigError(format!("[run].{field}: {e}")))
    };

    let ready_timeout = duration(&raw.ready_timeout, "ready_timeout")?
        .unwrap_or(defaults.ready_timeout);
    let idle_timeout =
        duration(&raw.idle_timeout, "idle_timeout")?.unwrap_or(defaults.idle_timeout);
    if ready_timeout.is_zero() || idle_timeout.is_zero() {
        return Err(SweepError::ConfigError(
            "[run] timeouts must be greater than zero".to_string(),
        ));
    }

    let mut cancel = CancelOptions::default();
    if let Some(bound) = duration(&raw.cancel_timeout, "cancel_timeout")? {
        cancel.safety_bound = bound;
    }

    Ok(RunOptions {
        ready_timeout,
        idle_timeout,
        command_interval: duration(&raw.command_interval, "command_interval")?,
        artifact_pattern: raw
            .artifact_pattern
            .clone()
            .unwrap_or(defaults.artifact_pattern),
        post_doubling: raw.post_doubling,
        cancel,
    })
}

fn validate_sweep(index: usize, raw: RawSweep) -> Result<SweepEntry> {
    let err = |msg: String| SweepError::ConfigError(format!("[[sweep]] #{}: {msg}", index + 1));

    if raw.width == 0 || raw.height == 0 {
        return Err(err(format!(
            "resolution must be positive (got {}x{})",
            raw.width, raw.height
        )));
    }
    if raw.prompts.iter().all(|p| p.trim().is_empty()) {
        return Err(err("at least one non-empty prompt is required".to_string()));
    }

    let fine_tunes = raw
        .fine_tunes
        .iter()
        .map(|ft| {
            Ok(FineTune {
                name: ft.name.clone(),
                weights: floats(&ft.weights).map_err(|e| err(format!("fine_tunes.{}: {e}", ft.name)))?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let order = AxisOrder::from_partial(
        &raw.axis_order,
        raw.seed_reset.as_deref().unwrap_or(&[Axis::Prompt]),
        raw.seed_increment.as_deref().unwrap_or(&[Axis::Iteration]),
    )
    .map_err(err)?;

    let mut defaults = SweepSpec::default();
    if let Some(sampler) = raw.sampler {
        defaults.sampler = sampler;
    }

    let sweep = SweepSpec {
        prompts: raw
            .prompts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect(),
        negative_prompt: raw.negative_prompt,
        iterations: raw.iterations.max(1),
        steps: ints(&raw.steps).map_err(|e| err(format!("steps: {e}")))?,
        scales: floats(&raw.scales).map_err(|e| err(format!("scales: {e}")))?,
        refiner_strengths: floats(&raw.refiner_strengths)
            .map_err(|e| err(format!("refiner_strengths: {e}")))?,
        init_images: raw.init_images,
        init_strengths: floats(&raw.init_strengths)
            .map_err(|e| err(format!("init_strengths: {e}")))?,
        fine_tunes,
        seed: raw.seed,
        lock_seed: raw.lock_seed,
        resolution: Resolution {
            width: raw.width,
            height: raw.height,
        },
        flags: GenerationFlags {
            seamless: raw.seamless,
            symmetry: raw.symmetry,
            hires_fix: raw.hires_fix,
            perlin: raw.perlin,
            threshold: raw.threshold,
            image_mode: raw.image_mode,
            mask_path: raw.mask_path,
            text_mask: raw.text_mask,
            append_args: raw.append_args,
        },
        ..defaults
    };

    if sweep.checked_job_count().is_none() {
        return Err(err("the sweep expands to more jobs than can be counted".to_string()));
    }

    Ok(SweepEntry { sweep, order })
}

fn floats(list: &ValueList) -> std::result::Result<Vec<f32>, String> {
    match list {
        ValueList::Numbers(values) => Ok(values.iter().map(|v| *v as f32).collect()),
        ValueList::Text(text) => parse_float_list(text),
    }
}

fn ints(list: &ValueList) -> std::result::Result<Vec<u32>, String> {
    match list {
        ValueList::Numbers(values) => values
            .iter()
            .map(|v| {
                if *v < 0.0 || v.fract() != 0.0 || *v > f64::from(u32::MAX) {
                    Err(format!("invalid integer {v}"))
                } else {
                    Ok(*v as u32)
                }
            })
            .collect(),
        ValueList::Text(text) => parse_int_list(text),
    }
}

/// Parse `"<n>ms"`, `"<n>s"`, `"<n>m"` or `"<n>h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    let secs = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    };
    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => secs(1),
        "m" => secs(60),
        "h" => secs(60 * 60),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}
