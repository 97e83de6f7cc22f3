// src/output/markers.rs

//! Regex markers a backend prints, and the classification of one output
//! line against them.

use std::collections::BTreeSet;

use regex::Regex;

/// Kinds of marker a backend may recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MarkerKind {
    Readiness,
    ModelLoaded,
    Phase,
    Progress,
    Completion,
    Error,
}

/// A named pipeline phase with its share of the per-image progress bar.
///
/// Percent within the phase maps to `offset + percent * weight`.
#[derive(Debug, Clone)]
pub struct PhaseMarker {
    pub pattern: Regex,
    pub weight: f32,
    pub offset: f32,
}

/// The full marker set of a backend.
///
/// Only `readiness` is mandatory; a backend that never reports progress
/// simply leaves the other patterns unset.
#[derive(Debug, Clone)]
pub struct LineMarkers {
    pub readiness: Regex,
    pub model_loaded: Option<Regex>,
    pub phases: Vec<PhaseMarker>,
    /// Must capture the percentage as group 1.
    pub progress: Option<Regex>,
    /// Lines matching this are never treated as progress (model loading
    /// bars share the same format).
    pub progress_exclude: Option<Regex>,
    /// Named groups: optional `count` (defaults to 1), `secs`.
    pub completion: Option<Regex>,
    pub error: Option<Regex>,
}

/// Classification of one output line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Ready,
    ModelLoaded,
    /// Index into [`LineMarkers::phases`].
    Phase(usize),
    Progress(u32),
    Completed { count: u32, seconds: Option<f32> },
    Error,
    Unrecognized,
}

impl LineMarkers {
    pub fn new(readiness: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            readiness: Regex::new(readiness)?,
            model_loaded: None,
            phases: Vec::new(),
            progress: None,
            progress_exclude: None,
            completion: None,
            error: None,
        })
    }

    pub fn with_model_loaded(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.model_loaded = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn with_phase(mut self, pattern: &str, weight: f32, offset: f32) -> Result<Self, regex::Error> {
        self.phases.push(PhaseMarker {
            pattern: Regex::new(pattern)?,
            weight,
            offset,
        });
        Ok(self)
    }

    pub fn with_progress(mut self, pattern: &str, exclude: Option<&str>) -> Result<Self, regex::Error> {
        self.progress = Some(Regex::new(pattern)?);
        self.progress_exclude = exclude.map(Regex::new).transpose()?;
        Ok(self)
    }

    pub fn with_completion(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.completion = Some(Regex::new(pattern)?);
        Ok(self)
    }

    pub fn with_error(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.error = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Replace the readiness pattern (user override from the run file).
    pub fn with_readiness(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.readiness = Regex::new(pattern)?;
        Ok(self)
    }

    pub fn recognized(&self) -> BTreeSet<MarkerKind> {
        let mut kinds = BTreeSet::from([MarkerKind::Readiness]);
        if self.model_loaded.is_some() {
            kinds.insert(MarkerKind::ModelLoaded);
        }
        if !self.phases.is_empty() {
            kinds.insert(MarkerKind::Phase);
        }
        if self.progress.is_some() {
            kinds.insert(MarkerKind::Progress);
        }
        if self.completion.is_some() {
            kinds.insert(MarkerKind::Completion);
        }
        if self.error.is_some() {
            kinds.insert(MarkerKind::Error);
        }
        kinds
    }

    /// Classify `line`. The first matching marker wins, checked in this
    /// order: readiness, error, completion, progress, phase, model loaded.
    pub fn classify(&self, line: &str) -> LineEvent {
        if self.readiness.is_match(line) {
            return LineEvent::Ready;
        }

        if let Some(re) = &self.error {
            if re.is_match(line) {
                return LineEvent::Error;
            }
        }

        if let Some(caps) = self.completion.as_ref().and_then(|re| re.captures(line)) {
            let count = caps
                .name("count")
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(1);
            let seconds = caps
                .name("secs")
                .and_then(|m| m.as_str().trim_end_matches('.').parse::<f32>().ok());
            return LineEvent::Completed { count, seconds };
        }

        if let Some(re) = &self.progress {
            let excluded = self
                .progress_exclude
                .as_ref()
                .is_some_and(|ex| ex.is_match(line));
            if !excluded {
                if let Some(percent) = re
                    .captures(line)
                    .and_then(|caps| caps.get(1))
                    .and_then(|m| m.as_str().parse::<u32>().ok())
                {
                    return LineEvent::Progress(percent.min(100));
                }
            }
        }

        if let Some(idx) = self.phases.iter().position(|p| p.pattern.is_match(line)) {
            return LineEvent::Phase(idx);
        }

        if let Some(re) = &self.model_loaded {
            if re.is_match(line) {
                return LineEvent::ModelLoaded;
            }
        }

        LineEvent::Unrecognized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> LineMarkers {
        LineMarkers::new("^ready$")
            .and_then(|m| m.with_progress(r"(\d+)%\|", Some("Loading")))
            .and_then(|m| m.with_completion(r"(?P<count>\d+) image\(s\) generated in (?P<secs>[\d.]+)s"))
            .and_then(|m| m.with_error("error occurred"))
            .and_then(|m| m.with_phase("Running refine model", 0.3, 70.0))
            .unwrap()
    }

    #[test]
    fn classifies_known_lines() {
        let m = markers();
        assert_eq!(m.classify("ready"), LineEvent::Ready);
        assert_eq!(m.classify(" 45%|####      | 9/20"), LineEvent::Progress(45));
        assert_eq!(
            m.classify(">> 1 image(s) generated in 4.52s"),
            LineEvent::Completed {
                count: 1,
                seconds: Some(4.52)
            }
        );
        assert_eq!(m.classify("An error occurred: CUDA"), LineEvent::Error);
        assert_eq!(m.classify("Running refine model"), LineEvent::Phase(0));
    }

    #[test]
    fn excluded_progress_is_unrecognized() {
        let m = markers();
        assert_eq!(
            m.classify("Loading pipeline components: 50%|#####"),
            LineEvent::Unrecognized
        );
        assert_eq!(m.classify("hello world"), LineEvent::Unrecognized);
    }

    #[test]
    fn recognized_reflects_configured_markers() {
        let kinds = markers().recognized();
        assert!(kinds.contains(&MarkerKind::Progress));
        assert!(kinds.contains(&MarkerKind::Phase));
        assert!(!kinds.contains(&MarkerKind::ModelLoaded));
    }
}
