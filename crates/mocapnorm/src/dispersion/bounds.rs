use serde::{Deserialize, Serialize};

use crate::bones::{BoneDef, BoneStatistic};

/// Lengths within this distance of a bound count as in bounds.
pub(crate) const BOUND_TOLERANCE: f64 = 1e-9;

/// How the tolerance interval of a bone is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalVariable {
    /// `median · (1 ∓ factor)`, factor clamped to `[0, 1]`.
    #[default]
    CaptureMedian,
    /// `median ∓ factor · stdev`, factor clamped to `[0, median / stdev]`.
    CaptureStdev,
    /// `reference_length · body_height · (1 ∓ factor)`, factor clamped to `[0, 1]`.
    StandardLength,
}

impl std::fmt::Display for IntervalVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CaptureMedian => write!(f, "capture_median"),
            Self::CaptureStdev => write!(f, "capture_stdev"),
            Self::StandardLength => write!(f, "standard_length"),
        }
    }
}

/// Closed `[inferior, superior]` range a bone length must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LengthInterval {
    pub inferior: f64,
    pub superior: f64,
}

impl LengthInterval {
    pub fn contains(&self, length: f64) -> bool {
        length >= self.inferior - BOUND_TOLERANCE && length <= self.superior + BOUND_TOLERANCE
    }

    /// The bound a length violates, or `None` when it is in bounds.
    pub fn violated_bound(&self, length: f64) -> Option<f64> {
        if length < self.inferior - BOUND_TOLERANCE {
            Some(self.inferior)
        } else if length > self.superior + BOUND_TOLERANCE {
            Some(self.superior)
        } else {
            None
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.superior - self.inferior <= BOUND_TOLERANCE
    }
}

/// Reason a bone gets no interval.
#[derive(Debug, Clone, PartialEq)]
pub enum IntervalUnavailable {
    /// No frame has a defined length.
    NoValidFrames,
    /// `standard_length` needs a reference length.
    NoReferenceLength,
}

impl std::fmt::Display for IntervalUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoValidFrames => write!(f, "no frame with a defined length"),
            Self::NoReferenceLength => write!(f, "standard_length mode needs a reference_length"),
        }
    }
}

/// Effective tolerance factor after the per-mode clamp.
pub fn clamp_factor(mode: IntervalVariable, factor: f64, stat: &BoneStatistic) -> f64 {
    let factor = factor.max(0.0);
    match mode {
        IntervalVariable::CaptureMedian | IntervalVariable::StandardLength => factor.min(1.0),
        IntervalVariable::CaptureStdev => {
            if stat.stdev > 0.0 {
                factor.min(stat.median / stat.stdev)
            } else {
                0.0
            }
        }
    }
}

/// Tolerance interval of one bone under `mode`.
pub fn length_interval(
    mode: IntervalVariable,
    factor: f64,
    body_height: f64,
    bone: &BoneDef,
    stat: &BoneStatistic,
) -> Result<LengthInterval, IntervalUnavailable> {
    if stat.n_valid == 0 || !stat.median.is_finite() {
        return Err(IntervalUnavailable::NoValidFrames);
    }
    let k = clamp_factor(mode, factor, stat);
    let (inferior, superior) = match mode {
        IntervalVariable::CaptureMedian => (stat.median * (1.0 - k), stat.median * (1.0 + k)),
        IntervalVariable::CaptureStdev => {
            let spread = if stat.stdev.is_finite() { k * stat.stdev } else { 0.0 };
            (stat.median - spread, stat.median + spread)
        }
        IntervalVariable::StandardLength => {
            let reference = bone
                .reference_length
                .ok_or(IntervalUnavailable::NoReferenceLength)?
                * body_height;
            (reference * (1.0 - k), reference * (1.0 + k))
        }
    };
    Ok(LengthInterval { inferior, superior })
}
