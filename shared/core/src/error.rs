use crate::placement::Placement;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ShapeMismatch,
    SpecInvalid,
    RankNotInPlacement,
    TransportFailed,
    UnsupportedBoxing,
    Unimplemented,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ShapeMismatch => "shape mismatch",
            ErrorKind::SpecInvalid => "invalid spec",
            ErrorKind::RankNotInPlacement => "rank not in placement",
            ErrorKind::TransportFailed => "transport failed",
            ErrorKind::UnsupportedBoxing => "unsupported boxing",
            ErrorKind::Unimplemented => "unimplemented boxing",
        };
        write!(f, "{name}")
    }
}

/// Structured failure surfaced by the boxing engine.
///
/// Local validation failures (shape/spec/residence) carry no step context;
/// failures during plan execution identify the step, placement, and grid
/// axis that went wrong.
#[derive(Debug, Clone)]
pub struct BoxingError {
    pub kind: ErrorKind,
    pub placement: Option<Placement>,
    pub grid_axis: Option<usize>,
    pub step_index: Option<usize>,
    pub message: String,
}

impl BoxingError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        BoxingError {
            kind,
            placement: None,
            grid_axis: None,
            step_index: None,
            message: message.into(),
        }
    }

    pub fn shape_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ShapeMismatch, message)
    }

    pub fn spec_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SpecInvalid, message)
    }

    pub fn rank_not_in_placement(rank: usize, placement: &Placement) -> Self {
        Self::new(
            ErrorKind::RankNotInPlacement,
            format!("rank {rank} is not in {placement}"),
        )
        .with_placement(placement)
    }

    pub fn transport_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportFailed, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnsupportedBoxing, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unimplemented, message)
    }

    pub fn with_placement(mut self, placement: &Placement) -> Self {
        self.placement = Some(placement.clone());
        self
    }

    pub fn with_axis(mut self, axis: usize) -> Self {
        self.grid_axis = Some(axis);
        self
    }

    pub fn with_step(mut self, step_index: usize) -> Self {
        self.step_index = Some(step_index);
        self
    }
}

impl fmt::Display for BoxingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(step) = self.step_index {
            write!(f, " at step {step}")?;
        }
        if let Some(placement) = &self.placement {
            write!(f, " on {placement}")?;
        }
        if let Some(axis) = self.grid_axis {
            write!(f, " (grid axis {axis})")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for BoxingError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let placement = Placement::host(vec![0, 1]).unwrap();
        let err = BoxingError::transport_failed("all-gather timed out")
            .with_placement(&placement)
            .with_axis(0)
            .with_step(2);
        let text = err.to_string();
        assert!(text.contains("transport failed"));
        assert!(text.contains("step 2"));
        assert!(text.contains("grid axis 0"));
        assert!(text.contains("all-gather timed out"));
    }
}
