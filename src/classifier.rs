use tracing::debug;

use crate::types::{ComparisonPolicy, ImuFrame, PostureClassification};

/// Compares frames against a captured reference posture
#[derive(Debug, Clone)]
pub struct Classifier {
    reference: Option<ImuFrame>,
    threshold: f64,
    policy: ComparisonPolicy,
}

impl Classifier {
    /// Create a classifier without a reference
    #[must_use]
    pub const fn new(threshold: f64, policy: ComparisonPolicy) -> Self {
        Self {
            reference: None,
            threshold,
            policy,
        }
    }

    /// Replace the reference posture, returning the previous one
    pub fn set_reference(&mut self, frame: ImuFrame) -> Option<ImuFrame> {
        debug!("Reference posture set from frame {}", frame.id);
        self.reference.replace(frame)
    }

    /// Current reference posture
    #[must_use]
    pub const fn reference(&self) -> Option<&ImuFrame> {
        self.reference.as_ref()
    }

    /// Deviation threshold in effect
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Classify `frame` against the reference
    ///
    /// Deviation exactly equal to the threshold is still good posture.
    #[must_use]
    pub fn classify(&self, frame: &ImuFrame) -> PostureClassification {
        let Some(reference) = &self.reference else {
            return PostureClassification::Unknown;
        };

        let deviation = match self.policy {
            ComparisonPolicy::FirstSample => frame
                .first_sample()
                .zip(reference.first_sample())
                .map(|(current, baseline)| current.max_deviation(baseline)),
            ComparisonPolicy::AllSamples => frame
                .samples
                .iter()
                .zip(&reference.samples)
                .map(|(current, baseline)| current.max_deviation(baseline))
                .reduce(f64::max),
        };

        match deviation {
            None => PostureClassification::Unknown,
            Some(d) if d > self.threshold => PostureClassification::Bad,
            Some(_) => PostureClassification::Good,
        }
    }
}
