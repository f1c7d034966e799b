use crate::{
    classifier::Classifier,
    error::{Result, TurtlUpError},
    history::{History, HistoryStats},
    types::{ImuFrame, MonitorConfig, PostureClassification},
};

/// Result of feeding one frame through the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ingested {
    /// Verdict for the frame
    pub classification: PostureClassification,
    /// Whether the verdict was added to history
    pub recorded: bool,
}

/// Posture state shared by the session: current frame, reference, history
///
/// Holds exactly one current frame and at most one reference at a time.
#[derive(Debug)]
pub struct PostureTracker {
    classifier: Classifier,
    history: History,
    current: Option<ImuFrame>,
    classification: PostureClassification,
}

impl PostureTracker {
    /// Create a tracker from monitor settings
    #[must_use]
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            classifier: Classifier::new(config.threshold, config.comparison),
            history: History::new(config.history_capacity),
            current: None,
            classification: PostureClassification::Unknown,
        }
    }

    /// Classify a new frame, make it current and record the verdict
    pub fn ingest(&mut self, frame: ImuFrame) -> Ingested {
        let classification = self.classifier.classify(&frame);
        let recorded = self.history.record(classification);
        self.current = Some(frame);
        self.classification = classification;

        Ingested {
            classification,
            recorded,
        }
    }

    /// Replace the reference posture
    ///
    /// The current verdict is recomputed against the new baseline; history is
    /// left untouched.
    pub fn set_reference(&mut self, frame: ImuFrame) -> PostureClassification {
        self.classifier.set_reference(frame);
        self.classification = self
            .current
            .as_ref()
            .map_or(PostureClassification::Unknown, |current| {
                self.classifier.classify(current)
            });
        self.classification
    }

    /// Promote the current frame to reference
    ///
    /// # Errors
    ///
    /// Returns [`TurtlUpError::NoFrame`] if no frame has been received yet.
    pub fn capture_reference(&mut self) -> Result<ImuFrame> {
        let frame = self.current.clone().ok_or(TurtlUpError::NoFrame)?;
        self.set_reference(frame.clone());
        Ok(frame)
    }

    /// Most recent frame
    #[must_use]
    pub const fn current_frame(&self) -> Option<&ImuFrame> {
        self.current.as_ref()
    }

    /// Reference posture
    #[must_use]
    pub const fn reference(&self) -> Option<&ImuFrame> {
        self.classifier.reference()
    }

    /// Per-axis deviation above which posture is bad
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.classifier.threshold()
    }

    /// Verdict for the current frame against the current reference
    #[must_use]
    pub const fn classification(&self) -> PostureClassification {
        self.classification
    }

    /// History buffer
    #[must_use]
    pub const fn history(&self) -> &History {
        &self.history
    }

    /// Statistics over history
    #[must_use]
    pub fn stats(&self) -> HistoryStats {
        self.history.stats()
    }

    /// Forget recorded history
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}
