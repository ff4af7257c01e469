use super::detection::{DetectionRecord, Feature};
use super::error::ProviderError;
use super::frame::PreparedFrame;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Label providers report at most this many records per frame.
pub const LABEL_RECORDS_PER_FRAME: usize = 20;

/// A perceptual model behind a narrow contract: one feature, one frame in,
/// detection records out.
pub trait CapabilityProvider: Send + Sync {
    fn name(&self) -> &str;

    fn feature(&self) -> Feature;

    /// False when the model failed to load; the feature is skipped.
    fn is_available(&self) -> bool {
        true
    }

    fn infer(&self, frame: &PreparedFrame) -> Result<Vec<DetectionRecord>, ProviderError>;
}

/// Drop records of the wrong kind and cap label output to the most
/// confident ones. Returns the kept records and how many were of the wrong
/// kind.
pub fn normalize_records(feature: Feature, records: Vec<DetectionRecord>) -> (Vec<DetectionRecord>, usize) {
    let total = records.len();
    let mut kept: Vec<DetectionRecord> = records.into_iter().filter(|r| r.feature() == feature).collect();
    let mismatched = total - kept.len();

    if feature == Feature::Labels && kept.len() > LABEL_RECORDS_PER_FRAME {
        kept.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));
        kept.truncate(LABEL_RECORDS_PER_FRAME);
    }
    (kept, mismatched)
}

type Responder = dyn Fn(&PreparedFrame) -> Result<Vec<DetectionRecord>, ProviderError> + Send + Sync;

/// 模拟 provider（用于测试和降级场景）
pub struct MockProvider {
    name: String,
    feature: Feature,
    available: bool,
    responder: Box<Responder>,
    calls: AtomicUsize,
}

impl MockProvider {
    /// Available, returns no records.
    pub fn new(name: impl Into<String>, feature: Feature) -> Self {
        Self::with_pattern(name, feature, |_| Ok(Vec::new()))
    }

    pub fn with_pattern<F>(name: impl Into<String>, feature: Feature, responder: F) -> Self
    where
        F: Fn(&PreparedFrame) -> Result<Vec<DetectionRecord>, ProviderError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            feature,
            available: true,
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
        }
    }

    /// Same records for every frame.
    pub fn with_records(name: impl Into<String>, feature: Feature, records: Vec<DetectionRecord>) -> Self {
        Self::with_pattern(name, feature, move |_| Ok(records.clone()))
    }

    pub fn failing(name: impl Into<String>, feature: Feature, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        let provider = name.clone();
        Self::with_pattern(name, feature, move |_| {
            Err(ProviderError::inference(provider.clone(), message.clone()))
        })
    }

    pub fn unavailable(name: impl Into<String>, feature: Feature) -> Self {
        Self {
            available: false,
            ..Self::new(name, feature)
        }
    }

    /// Number of `infer` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CapabilityProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn feature(&self) -> Feature {
        self.feature
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn infer(&self, frame: &PreparedFrame) -> Result<Vec<DetectionRecord>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.available {
            return Err(ProviderError::Unavailable(self.name.clone()));
        }
        (self.responder)(frame)
    }
}
