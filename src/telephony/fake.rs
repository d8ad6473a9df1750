//! In-process gateway for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    CallMetadata, CallRequest, PlacedCall, QualityMetrics, RecordingRef, TelephonyError,
    TelephonyGateway,
};

pub(crate) struct FakeGateway {
    pub call_id: String,
    pub placed: Mutex<Vec<CallRequest>>,
    pub place_error: Mutex<Option<TelephonyError>>,
    pub quality: Mutex<Option<QualityMetrics>>,
    pub quality_polls: AtomicUsize,
}

impl FakeGateway {
    pub fn new(call_id: &str) -> Self {
        Self {
            call_id: call_id.to_string(),
            placed: Mutex::new(Vec::new()),
            place_error: Mutex::new(None),
            quality: Mutex::new(None),
            quality_polls: AtomicUsize::new(0),
        }
    }

    pub fn with_quality(self, q: QualityMetrics) -> Self {
        *self.quality.lock().unwrap() = Some(q);
        self
    }

    pub fn failing(self, e: TelephonyError) -> Self {
        *self.place_error.lock().unwrap() = Some(e);
        self
    }
}

#[async_trait]
impl TelephonyGateway for FakeGateway {
    async fn place_call(&self, req: &CallRequest) -> Result<PlacedCall, TelephonyError> {
        if let Some(e) = self.place_error.lock().unwrap().take() {
            return Err(e);
        }
        self.placed.lock().unwrap().push(req.clone());
        Ok(PlacedCall {
            call_id: self.call_id.clone(),
            status: "queued".into(),
        })
    }

    async fn fetch_call_metadata(&self, call_id: &str) -> Result<CallMetadata, TelephonyError> {
        Err(TelephonyError::NotFound(call_id.to_string()))
    }

    async fn fetch_quality_metrics(
        &self,
        _call_id: &str,
    ) -> Result<Option<QualityMetrics>, TelephonyError> {
        self.quality_polls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.quality.lock().unwrap())
    }

    async fn fetch_recordings(&self, _call_id: &str) -> Result<Vec<RecordingRef>, TelephonyError> {
        Ok(Vec::new())
    }
}
