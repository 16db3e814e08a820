//! Shared access to one bridge
//!
//! [`SharedBridge`] puts reconfiguration and inference behind the same lock
//! so no caller observes a half-replaced session. [`InferenceGate`] adds an
//! async front with a single admission slot: one inference in flight, no
//! queue.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Semaphore;
use tracing::debug;

use super::backend::InferenceBackend;
use super::bridge::InferenceBridge;
use crate::error::{BridgeError, Result};

pub struct SharedBridge<B: InferenceBackend> {
    inner: Arc<Mutex<InferenceBridge<B>>>,
}

impl<B: InferenceBackend> Clone for SharedBridge<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: InferenceBackend> SharedBridge<B> {
    pub fn new(bridge: InferenceBridge<B>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bridge)),
        }
    }

    /// Exclusive access for reconfiguration
    pub fn lock(&self) -> MutexGuard<'_, InferenceBridge<B>> {
        self.inner.lock()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut InferenceBridge<B>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn run(&self, pixels: &mut [u8]) -> Result<()> {
        self.inner.lock().run(pixels)
    }
}

/// Async entry point that dispatches inference onto a blocking worker
pub struct InferenceGate<B: InferenceBackend> {
    shared: SharedBridge<B>,
    slot: Arc<Semaphore>,
}

impl<B> InferenceGate<B>
where
    B: InferenceBackend + Send + 'static,
    B::Network: Send,
    B::Request: Send,
{
    pub fn new(shared: SharedBridge<B>) -> Self {
        Self {
            shared,
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn shared(&self) -> &SharedBridge<B> {
        &self.shared
    }

    /// Whether an inference currently holds the slot
    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Run inference on an owned RGBA buffer and hand it back.
    ///
    /// Fails with [`BridgeError::Busy`] instead of waiting when another call
    /// holds the slot.
    pub async fn run(&self, mut pixels: Vec<u8>) -> Result<Vec<u8>> {
        let permit = self
            .slot
            .clone()
            .try_acquire_owned()
            .map_err(|_| BridgeError::Busy)?;
        let shared = self.shared.clone();

        debug!("Dispatching inference on {} bytes", pixels.len());
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            shared.run(&mut pixels).map(|()| pixels)
        })
        .await
        .map_err(|e| BridgeError::Worker(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::engine::backend::fake::{FakeBackend, FakeKernel};

    fn ready(kernel: FakeKernel) -> SharedBridge<FakeBackend> {
        let mut bridge = InferenceBridge::new(FakeBackend::new(&["CPU"]).with_kernel(kernel));
        bridge.initialize(Path::new("m.xml")).unwrap();
        bridge.set_input_dimensions(2, 2).unwrap();
        bridge.select_device(0).unwrap();
        SharedBridge::new(bridge)
    }

    #[test]
    fn test_shared_run_and_reconfigure() {
        let shared = ready(FakeKernel::Invert);
        let mut pixels = vec![5u8; 16];
        shared.run(&mut pixels).unwrap();
        assert_eq!(&pixels[..4], &[250, 250, 250, 255]);

        shared.with(|bridge| bridge.set_input_dimensions(1, 1)).unwrap();
        assert!(!shared.lock().has_session());
    }

    #[tokio::test]
    async fn test_gate_runs_inference() {
        let gate = InferenceGate::new(ready(FakeKernel::Identity));
        let out = gate.run(vec![64u8; 16]).await.unwrap();

        assert!(out.chunks_exact(4).all(|px| px == [64, 64, 64, 255]));
        assert!(!gate.is_busy());
    }

    #[tokio::test]
    async fn test_gate_rejects_second_inflight_call() {
        let gate = InferenceGate::new(ready(FakeKernel::Delayed(Duration::from_millis(100))));

        let (first, second) = tokio::join!(gate.run(vec![1u8; 16]), gate.run(vec![2u8; 16]));
        let busy = [&first, &second]
            .iter()
            .filter(|r| matches!(r, Err(BridgeError::Busy)))
            .count();
        let ok = [&first, &second].iter().filter(|r| r.is_ok()).count();

        assert_eq!(busy, 1);
        assert_eq!(ok, 1);
        assert_eq!(gate.shared().lock().backend().log.lock().infer_calls, 1);
    }

    #[tokio::test]
    async fn test_gate_propagates_errors() {
        let gate = InferenceGate::new(ready(FakeKernel::Identity));
        let err = gate.run(vec![0u8; 3]).await.unwrap_err();

        assert!(matches!(err, BridgeError::BufferSizeMismatch { .. }));
        assert!(!gate.is_busy());
    }
}
