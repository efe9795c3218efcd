//! In-memory sources and sinks for driving the pipeline in tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::Error;
use crate::message::{InboundMessage, ReadAck, Receipt};
use crate::sinker::{BlobStore, Publisher, RowStore};
use crate::source::MessageSource;
use crate::typ::PipelineTypeConfig;

#[derive(Clone)]
pub(crate) struct TestPipeline {}
impl PipelineTypeConfig for TestPipeline {
    type RowStore = InMemoryRowStore;
    type BlobStore = InMemoryBlobStore;
    type Publisher = InMemoryPublisher;
}

/// Controller for injecting failures, panics and latency into a test double.
#[derive(Debug, Default)]
pub(crate) struct ErrorInjector {
    /// Fail the next N calls.
    fail_next_calls: AtomicUsize,
    /// Panic on the next N calls.
    panic_next_calls: AtomicUsize,
    /// Artificial latency in milliseconds.
    latency_ms: AtomicU64,
}

impl ErrorInjector {
    pub(crate) fn fail_calls(&self, count: usize) {
        self.fail_next_calls.store(count, Ordering::Relaxed);
    }

    pub(crate) fn panic_calls(&self, count: usize) {
        self.panic_next_calls.store(count, Ordering::Relaxed);
    }

    pub(crate) fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Applies the configured latency and panics, returns whether this call has to fail.
    async fn inject(&self) -> bool {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if Self::decrement_counter(&self.panic_next_calls) {
            panic!("injected panic");
        }
        Self::decrement_counter(&self.fail_next_calls)
    }

    fn decrement_counter(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                if c > 0 { Some(c - 1) } else { None }
            })
            .is_ok()
    }
}

/// Tracks how many calls are running at the same time.
#[derive(Debug, Default)]
struct Concurrency {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Concurrency {
    fn enter(&self) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RowStoreState {
    rows: Mutex<Vec<(String, Value)>>,
    reject_next_rows: AtomicUsize,
    calls: AtomicUsize,
    concurrency: Concurrency,
    injector: ErrorInjector,
}

/// Row store keeping accepted rows in insertion order. Rows with an insert id that was already
/// accepted are dropped, as the streaming insert does.
#[derive(Clone, Default)]
pub(crate) struct InMemoryRowStore {
    state: Arc<RowStoreState>,
}

impl InMemoryRowStore {
    pub(crate) fn error_injector(&self) -> &ErrorInjector {
        &self.state.injector
    }

    /// Reports a per-row error for the next N rows instead of storing them.
    pub(crate) fn reject_next_rows(&self, count: usize) {
        self.state.reject_next_rows.store(count, Ordering::Relaxed);
    }

    pub(crate) fn rows(&self) -> Vec<(String, Value)> {
        self.state.rows.lock().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.state.calls.load(Ordering::Relaxed)
    }

    pub(crate) fn max_concurrent_calls(&self) -> usize {
        self.state.concurrency.max_active.load(Ordering::SeqCst)
    }
}

impl RowStore for InMemoryRowStore {
    async fn insert_row(&self, insert_id: &str, row: Value) -> crate::Result<Vec<String>> {
        self.state.calls.fetch_add(1, Ordering::Relaxed);
        self.state.concurrency.enter();
        let fail = self.state.injector.inject().await;
        self.state.concurrency.exit();

        if fail {
            return Err(Error::RowStore("injected transport error".to_string()));
        }
        if ErrorInjector::decrement_counter(&self.state.reject_next_rows) {
            return Ok(vec![format!("row 0: rejected {insert_id} (invalid)")]);
        }

        let mut rows = self.state.rows.lock();
        if !rows.iter().any(|(id, _)| id == insert_id) {
            rows.push((insert_id.to_string(), row));
        }
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct BlobStoreState {
    objects: Mutex<BTreeMap<String, Bytes>>,
    calls: AtomicUsize,
    injector: ErrorInjector,
}

#[derive(Clone, Default)]
pub(crate) struct InMemoryBlobStore {
    state: Arc<BlobStoreState>,
}

impl InMemoryBlobStore {
    pub(crate) fn error_injector(&self) -> &ErrorInjector {
        &self.state.injector
    }

    pub(crate) fn get(&self, key: &str) -> Option<Bytes> {
        self.state.objects.lock().get(key).cloned()
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.state.objects.lock().keys().cloned().collect()
    }

    pub(crate) fn calls(&self) -> usize {
        self.state.calls.load(Ordering::Relaxed)
    }
}

impl BlobStore for InMemoryBlobStore {
    async fn put_object(&self, key: &str, content: Bytes) -> crate::Result<()> {
        self.state.calls.fetch_add(1, Ordering::Relaxed);
        if self.state.injector.inject().await {
            return Err(Error::BlobStore("injected transport error".to_string()));
        }
        self.state.objects.lock().insert(key.to_string(), content);
        Ok(())
    }
}

#[derive(Default)]
struct PublisherState {
    published: Mutex<Vec<Bytes>>,
    calls: AtomicUsize,
    injector: ErrorInjector,
}

#[derive(Clone, Default)]
pub(crate) struct InMemoryPublisher {
    state: Arc<PublisherState>,
}

impl InMemoryPublisher {
    pub(crate) fn error_injector(&self) -> &ErrorInjector {
        &self.state.injector
    }

    pub(crate) fn published(&self) -> Vec<Bytes> {
        self.state.published.lock().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.state.calls.load(Ordering::Relaxed)
    }
}

impl Publisher for InMemoryPublisher {
    async fn publish(&self, payload: Bytes) -> crate::Result<String> {
        let call = self.state.calls.fetch_add(1, Ordering::Relaxed);
        if self.state.injector.inject().await {
            return Err(Error::Publish("injected transport error".to_string()));
        }
        self.state.published.lock().push(payload);
        Ok(format!("published-{call}"))
    }
}

/// Source handing out a fixed list of deliveries with channel receipts.
pub(crate) struct InMemorySource {
    pending: VecDeque<crate::Result<InboundMessage>>,
    /// When set, an empty source waits for close instead of ending the stream.
    hold_open: bool,
    closed: Arc<AtomicBool>,
}

impl InMemorySource {
    pub(crate) fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            hold_open: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Queues a delivery and returns the receiver its settlement arrives on.
    pub(crate) fn push(&mut self, id: &str, payload: &[u8]) -> oneshot::Receiver<ReadAck> {
        let (tx, rx) = oneshot::channel();
        self.pending.push_back(Ok(InboundMessage {
            id: id.to_string(),
            payload: Bytes::copy_from_slice(payload),
            attributes: HashMap::new(),
            delivery_attempt: Some(1),
            receipt: Receipt::Channel(tx),
        }));
        rx
    }

    /// Queues a receive failure.
    pub(crate) fn push_error(&mut self, reason: &str) {
        self.pending.push_back(Err(Error::Source(reason.to_string())));
    }

    pub(crate) fn closed(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl MessageSource for InMemorySource {
    async fn recv(&mut self) -> Option<crate::Result<InboundMessage>> {
        if let Some(next) = self.pending.pop_front() {
            return Some(next);
        }
        if self.hold_open && !self.closed.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        None
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
