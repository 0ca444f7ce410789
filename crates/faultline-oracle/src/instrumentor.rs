//! Client instrumentor: the default fault decision.
//!
//! Keeps the causal bookkeeping for one outbound call (vector clock, origin
//! clock, request id, execution index) and, when oracle communication is
//! enabled, asks the backend what to do with the call and reports how it
//! ended.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use faultline_core::{
    Callsite, ContextKey, ContextStorage, DecisionFactory, DecisionSeed, ExecutionIndex,
    FailureMetadata, FaultDecision, FaultError, ForcedException, VectorClock,
};
use parking_lot::Mutex;

use crate::backend::{Completion, CompletionReport, InvocationRecord, OracleBackend, OracleReply};

/// Request ids whose counts an [`OccurrenceCounter`] keeps by default.
pub const DEFAULT_TRACKED_REQUESTS: usize = 4096;

#[derive(Debug, Default)]
struct Counts {
    /// `(parent index, signature)` counts per request id.
    by_request: HashMap<String, HashMap<(String, String), u32>>,
    /// Tracked request ids, oldest first.
    order: VecDeque<String>,
}

/// Counts invocations of each callsite under the same parent position.
///
/// Counts are kept for at most `capacity` request ids; when a new one
/// arrives past that, the oldest request id is forgotten.
#[derive(Debug)]
pub struct OccurrenceCounter {
    capacity: usize,
    counts: Mutex<Counts>,
}

impl Default for OccurrenceCounter {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TRACKED_REQUESTS)
    }
}

impl OccurrenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            counts: Mutex::new(Counts::default()),
        }
    }

    /// 1-based occurrence of `signature` below `parent` within `request_id`.
    pub fn next(&self, request_id: &str, parent: &ExecutionIndex, signature: &str) -> u32 {
        let mut guard = self.counts.lock();
        let counts = &mut *guard;
        if !counts.by_request.contains_key(request_id) {
            while counts.order.len() >= self.capacity {
                let Some(oldest) = counts.order.pop_front() else {
                    break;
                };
                counts.by_request.remove(&oldest);
                tracing::debug!(request_id = %oldest, "forgetting occurrence counts");
            }
            counts.order.push_back(request_id.to_string());
        }
        let count = counts
            .by_request
            .entry(request_id.to_string())
            .or_default()
            .entry((parent.encode(), signature.to_string()))
            .or_insert(0);
        *count += 1;
        *count
    }

    /// Number of request ids with retained counts.
    pub fn tracked_requests(&self) -> usize {
        self.counts.lock().order.len()
    }
}

/// Causal identity computed by `prepare_for_invocation`.
#[derive(Debug, Clone)]
struct Prepared {
    request_id: Option<String>,
    signature: String,
    vector_clock: VectorClock,
    origin_vector_clock: VectorClock,
    execution_index: ExecutionIndex,
}

pub struct ClientInstrumentor {
    service_name: String,
    callsite: Callsite,
    storage: ContextStorage,
    /// `None` when oracle communication is disabled.
    backend: Option<Arc<dyn OracleBackend>>,
    occurrences: Arc<OccurrenceCounter>,
    prepared: Option<Prepared>,
    reply: OracleReply,
}

impl ClientInstrumentor {
    pub fn new(
        seed: DecisionSeed,
        backend: Option<Arc<dyn OracleBackend>>,
        occurrences: Arc<OccurrenceCounter>,
    ) -> Self {
        let backend = backend.filter(|_| seed.communicate_with_oracle);
        Self {
            service_name: seed.service_name,
            callsite: seed.callsite,
            storage: seed.storage,
            backend,
            occurrences,
            prepared: None,
            reply: OracleReply::proceed(),
        }
    }

    pub fn callsite(&self) -> &Callsite {
        &self.callsite
    }

    /// Context as updated by this call.
    pub fn storage(&self) -> &ContextStorage {
        &self.storage
    }

    pub fn reply(&self) -> &OracleReply {
        &self.reply
    }

    pub fn communicates_with_oracle(&self) -> bool {
        self.backend.is_some()
    }

    fn report(&self, completion: Completion) -> Result<(), FaultError> {
        let (Some(backend), Some(prepared)) = (&self.backend, &self.prepared) else {
            return Ok(());
        };
        let report = CompletionReport {
            request_id: prepared.request_id.clone(),
            signature: prepared.signature.clone(),
            execution_index: prepared.execution_index.clone(),
            generated_id: self.reply.generated_id(),
            completion,
            timestamp: Utc::now(),
        };
        backend.after_invocation(&report)
    }
}

impl FaultDecision for ClientInstrumentor {
    fn prepare_for_invocation(&mut self) -> Result<(), FaultError> {
        let mut vector_clock = self.storage.vector_clock();
        vector_clock.increment(&self.service_name);

        let origin_vector_clock = match self.storage.snapshot().get(ContextKey::OriginVectorClock) {
            Some(_) => self.storage.origin_vector_clock(),
            None => vector_clock.clone(),
        };

        let signature = self.callsite.signature();
        let parent = self.storage.execution_index();

        // An inherited request id may be shared with sibling calls. A minted
        // one, or none at all, starts a chain nothing else can join.
        let (request_id, occurrence) = match self.storage.request_id() {
            Some(inherited) => {
                let occurrence = self.occurrences.next(inherited, &parent, &signature);
                (Some(inherited.to_string()), occurrence)
            }
            None if self.backend.is_some() => (Some(uuid::Uuid::new_v4().to_string()), 1),
            None => (None, 1),
        };
        let execution_index = parent.push(signature.as_str(), occurrence);

        if let Some(request_id) = &request_id {
            self.storage.set_request_id(request_id);
        }
        self.storage.set_vector_clock(&vector_clock);
        self.storage.set_origin_vector_clock(&origin_vector_clock);
        self.storage.set_execution_index(&execution_index);

        tracing::debug!(
            request_id = request_id.as_deref().unwrap_or(""),
            vector_clock = %vector_clock,
            execution_index = %execution_index,
            "prepared invocation"
        );

        self.prepared = Some(Prepared {
            request_id,
            signature,
            vector_clock,
            origin_vector_clock,
            execution_index,
        });
        Ok(())
    }

    fn before_invocation(&mut self) -> Result<(), FaultError> {
        let prepared = self.prepared.as_ref().ok_or_else(|| {
            FaultError::InvalidState("before_invocation called before prepare_for_invocation".into())
        })?;
        let Some(backend) = &self.backend else {
            tracing::debug!(
                method = self.callsite.full_method_name(),
                "oracle communication disabled, proceeding"
            );
            return Ok(());
        };

        let record = InvocationRecord {
            request_id: prepared.request_id.clone(),
            service_name: self.service_name.clone(),
            callsite: self.callsite.clone(),
            signature: prepared.signature.clone(),
            vector_clock: prepared.vector_clock.clone(),
            origin_vector_clock: prepared.origin_vector_clock.clone(),
            execution_index: prepared.execution_index.clone(),
            timestamp: Utc::now(),
        };
        self.reply = backend.before_invocation(&record)?;
        tracing::debug!(
            generated_id = ?self.reply.generated_id(),
            has_fault = self.reply.has_fault(),
            should_abort = self.reply.should_abort(),
            "oracle replied"
        );
        Ok(())
    }

    fn outgoing_request_id(&self) -> Option<String> {
        match &self.prepared {
            Some(prepared) => prepared.request_id.clone(),
            None => self.storage.request_id().map(str::to_string),
        }
    }

    fn generated_id(&self) -> Option<u64> {
        self.reply.generated_id()
    }

    fn vector_clock(&self) -> VectorClock {
        match &self.prepared {
            Some(prepared) => prepared.vector_clock.clone(),
            None => self.storage.vector_clock(),
        }
    }

    fn origin_vector_clock(&self) -> VectorClock {
        match &self.prepared {
            Some(prepared) => prepared.origin_vector_clock.clone(),
            None => self.storage.origin_vector_clock(),
        }
    }

    fn execution_index(&self) -> ExecutionIndex {
        match &self.prepared {
            Some(prepared) => prepared.execution_index.clone(),
            None => self.storage.execution_index(),
        }
    }

    fn forced_exception(&self) -> Option<&ForcedException> {
        self.reply.forced_exception()
    }

    fn failure_metadata(&self) -> Option<&FailureMetadata> {
        self.reply.failure_metadata()
    }

    fn should_abort(&self) -> bool {
        self.reply.should_abort()
    }

    fn after_invocation_complete(
        &mut self,
        type_name: &str,
        properties: &HashMap<String, String>,
    ) -> Result<(), FaultError> {
        self.report(Completion::Success {
            type_name: type_name.to_string(),
            properties: properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        })
    }

    fn after_invocation_with_exception(
        &mut self,
        name: &str,
        cause: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<(), FaultError> {
        self.report(Completion::Exception {
            name: name.to_string(),
            cause: cause.map(str::to_string),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }
}

/// Builds a [`ClientInstrumentor`] per call, sharing one backend and one set
/// of occurrence counters.
#[derive(Clone)]
pub struct InstrumentorFactory {
    backend: Arc<dyn OracleBackend>,
    occurrences: Arc<OccurrenceCounter>,
}

impl InstrumentorFactory {
    pub fn new(backend: Arc<dyn OracleBackend>) -> Self {
        Self {
            backend,
            occurrences: Arc::new(OccurrenceCounter::new()),
        }
    }
}

impl DecisionFactory for InstrumentorFactory {
    fn create(&self, seed: DecisionSeed) -> Box<dyn FaultDecision> {
        Box::new(ClientInstrumentor::new(
            seed,
            Some(self.backend.clone()),
            self.occurrences.clone(),
        ))
    }
}
