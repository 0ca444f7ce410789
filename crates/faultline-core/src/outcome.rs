//! Exactly-once outcome reporting for a single call.
//!
//! Every terminal path of a call (short circuit, response, close) reports
//! through the same recorder. The first report resolves the outcome; any
//! later report for the same call is suppressed.

use std::collections::HashMap;

use crate::data_model::InvocationOutcome;
use crate::decision::FaultDecision;

pub struct OutcomeRecorder {
    decision: Box<dyn FaultDecision>,
    outcome: Option<InvocationOutcome>,
}

impl OutcomeRecorder {
    pub fn new(decision: Box<dyn FaultDecision>) -> Self {
        Self {
            decision,
            outcome: None,
        }
    }

    pub fn decision(&self) -> &dyn FaultDecision {
        self.decision.as_ref()
    }

    pub fn decision_mut(&mut self) -> &mut dyn FaultDecision {
        self.decision.as_mut()
    }

    pub fn outcome(&self) -> Option<InvocationOutcome> {
        self.outcome
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some()
    }

    /// Reports a successful completion. Returns `false` if the call was
    /// already resolved and nothing was sent.
    pub fn report_success(&mut self, type_name: &str) -> bool {
        if !self.resolve(InvocationOutcome::ForwardedSuccess) {
            return false;
        }
        if let Err(err) = self
            .decision
            .after_invocation_complete(type_name, &HashMap::new())
        {
            tracing::warn!(error = %err, type_name, "oracle rejected completion report");
        }
        true
    }

    /// Reports a failed completion. Returns `false` if the call was already
    /// resolved and nothing was sent.
    pub fn report_exception(
        &mut self,
        outcome: InvocationOutcome,
        name: &str,
        cause: Option<&str>,
        metadata: HashMap<String, String>,
    ) -> bool {
        debug_assert!(outcome.is_failure());
        if !self.resolve(outcome) {
            return false;
        }
        if let Err(err) = self
            .decision
            .after_invocation_with_exception(name, cause, &metadata)
        {
            tracing::warn!(error = %err, name, "oracle rejected exception report");
        }
        true
    }

    fn resolve(&mut self, outcome: InvocationOutcome) -> bool {
        match self.outcome {
            Some(previous) => {
                tracing::debug!(%previous, suppressed = %outcome, "outcome already reported");
                false
            }
            None => {
                tracing::debug!(%outcome, "resolving invocation outcome");
                self.outcome = Some(outcome);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_model::{FailureMetadata, ForcedException};
    use crate::error::FaultError;
    use crate::execution_index::ExecutionIndex;
    use crate::vector_clock::VectorClock;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct CountingDecision {
        reports: Arc<Mutex<Vec<String>>>,
        fail_reports: bool,
    }

    impl FaultDecision for CountingDecision {
        fn prepare_for_invocation(&mut self) -> Result<(), FaultError> {
            Ok(())
        }
        fn before_invocation(&mut self) -> Result<(), FaultError> {
            Ok(())
        }
        fn outgoing_request_id(&self) -> Option<String> {
            None
        }
        fn generated_id(&self) -> Option<u64> {
            None
        }
        fn vector_clock(&self) -> VectorClock {
            VectorClock::new()
        }
        fn origin_vector_clock(&self) -> VectorClock {
            VectorClock::new()
        }
        fn execution_index(&self) -> ExecutionIndex {
            ExecutionIndex::root()
        }
        fn forced_exception(&self) -> Option<&ForcedException> {
            None
        }
        fn failure_metadata(&self) -> Option<&FailureMetadata> {
            None
        }
        fn should_abort(&self) -> bool {
            true
        }
        fn after_invocation_complete(
            &mut self,
            type_name: &str,
            _properties: &HashMap<String, String>,
        ) -> Result<(), FaultError> {
            self.reports.lock().unwrap().push(format!("ok:{}", type_name));
            if self.fail_reports {
                return Err(FaultError::Oracle("down".into()));
            }
            Ok(())
        }
        fn after_invocation_with_exception(
            &mut self,
            name: &str,
            _cause: Option<&str>,
            metadata: &HashMap<String, String>,
        ) -> Result<(), FaultError> {
            let code = metadata.get("code").cloned().unwrap_or_default();
            self.reports.lock().unwrap().push(format!("err:{}:{}", name, code));
            Ok(())
        }
    }

    #[test]
    fn test_first_report_wins() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let mut recorder = OutcomeRecorder::new(Box::new(CountingDecision {
            reports: reports.clone(),
            ..Default::default()
        }));

        assert!(recorder.report_success("HelloReply"));
        let metadata = HashMap::from([("code".to_string(), "UNAVAILABLE".to_string())]);
        assert!(!recorder.report_exception(
            InvocationOutcome::ForwardedException,
            "StatusError",
            None,
            metadata,
        ));

        assert_eq!(recorder.outcome(), Some(InvocationOutcome::ForwardedSuccess));
        assert_eq!(*reports.lock().unwrap(), vec!["ok:HelloReply".to_string()]);
    }

    #[test]
    fn test_failed_report_still_resolves() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let mut recorder = OutcomeRecorder::new(Box::new(CountingDecision {
            reports: reports.clone(),
            fail_reports: true,
        }));

        assert!(recorder.report_success("HelloReply"));
        assert!(recorder.is_resolved());
        assert!(!recorder.report_success("HelloReply"));
        assert_eq!(reports.lock().unwrap().len(), 1);
    }
}
