//! In-memory oracle that answers from a fault plan and records everything.
use std::collections::HashMap;

use faultline_core::FaultError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::{CompletionReport, InvocationRecord, OracleBackend, OracleReply};
use crate::plan::FaultPlan;

/// One invocation as seen by the oracle, with the reply it got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedInvocation {
    pub generated_id: u64,
    /// 1-based count of this method among all invocations seen.
    pub occurrence: u32,
    /// Index of the plan rule that matched.
    pub rule: Option<usize>,
    pub record: InvocationRecord,
    pub reply: OracleReply,
}

/// Everything the oracle saw, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleLog {
    pub invocations: Vec<LoggedInvocation>,
    pub completions: Vec<CompletionReport>,
}

impl OracleLog {
    /// Invocations that were answered with a fault.
    pub fn injected(&self) -> impl Iterator<Item = &LoggedInvocation> {
        self.invocations.iter().filter(|inv| inv.reply.has_fault())
    }

    pub fn completion_for(&self, generated_id: u64) -> Option<&CompletionReport> {
        self.completions
            .iter()
            .find(|report| report.generated_id == Some(generated_id))
    }
}

#[derive(Debug, Default)]
struct OracleState {
    next_id: u64,
    method_counts: HashMap<String, u32>,
    log: OracleLog,
}

#[derive(Debug, Default)]
pub struct ScriptedOracle {
    plan: FaultPlan,
    state: Mutex<OracleState>,
}

impl ScriptedOracle {
    pub fn new(plan: FaultPlan) -> Self {
        Self {
            plan,
            state: Mutex::new(OracleState::default()),
        }
    }

    pub fn plan(&self) -> &FaultPlan {
        &self.plan
    }

    /// Copy of everything recorded so far.
    pub fn log(&self) -> OracleLog {
        self.state.lock().log.clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.state.lock().log.invocations.len()
    }

    pub fn completion_count(&self) -> usize {
        self.state.lock().log.completions.len()
    }
}

impl OracleBackend for ScriptedOracle {
    fn before_invocation(&self, record: &InvocationRecord) -> Result<OracleReply, FaultError> {
        let mut state = self.state.lock();

        let generated_id = state.next_id;
        state.next_id += 1;

        let count = state
            .method_counts
            .entry(record.callsite.full_method_name().to_string())
            .or_insert(0);
        *count += 1;
        let occurrence = *count;

        let matched = self.plan.find(record, occurrence);
        let reply = match matched {
            Some((_, rule)) => rule.reply(),
            None => OracleReply::proceed(),
        }
        .with_generated_id(generated_id);
        let matched = matched.map(|(index, _)| index);

        if reply.has_fault() {
            tracing::info!(
                method = record.callsite.full_method_name(),
                occurrence,
                generated_id,
                rule = ?matched,
                should_abort = reply.should_abort(),
                "injecting fault"
            );
        }

        state.log.invocations.push(LoggedInvocation {
            generated_id,
            occurrence,
            rule: matched,
            record: record.clone(),
            reply: reply.clone(),
        });
        Ok(reply)
    }

    fn after_invocation(&self, report: &CompletionReport) -> Result<(), FaultError> {
        let mut state = self.state.lock();
        if let Some(id) = report.generated_id {
            if state.log.completion_for(id).is_some() {
                return Err(FaultError::Oracle(format!(
                    "duplicate completion for invocation {}",
                    id
                )));
            }
        }
        state.log.completions.push(report.clone());
        Ok(())
    }
}
