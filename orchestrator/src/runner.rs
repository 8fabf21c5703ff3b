//! Orchestration loop
//!
//! One [`Runner::run`] call owns one run from start to terminal status:
//!
//! 1. Create the run record (RUNNING) and assemble the initial transcript
//! 2. Ask the reasoning service for the next move, with the full catalog
//! 3. No tool calls: record a final step, COMPLETED
//! 4. Otherwise check each call with the guardrail before dispatching it.
//!    A veto opens an escalation and ends the run ESCALATED; the rest of
//!    the batch never runs. Tool errors become `{error}` results.
//! 5. Persist the whole step, feed results back, repeat
//! 6. Out of iterations: escalate with ITERATION_BUDGET_EXCEEDED
//!
//! Failures in context assembly, the reasoning call or run bookkeeping end
//! the run FAILED and are returned to the caller. Nothing is retried here.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use shared_types::{
    EscalationReason, NewEscalation, OrganizationPolicy, RunRecord, RunStatus, RunTermination,
    Step, TaskInput, ToolInvocation, WorkflowType,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::context::{resolve_workflow, ContextAssembler, ContextError};
use crate::guardrail::{
    budget_key, tool_call_key, EscalationService, EscalationTrigger, GuardrailDecision,
    GuardrailEngine, GuardrailError, RunContext,
};
use crate::reasoning::{
    ReasoningError, ReasoningRequest, SharedReasoningService, ToolCallRequest, ToolChoice,
    TranscriptMessage,
};
use crate::store::{SharedRunLog, StoreError};
use crate::tools::{ToolContext, ToolDispatcher, ToolName};

pub const DEFAULT_MAX_ITERATIONS: u32 = 15;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Hard ceiling on reasoning round trips per run
    pub max_iterations: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// What the caller gets back from a run that reached COMPLETED or ESCALATED
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub final_action: Option<String>,
    pub escalation_id: Option<String>,
    pub work_order_id: Option<String>,
    pub iterations: u32,
    pub total_tokens: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to record run start: {0}")]
    RunLog(#[from] StoreError),
    #[error("run {run_id} failed: {reason}")]
    Failed { run_id: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
enum LoopError {
    #[error("context assembly failed: {0}")]
    Context(#[from] ContextError),
    #[error("reasoning call failed: {0}")]
    Reasoning(#[from] ReasoningError),
    #[error("escalation failed: {0}")]
    Escalation(#[from] GuardrailError),
    #[error("work order lookup failed: {0}")]
    Lookup(StoreError),
    #[error("run log write failed: {0}")]
    RunLog(#[from] StoreError),
}

/// Shared collaborators; a [`Runner`] adds one organization's policy.
#[derive(Clone)]
pub struct RunnerParts {
    pub config: RunnerConfig,
    pub reasoner: SharedReasoningService,
    pub tools: Arc<ToolDispatcher>,
    pub escalations: Arc<EscalationService>,
    pub run_log: SharedRunLog,
    pub context: Arc<ContextAssembler>,
}

pub struct Runner {
    parts: RunnerParts,
    guardrail: GuardrailEngine,
}

/// Mutable state of one run
struct RunState {
    record: RunRecord,
    run_ctx: RunContext,
    work_order_id: Option<String>,
}

impl RunState {
    fn track_work_order(&mut self, input: &Value, output: &Value) {
        let touched = output
            .get("work_order_id")
            .and_then(Value::as_str)
            .or_else(|| input.get("work_order_id").and_then(Value::as_str));
        if let Some(id) = touched {
            self.work_order_id = Some(id.to_string());
        }
    }
}

fn call_id(call: &ToolCallRequest, iteration: u32, index: usize) -> String {
    if call.id.trim().is_empty() {
        format!("{iteration}-{index}")
    } else {
        call.id.clone()
    }
}

impl Runner {
    pub fn new(parts: RunnerParts, policy: OrganizationPolicy) -> Self {
        Self {
            parts,
            guardrail: GuardrailEngine::new(policy),
        }
    }

    pub fn policy(&self) -> &OrganizationPolicy {
        self.guardrail.policy()
    }

    pub async fn run(&self, task: TaskInput) -> Result<RunOutcome, RunnerError> {
        let workflow = resolve_workflow(&task);
        let record = RunRecord::start(&task, workflow);
        self.parts.run_log.create_run(&record).await?;

        let run_id = record.id.clone();
        info!(
            run_id = %run_id,
            org_id = %task.organization_id,
            workflow = workflow.as_str(),
            trigger = task.trigger.as_str(),
            model = %self.parts.reasoner.model_id(),
            "Starting run"
        );

        let mut state = RunState {
            run_ctx: RunContext {
                organization_id: task.organization_id.clone(),
                run_id: run_id.clone(),
                workflow_type: workflow,
                task_context: task.context.clone(),
            },
            work_order_id: task.context_str("work_order_id").map(str::to_string),
            record,
        };

        match self.drive(&task, workflow, &mut state).await {
            Ok(termination) => {
                let finished = self
                    .parts
                    .run_log
                    .finish_run(&run_id, &termination, Utc::now())
                    .await
                    .map_err(|e| RunnerError::Failed {
                        run_id: run_id.clone(),
                        reason: format!("could not record terminal status: {e}"),
                    })?;
                info!(
                    run_id = %run_id,
                    status = finished.status.as_str(),
                    iterations = finished.steps.len(),
                    tokens = finished.total_tokens,
                    "Run finished"
                );
                Ok(RunOutcome {
                    run_id,
                    status: finished.status,
                    final_action: finished.final_action,
                    escalation_id: finished.escalation_id,
                    work_order_id: state.work_order_id,
                    iterations: finished.steps.len() as u32,
                    total_tokens: finished.total_tokens,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                error!(run_id = %run_id, error = %reason, "Run failed");
                let failed = RunTermination::Failed {
                    error: reason.clone(),
                };
                if let Err(log_err) = self
                    .parts
                    .run_log
                    .finish_run(&run_id, &failed, Utc::now())
                    .await
                {
                    error!(run_id = %run_id, error = %log_err, "Could not mark run failed");
                }
                Err(RunnerError::Failed { run_id, reason })
            }
        }
    }

    async fn drive(
        &self,
        task: &TaskInput,
        workflow: WorkflowType,
        state: &mut RunState,
    ) -> Result<RunTermination, LoopError> {
        let mut transcript = self
            .parts
            .context
            .initial_transcript(task, workflow)
            .await?;
        let catalog = self.parts.tools.catalog();
        let max_iterations = self.parts.config.max_iterations;

        for iteration in 1..=max_iterations {
            let request = ReasoningRequest {
                messages: transcript.clone(),
                tools: catalog.clone(),
                tool_choice: ToolChoice::Auto,
            };
            let response = self.parts.reasoner.complete(&request).await?;
            state.record.total_tokens = state
                .record
                .total_tokens
                .saturating_add(response.usage.total());
            let reasoning = response.text_or_empty().to_string();

            debug!(
                run_id = %state.record.id,
                iteration,
                tool_calls = response.tool_calls.len(),
                tokens = response.usage.total(),
                "Reasoning step"
            );

            if response.is_final() {
                state.record.steps.push(Step {
                    iteration,
                    reasoning: reasoning.clone(),
                    invocations: Vec::new(),
                    is_final: true,
                });
                self.save_progress(state).await?;
                return Ok(RunTermination::Completed {
                    final_action: reasoning,
                });
            }

            transcript.push(TranscriptMessage::assistant(
                reasoning.clone(),
                response.tool_calls.clone(),
            ));

            let mut invocations: Vec<ToolInvocation> = Vec::new();
            for (index, call) in response.tool_calls.iter().enumerate() {
                let call_id = call_id(call, iteration, index);

                let Some(tool) = ToolName::from_name(&call.name) else {
                    warn!(run_id = %state.record.id, tool = %call.name, "Unknown tool requested");
                    let output = json!({"error": format!("unknown tool '{}'", call.name)});
                    transcript.push(TranscriptMessage::tool_result(&call_id, &output));
                    invocations.push(ToolInvocation {
                        call_id,
                        tool: call.name.clone(),
                        input: call.arguments.clone(),
                        output,
                    });
                    continue;
                };

                let target = match tool {
                    ToolName::DispatchVendor => self
                        .parts
                        .tools
                        .target_work_order(&state.run_ctx.organization_id, &call.arguments)
                        .await
                        .map_err(LoopError::Lookup)?,
                    _ => None,
                };
                if let GuardrailDecision::Escalate(trigger) =
                    self.guardrail
                        .check(tool, &call.arguments, &state.run_ctx, target.as_ref())
                {
                    let escalation_id = self
                        .open_tool_escalation(
                            state,
                            tool,
                            call,
                            &call_id,
                            iteration,
                            &invocations,
                            trigger.clone(),
                        )
                        .await?;
                    invocations.push(ToolInvocation {
                        call_id,
                        tool: tool.to_string(),
                        input: call.arguments.clone(),
                        output: json!({
                            "escalated": true,
                            "escalation_id": escalation_id,
                            "reason": trigger.reason.as_str(),
                        }),
                    });
                    if let Some(id) = trigger.work_order_id.as_ref() {
                        state.work_order_id = Some(id.clone());
                    }
                    state.record.steps.push(Step {
                        iteration,
                        reasoning,
                        invocations,
                        is_final: false,
                    });
                    self.save_progress(state).await?;
                    return Ok(RunTermination::Escalated {
                        escalation_id,
                        final_action: Some(trigger.description),
                    });
                }

                let ctx = ToolContext::new(
                    state.run_ctx.organization_id.clone(),
                    Some(state.record.id.clone()),
                );
                let output = match self
                    .parts
                    .tools
                    .execute(tool, call.arguments.clone(), &ctx)
                    .await
                {
                    Ok(output) => output,
                    Err(e) => {
                        warn!(run_id = %state.record.id, tool = %tool, error = %e, "Tool execution failed");
                        json!({"error": e.to_string()})
                    }
                };
                state.track_work_order(&call.arguments, &output);
                transcript.push(TranscriptMessage::tool_result(&call_id, &output));
                invocations.push(ToolInvocation {
                    call_id,
                    tool: tool.to_string(),
                    input: call.arguments.clone(),
                    output,
                });
            }

            state.record.steps.push(Step {
                iteration,
                reasoning,
                invocations,
                is_final: false,
            });
            self.save_progress(state).await?;
        }

        let description = format!(
            "Run exceeded its iteration budget of {max_iterations} without completing"
        );
        warn!(run_id = %state.record.id, max_iterations, "Iteration budget exhausted");
        let outcome = self
            .parts
            .escalations
            .open(
                NewEscalation {
                    idempotency_key: budget_key(&state.record.id),
                    organization_id: state.run_ctx.organization_id.clone(),
                    run_id: Some(state.record.id.clone()),
                    work_order_id: state.work_order_id.clone(),
                    reason: EscalationReason::IterationBudgetExceeded,
                    description: description.clone(),
                    context: json!({
                        "workflow": state.run_ctx.workflow_type.as_str(),
                        "task_context": state.run_ctx.task_context,
                        "iterations": max_iterations,
                        "last_step": state.record.steps.last(),
                    }),
                    suggested_action: Some(
                        "Review the run history and finish the task manually".to_string(),
                    ),
                    priority: EscalationReason::IterationBudgetExceeded.default_priority(),
                },
                Utc::now(),
            )
            .await?;
        Ok(RunTermination::Escalated {
            escalation_id: outcome.escalation.id,
            final_action: Some(description),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_tool_escalation(
        &self,
        state: &RunState,
        tool: ToolName,
        call: &ToolCallRequest,
        call_id: &str,
        iteration: u32,
        executed: &[ToolInvocation],
        trigger: EscalationTrigger,
    ) -> Result<String, LoopError> {
        info!(
            run_id = %state.record.id,
            tool = %tool,
            reason = trigger.reason.as_str(),
            "Guardrail vetoed tool call"
        );
        let outcome = self
            .parts
            .escalations
            .open(
                NewEscalation {
                    idempotency_key: tool_call_key(&state.record.id, trigger.reason, call_id),
                    organization_id: state.run_ctx.organization_id.clone(),
                    run_id: Some(state.record.id.clone()),
                    work_order_id: trigger
                        .work_order_id
                        .clone()
                        .or_else(|| state.work_order_id.clone()),
                    reason: trigger.reason,
                    description: trigger.description,
                    context: json!({
                        "workflow": state.run_ctx.workflow_type.as_str(),
                        "iteration": iteration,
                        "pending_call": {
                            "call_id": call_id,
                            "tool": tool.as_ref(),
                            "input": call.arguments,
                        },
                        "executed_this_iteration": executed,
                        "task_context": state.run_ctx.task_context,
                        "previous_steps": state.record.steps,
                    }),
                    suggested_action: trigger.suggested_action,
                    priority: trigger.priority,
                },
                Utc::now(),
            )
            .await?;
        Ok(outcome.escalation.id)
    }

    async fn save_progress(&self, state: &RunState) -> Result<(), LoopError> {
        self.parts
            .run_log
            .record_progress(
                &state.record.id,
                &state.record.steps,
                state.record.total_tokens,
            )
            .await?;
        Ok(())
    }
}
