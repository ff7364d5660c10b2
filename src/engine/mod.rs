//! Plan execution engine.
//!
//! The engine folds over the plan's steps strictly in order, carrying
//! two pieces of running state: the slot store and the one-shot
//! approval token. Every transition emits a lifecycle event and an
//! audit record; the first failure aborts all remaining steps with no
//! retry and propagates to the caller tagged with the failing step
//! index.

pub mod policy;
pub mod slots;
pub mod validate;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::approval::{ApprovalHandler, ApprovalRequest};
use crate::audit::{AuditRecord, AuditSink, NullAudit};
use crate::config::ExecutionPolicies;
use crate::error::ExecError;
use crate::events::{EventSink, ExecEvent};
use crate::plan::{Language, Plan, PlanStep, RiskLevel};
use crate::sandbox::NodeSandbox;
use crate::tools::{MessageSink, Tool, ToolContext, ToolRegistry};

use self::policy::{ApprovalToken, GateDecision, RiskGate};
use self::slots::{resolve_args, SlotStore};

pub use validate::validate_plan;

/// Character budget for code previews shown in approval prompts.
const CODE_PREVIEW_CHARS: usize = 400;

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub steps_run: usize,
    pub tools_invoked: usize,
    pub code_steps: usize,
    pub duration: Duration,
}

/// Executes plans against a host-supplied tool registry, policy set
/// and approval collaborator.
///
/// The runner owns no global state: slots and the approval token live
/// on the stack of each [`run`](PlanRunner::run) call, so a runner can
/// execute any number of plans sequentially.
pub struct PlanRunner {
    registry: Arc<ToolRegistry>,
    policies: ExecutionPolicies,
    approval: Arc<dyn ApprovalHandler>,
    audit: Arc<dyn AuditSink>,
    events: EventSink,
    messages: MessageSink,
    cwd: PathBuf,
    env: HashMap<String, String>,
}

impl PlanRunner {
    pub fn new(
        registry: Arc<ToolRegistry>,
        policies: ExecutionPolicies,
        approval: Arc<dyn ApprovalHandler>,
    ) -> Self {
        Self {
            registry,
            policies,
            approval,
            audit: Arc::new(NullAudit),
            events: EventSink::disabled(),
            messages: MessageSink::disabled(),
            cwd: PathBuf::from("."),
            env: HashMap::new(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_messages(mut self, messages: MessageSink) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Static pre-flight check of `plan` against this runner's
    /// registry and policies. See [`validate_plan`].
    pub fn validate(&self, plan: &Plan) -> Result<(), crate::error::ValidationError> {
        validate_plan(plan, &self.registry, &self.policies)
    }

    /// Executes the plan's steps in order. Aborts at the first failing
    /// step; the returned error carries that step's index.
    ///
    /// Validation is a separate, prior concern: hosts that want plans
    /// rejected before anything runs call [`validate`](Self::validate)
    /// first. At runtime the engine is slightly more permissive than
    /// the validator — a gated step with no banked token asks the
    /// approval collaborator inline instead of failing outright.
    pub async fn run(&self, plan: &Plan) -> Result<RunSummary, ExecError> {
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        info!(
            "Plan run {run_id} started: '{}' ({} steps)",
            plan.goal,
            plan.steps.len()
        );
        self.messages
            .send(format!("Plan rationale: {}", plan.rationale));
        self.events.emit(ExecEvent::PlanStarted {
            run_id: run_id.clone(),
            goal: plan.goal.clone(),
            steps: plan.steps.len(),
        });
        self.audit
            .record(AuditRecord::PlanStarted {
                run_id: run_id.clone(),
                goal: plan.goal.clone(),
                steps: plan.steps.len(),
            })
            .await;

        let mut slots = SlotStore::new();
        let mut token = ApprovalToken::Absent;
        let mut counters = RunCounters::default();

        for (index, step) in plan.steps.iter().enumerate() {
            self.events.emit(ExecEvent::StepStarted {
                index,
                kind: step.kind_name(),
            });
            debug!("Step {index} ({}) running", step.kind_name());
            let step_started = Instant::now();

            match self
                .run_step(&run_id, step, &mut slots, &mut token, &mut counters)
                .await
            {
                Ok(outcome) => {
                    if let (Some(name), Some(value)) = (step.save_as(), outcome.value) {
                        slots.insert(name, value);
                    }
                    self.events.emit(ExecEvent::StepCompleted {
                        index,
                        summary: outcome.summary,
                    });
                    self.audit
                        .record(AuditRecord::StepFinished {
                            run_id: run_id.clone(),
                            index,
                            kind: step.kind_name(),
                            duration_ms: step_started.elapsed().as_millis() as u64,
                            token_estimate: step.token_estimate(),
                        })
                        .await;
                }
                Err(err) => {
                    error!("Step {index} ({}) failed: {err}", step.kind_name());
                    self.events.emit(ExecEvent::StepFailed {
                        index,
                        error: err.to_string(),
                    });
                    self.audit
                        .record(AuditRecord::StepFailed {
                            run_id: run_id.clone(),
                            index,
                            error: err.to_string(),
                        })
                        .await;
                    return Err(ExecError::Step {
                        index,
                        source: Box::new(err),
                    });
                }
            }
        }

        let summary = RunSummary {
            run_id: run_id.clone(),
            steps_run: plan.steps.len(),
            tools_invoked: counters.tools_invoked,
            code_steps: counters.code_steps,
            duration: started.elapsed(),
        };
        info!(
            "Plan run {run_id} completed: {} steps, {} tool calls, {} code runs in {}ms",
            summary.steps_run,
            summary.tools_invoked,
            summary.code_steps,
            summary.duration.as_millis()
        );
        self.events.emit(ExecEvent::PlanCompleted {
            run_id: run_id.clone(),
            steps_run: summary.steps_run,
            duration_ms: summary.duration.as_millis() as u64,
        });
        self.audit
            .record(AuditRecord::PlanFinished {
                run_id,
                steps_run: summary.steps_run,
                tools_invoked: summary.tools_invoked,
                code_steps: summary.code_steps,
                duration_ms: summary.duration.as_millis() as u64,
            })
            .await;

        Ok(summary)
    }

    async fn run_step(
        &self,
        run_id: &str,
        step: &PlanStep,
        slots: &mut SlotStore,
        token: &mut ApprovalToken,
        counters: &mut RunCounters,
    ) -> Result<StepOutcome, ExecError> {
        match step {
            PlanStep::UseTool { tool, args, .. } => {
                self.run_use_tool(run_id, tool, args, slots, token, counters)
                    .await
            }
            PlanStep::ExecCode { language, code, .. } => {
                self.run_exec_code(run_id, *language, code, token, counters)
                    .await
            }
            PlanStep::AskApproval {
                reason,
                preview_slot,
                risk,
                ..
            } => {
                self.run_ask_approval(run_id, reason, preview_slot.as_deref(), *risk, slots, token)
                    .await
            }
            PlanStep::Summarize { inputs, .. } => self.run_summarize(inputs, slots, token),
        }
    }

    async fn run_use_tool(
        &self,
        run_id: &str,
        name: &str,
        args: &Value,
        slots: &SlotStore,
        token: &mut ApprovalToken,
        counters: &mut RunCounters,
    ) -> Result<StepOutcome, ExecError> {
        let resolved = resolve_args(args, slots)?;
        // the validator has already vetted the plan, but the registry
        // is host-supplied state: re-check rather than trust it
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ExecError::UnknownTool {
                name: name.to_string(),
            })?
            .clone();

        let gate = RiskGate::new(&self.policies);
        match gate.decide(Some(name), tool.risk(), *token) {
            GateDecision::Refuse => {
                return Err(ExecError::RiskDenied {
                    subject: format!("tool '{name}'"),
                    risk: tool.risk(),
                });
            }
            GateDecision::Proceed => {}
            GateDecision::ProceedConsuming => {
                token.take();
                debug!("Approval token consumed by tool '{name}'");
            }
            GateDecision::NeedApproval => {
                let preview = tool
                    .preview(&resolved)
                    .unwrap_or_else(|| render_value(&resolved));
                let request = ApprovalRequest {
                    reason: format!("Run tool '{name}' ({} risk)", tool.risk()),
                    preview: Some(preview),
                    risk: tool.risk(),
                    tool_name: Some(name.to_string()),
                };
                self.request_approval(run_id, &request).await?;
            }
        }

        counters.tools_invoked += 1;
        self.audit
            .record(AuditRecord::ToolInvoked {
                run_id: run_id.to_string(),
                tool: name.to_string(),
                risk: tool.risk(),
            })
            .await;

        let context = ToolContext {
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            messages: self.messages.clone(),
        };
        let value = tool
            .run(resolved, &context)
            .await
            .map_err(|source| ExecError::Tool {
                tool: name.to_string(),
                source,
            })?;

        Ok(StepOutcome {
            summary: format!("tool '{name}' completed"),
            value: Some(value),
        })
    }

    async fn run_exec_code(
        &self,
        run_id: &str,
        language: Language,
        code: &str,
        token: &mut ApprovalToken,
        counters: &mut RunCounters,
    ) -> Result<StepOutcome, ExecError> {
        if language != Language::Node {
            return Err(ExecError::UnsupportedLanguage {
                language: language.to_string(),
            });
        }

        let gate = RiskGate::new(&self.policies);
        match gate.decide(None, RiskLevel::Exec, *token) {
            GateDecision::Refuse => {
                return Err(ExecError::RiskDenied {
                    subject: "code execution".to_string(),
                    risk: RiskLevel::Exec,
                });
            }
            GateDecision::Proceed => {}
            GateDecision::ProceedConsuming => {
                token.take();
                debug!("Approval token consumed by code execution");
            }
            GateDecision::NeedApproval => {
                let request = ApprovalRequest {
                    reason: "Execute sandboxed code".to_string(),
                    preview: Some(truncate_preview(code)),
                    risk: RiskLevel::Exec,
                    tool_name: None,
                };
                self.request_approval(run_id, &request).await?;
            }
        }

        let sandbox = NodeSandbox::new(self.policies.sandbox.clone());
        let result = sandbox.run(code, &self.cwd, &self.env).await?;
        counters.code_steps += 1;

        self.audit
            .record(AuditRecord::CodeExecuted {
                run_id: run_id.to_string(),
                language: language.to_string(),
                exit_code: result.exit_code,
                timed_out: result.timed_out,
            })
            .await;

        let summary = if result.timed_out {
            "code execution timed out".to_string()
        } else {
            format!("code exited with status {}", result.exit_code)
        };
        let value = serde_json::to_value(&result).unwrap_or(Value::Null);
        Ok(StepOutcome {
            summary,
            value: Some(value),
        })
    }

    async fn run_ask_approval(
        &self,
        run_id: &str,
        reason: &str,
        preview_slot: Option<&str>,
        risk: Option<RiskLevel>,
        slots: &SlotStore,
        token: &mut ApprovalToken,
    ) -> Result<StepOutcome, ExecError> {
        let preview = match preview_slot {
            Some(name) => Some(render_preview(slots.require(name)?)),
            None => None,
        };
        let request = ApprovalRequest {
            reason: reason.to_string(),
            preview,
            risk: risk.unwrap_or(RiskLevel::Exec),
            tool_name: None,
        };
        self.request_approval(run_id, &request).await?;
        token.grant();

        Ok(StepOutcome {
            summary: "approval granted".to_string(),
            value: None,
        })
    }

    fn run_summarize(
        &self,
        inputs: &[String],
        slots: &SlotStore,
        token: &mut ApprovalToken,
    ) -> Result<StepOutcome, ExecError> {
        let mut parts = Vec::with_capacity(inputs.len());
        for name in inputs {
            let value = slots.require(name)?;
            parts.push(format!("{name}: {}", render_value(value)));
        }
        let digest = parts.join("\n");
        self.messages.send(digest.clone());

        // a summary introduces new reviewable context; any approval
        // granted before it no longer covers what follows
        token.clear();

        Ok(StepOutcome {
            summary: format!("digest of {} slot(s)", inputs.len()),
            value: Some(Value::String(digest)),
        })
    }

    async fn request_approval(
        &self,
        run_id: &str,
        request: &ApprovalRequest,
    ) -> Result<(), ExecError> {
        self.events.emit(ExecEvent::ApprovalRequested {
            request: request.clone(),
        });
        info!("Approval requested: {}", request.reason);

        let approved = self.approval.ask(request).await;
        self.audit
            .record(AuditRecord::ApprovalDecision {
                run_id: run_id.to_string(),
                reason: request.reason.clone(),
                risk: request.risk,
                approved,
            })
            .await;

        if approved {
            Ok(())
        } else {
            Err(ExecError::UserRejected {
                reason: request.reason.clone(),
            })
        }
    }
}

#[derive(Default)]
struct RunCounters {
    tools_invoked: usize,
    code_steps: usize,
}

struct StepOutcome {
    summary: String,
    value: Option<Value>,
}

/// Renders a stored value for digests and generic previews: strings
/// verbatim, everything else as pretty JSON.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Renders an approval preview. A value shaped like a prepared patch
/// (an object with a string `diff` field) shows the diff itself.
fn render_preview(value: &Value) -> String {
    if let Some(diff) = value.get("diff").and_then(Value::as_str) {
        return diff.to_string();
    }
    render_value(value)
}

fn truncate_preview(code: &str) -> String {
    if code.chars().count() <= CODE_PREVIEW_CHARS {
        code.to_string()
    } else {
        let head: String = code.chars().take(CODE_PREVIEW_CHARS).collect();
        format!("{head}…")
    }
}
