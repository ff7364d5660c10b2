//! Static plan validation.
//!
//! A pure pre-flight pass over the plan and the static configuration:
//! no tool runs, no process spawns, no prompt is shown. The approval
//! check replays the exact state machine the engine runs (via
//! [`RiskGate`]), so a plan the gate would stop at runtime for lack of
//! approval is rejected here with the offending step index instead.

use serde_json::Value;

use crate::config::ExecutionPolicies;
use crate::error::ValidationError;
use crate::plan::{Plan, PlanStep, RiskLevel};
use crate::tools::{Tool, ToolRegistry};

use super::policy::{ApprovalToken, GateDecision, RiskGate};
use super::slots::ArgExpr;

/// Validates a plan against the registry and policies. Returns the
/// first failure, pinned to its step index where one applies.
pub fn validate_plan(
    plan: &Plan,
    registry: &ToolRegistry,
    policies: &ExecutionPolicies,
) -> Result<(), ValidationError> {
    if plan.steps.len() > policies.limits.max_steps {
        return Err(ValidationError::plan(format!(
            "plan has {} steps which exceeds the limit of {}",
            plan.steps.len(),
            policies.limits.max_steps
        )));
    }

    let gate = RiskGate::new(policies);
    let mut cumulative_tokens: u64 = 0;
    let mut token = ApprovalToken::Absent;
    // Slot names some earlier step has promised to write. Steps run in
    // order, so any reference outside this set can never resolve.
    let mut written_slots: Vec<String> = Vec::new();

    for (index, step) in plan.steps.iter().enumerate() {
        cumulative_tokens += step.token_estimate();
        if cumulative_tokens > policies.limits.max_token_budget {
            return Err(ValidationError::at(
                index,
                format!(
                    "token budget exceeded: {} of {} allowed",
                    cumulative_tokens, policies.limits.max_token_budget
                ),
            ));
        }

        match step {
            PlanStep::UseTool { tool, args, .. } => {
                let capability = registry.get(tool).ok_or_else(|| {
                    ValidationError::at(
                        index,
                        format!(
                            "unknown tool '{tool}'; available tools: {}",
                            registry.names().join(", ")
                        ),
                    )
                })?;
                check_args_schema(capability.as_ref(), args, index)?;
                check_slot_refs(&ArgExpr::parse(args).referenced_slots(), &written_slots, index)?;
                apply_gate(
                    gate.decide(Some(tool), capability.risk(), token),
                    &mut token,
                    index,
                    &format!("tool '{tool}' with risk '{}'", capability.risk()),
                )?;
            }
            PlanStep::ExecCode { .. } => {
                apply_gate(
                    gate.decide(None, RiskLevel::Exec, token),
                    &mut token,
                    index,
                    "code execution",
                )?;
            }
            PlanStep::AskApproval { preview_slot, .. } => {
                if let Some(slot) = preview_slot {
                    check_slot_refs(
                        std::slice::from_ref(slot),
                        &written_slots,
                        index,
                    )?;
                }
                token.grant();
            }
            PlanStep::Summarize { inputs, .. } => {
                check_slot_refs(inputs, &written_slots, index)?;
                // a summary introduces new reviewable context; a stale
                // approval no longer covers what follows it
                token.clear();
            }
        }

        if let Some(name) = step.save_as() {
            written_slots.push(name.to_string());
        }
    }

    if token.is_available() {
        // a dangling approval is suspicious: fail closed so a rogue
        // plan cannot bank consent it never spends
        return Err(ValidationError::plan(
            "plan ends with an unused approval; refusing to execute",
        ));
    }

    Ok(())
}

fn apply_gate(
    decision: GateDecision,
    token: &mut ApprovalToken,
    index: usize,
    subject: &str,
) -> Result<(), ValidationError> {
    match decision {
        GateDecision::Proceed => Ok(()),
        GateDecision::ProceedConsuming => {
            token.take();
            Ok(())
        }
        GateDecision::NeedApproval => Err(ValidationError::at(
            index,
            format!("{subject} requires prior approval"),
        )),
        GateDecision::Refuse => Err(ValidationError::at(
            index,
            format!("{subject} is refused: network access is disabled by policy"),
        )),
    }
}

fn check_args_schema(tool: &dyn Tool, args: &Value, index: usize) -> Result<(), ValidationError> {
    let Some(map) = args.as_object() else {
        return Err(ValidationError::at(
            index,
            format!("arguments for tool '{}' must be an object", tool.name()),
        ));
    };

    let params = tool.params();
    for param in params.iter().filter(|p| p.required) {
        if !map.contains_key(&param.name) {
            return Err(ValidationError::at(
                index,
                format!("missing required argument '{}'", param.name),
            ));
        }
    }
    for key in map.keys() {
        if !params.iter().any(|p| &p.name == key) {
            return Err(ValidationError::at(
                index,
                format!("unexpected argument '{key}'"),
            ));
        }
    }
    Ok(())
}

fn check_slot_refs(
    referenced: &[String],
    written: &[String],
    index: usize,
) -> Result<(), ValidationError> {
    for name in referenced {
        if !written.contains(name) {
            return Err(ValidationError::at(
                index,
                format!("slot '{name}' is not written by any earlier step"),
            ));
        }
    }
    Ok(())
}
