//! Risk policy gate and the one-shot approval token.
//!
//! The same decision procedure backs both the validator's static
//! simulation and the engine's runtime checks, so the two can never
//! drift apart.

use crate::config::ExecutionPolicies;
use crate::plan::RiskLevel;

/// Single-use permission threaded through the sequential step fold.
///
/// Granted by a successful `ask_approval` step, consumed by exactly
/// the next gated step, and cleared (without being consumed) by a
/// `summarize` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApprovalToken {
    #[default]
    Absent,
    Available,
}

impl ApprovalToken {
    pub fn grant(&mut self) {
        *self = ApprovalToken::Available;
    }

    pub fn clear(&mut self) {
        *self = ApprovalToken::Absent;
    }

    /// Consumes the token if available.
    pub fn take(&mut self) -> bool {
        if *self == ApprovalToken::Available {
            *self = ApprovalToken::Absent;
            true
        } else {
            false
        }
    }

    pub fn is_available(&self) -> bool {
        *self == ApprovalToken::Available
    }
}

/// Outcome of consulting the gate for one candidate action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Auto-approved or globally allowed; no token involved.
    Proceed,
    /// Gated, and a token is available: consume it and proceed.
    ProceedConsuming,
    /// Gated with no token banked. The engine asks the approval
    /// collaborator interactively; the validator rejects the plan.
    NeedApproval,
    /// Network risk with the network switch off. No override exists.
    Refuse,
}

pub struct RiskGate<'a> {
    policies: &'a ExecutionPolicies,
}

impl<'a> RiskGate<'a> {
    pub fn new(policies: &'a ExecutionPolicies) -> Self {
        Self { policies }
    }

    /// Decision procedure, in order:
    /// 1. `net` risk with the network switch off is refused outright.
    /// 2. An auto-approved tool, or a globally allowed risk, proceeds
    ///    without touching the token.
    /// 3. Otherwise an available token is consumed; absence means the
    ///    action needs an approval it does not have.
    pub fn decide(
        &self,
        tool_name: Option<&str>,
        risk: RiskLevel,
        token: ApprovalToken,
    ) -> GateDecision {
        if risk == RiskLevel::Net && !self.policies.allow_risks.net {
            return GateDecision::Refuse;
        }

        let auto_approved = tool_name
            .map(|name| self.policies.auto_approve_tools.contains(name))
            .unwrap_or(false);
        if auto_approved || self.policies.allow_risks.allows(risk) {
            return GateDecision::Proceed;
        }

        if token.is_available() {
            GateDecision::ProceedConsuming
        } else {
            GateDecision::NeedApproval
        }
    }
}
