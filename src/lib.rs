//! stride-agent — a plan execution runtime for AI agents.
//!
//! An external planning stage produces a declarative [`Plan`]; this
//! crate validates it and executes its steps in order: invoking
//! host-registered [`Tool`] capabilities, running untrusted code in an
//! isolated Node.js subprocess, gating risky actions behind an
//! [`ApprovalHandler`], and threading intermediate results between
//! steps through named slots.
//!
//! The usual flow:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use stride_agent::{
//! #     approval::AutoApprove, config::ExecutionPolicies, engine::PlanRunner,
//! #     plan::Plan, tools::ToolRegistry,
//! # };
//! # async fn demo(plan: Plan) -> anyhow::Result<()> {
//! let registry = Arc::new(ToolRegistry::new());
//! let policies = ExecutionPolicies::default();
//! let runner = PlanRunner::new(registry, policies, Arc::new(AutoApprove));
//!
//! runner.validate(&plan)?;
//! let summary = runner.run(&plan).await?;
//! println!("ran {} steps", summary.steps_run);
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod plan;
pub mod sandbox;
pub mod tools;

pub use crate::approval::{ApprovalHandler, ApprovalRequest};
pub use crate::audit::{AuditRecord, AuditSink, FileAuditLog, NullAudit};
pub use crate::config::{ExecutionPolicies, PlanLimits, RiskPolicy, SandboxLimits};
pub use crate::engine::{validate_plan, PlanRunner, RunSummary};
pub use crate::error::{ExecError, ValidationError};
pub use crate::events::{EventSink, ExecEvent};
pub use crate::plan::{Language, Plan, PlanStep, RiskLevel};
pub use crate::sandbox::{NodeSandbox, SandboxResult};
pub use crate::tools::{MessageSink, Tool, ToolContext, ToolParam, ToolRegistry};
