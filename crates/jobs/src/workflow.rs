//! Workflow registry: which steps a workflow type runs, and what it costs.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;

use pixforge_core::{DomainError, DomainResult};
use pixforge_credits::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Inspect an image and report defects.
    Check,
    /// Detect, plan and retouch defects.
    Fix,
    /// `Fix` followed by upscaling.
    FullRestore,
}

impl WorkflowType {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowType::Check => "check",
            WorkflowType::Fix => "fix",
            WorkflowType::FullRestore => "full_restore",
        }
    }
}

impl core::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "check" => Ok(WorkflowType::Check),
            "fix" => Ok(WorkflowType::Fix),
            "full_restore" => Ok(WorkflowType::FullRestore),
            other => Err(DomainError::validation(format!("unknown workflow type: {other}"))),
        }
    }
}

/// Kind of work a provider is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Detect,
    Assess,
    Plan,
    Retouch,
    Upscale,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Detect => "detect",
            StepKind::Assess => "assess",
            StepKind::Plan => "plan",
            StepKind::Retouch => "retouch",
            StepKind::Upscale => "upscale",
        }
    }
}

/// Opaque reference to a provider output (URL, blob key, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputRef(pub String);

impl OutputRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OutputRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fully prepared provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRequest {
    pub kind: StepKind,
    pub input_ref: String,
    pub params: serde_json::Value,
}

/// What a step can see when preparing its request.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub input_ref: &'a str,
    pub prior: &'a [(String, OutputRef)],
}

impl<'a> StepContext<'a> {
    pub fn output_of(&self, step: &str) -> DomainResult<&'a OutputRef> {
        self.prior
            .iter()
            .find(|(name, _)| name == step)
            .map(|(_, out)| out)
            .ok_or_else(|| DomainError::validation(format!("missing output of step `{step}`")))
    }
}

pub type PrepareFn = fn(&StepContext<'_>) -> DomainResult<StepRequest>;

/// One step of a workflow.
#[derive(Debug, Clone)]
pub struct StepDescriptor {
    pub name: &'static str,
    pub kind: StepKind,
    pub prepare: PrepareFn,
}

impl StepDescriptor {
    pub fn request(&self, ctx: &StepContext<'_>) -> DomainResult<StepRequest> {
        (self.prepare)(ctx)
    }
}

/// Ordered steps plus the price of running them.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub workflow_type: WorkflowType,
    pub action: Action,
    pub cost: u32,
    pub steps: Vec<StepDescriptor>,
}

impl WorkflowDefinition {
    /// Results payload assembled from every step output; `output` is the last.
    pub fn results(&self, outputs: &[(String, OutputRef)]) -> serde_json::Value {
        let steps: serde_json::Map<String, serde_json::Value> = outputs
            .iter()
            .map(|(name, out)| (name.clone(), json!(out.as_str())))
            .collect();
        json!({
            "workflow": self.workflow_type.as_str(),
            "output": outputs.last().map(|(_, out)| out.as_str()),
            "steps": steps,
        })
    }
}

fn detect(ctx: &StepContext<'_>) -> DomainResult<StepRequest> {
    Ok(StepRequest {
        kind: StepKind::Detect,
        input_ref: ctx.input_ref.to_string(),
        params: json!({}),
    })
}

fn assess(ctx: &StepContext<'_>) -> DomainResult<StepRequest> {
    Ok(StepRequest {
        kind: StepKind::Assess,
        input_ref: ctx.input_ref.to_string(),
        params: json!({ "detections": ctx.output_of("detect")?.as_str() }),
    })
}

fn plan(ctx: &StepContext<'_>) -> DomainResult<StepRequest> {
    Ok(StepRequest {
        kind: StepKind::Plan,
        input_ref: ctx.input_ref.to_string(),
        params: json!({ "detections": ctx.output_of("detect")?.as_str() }),
    })
}

fn retouch(ctx: &StepContext<'_>) -> DomainResult<StepRequest> {
    Ok(StepRequest {
        kind: StepKind::Retouch,
        input_ref: ctx.input_ref.to_string(),
        params: json!({ "plan": ctx.output_of("plan")?.as_str() }),
    })
}

fn upscale(ctx: &StepContext<'_>) -> DomainResult<StepRequest> {
    Ok(StepRequest {
        kind: StepKind::Upscale,
        input_ref: ctx.output_of("retouch")?.to_string(),
        params: json!({ "scale": 2 }),
    })
}

const DETECT: StepDescriptor = StepDescriptor { name: "detect", kind: StepKind::Detect, prepare: detect };
const ASSESS: StepDescriptor = StepDescriptor { name: "assess", kind: StepKind::Assess, prepare: assess };
const PLAN: StepDescriptor = StepDescriptor { name: "plan", kind: StepKind::Plan, prepare: plan };
const RETOUCH: StepDescriptor = StepDescriptor { name: "retouch", kind: StepKind::Retouch, prepare: retouch };
const UPSCALE: StepDescriptor = StepDescriptor { name: "upscale", kind: StepKind::Upscale, prepare: upscale };

/// Maps a workflow type to its definition.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<WorkflowType, WorkflowDefinition>,
}

impl WorkflowRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The production catalogue.
    pub fn standard() -> Self {
        Self::empty()
            .with(WorkflowDefinition {
                workflow_type: WorkflowType::Check,
                action: Action::Check,
                cost: 1,
                steps: vec![DETECT, ASSESS],
            })
            .with(WorkflowDefinition {
                workflow_type: WorkflowType::Fix,
                action: Action::Fix,
                cost: 1,
                steps: vec![DETECT, PLAN, RETOUCH],
            })
            .with(WorkflowDefinition {
                workflow_type: WorkflowType::FullRestore,
                action: Action::Fix,
                cost: 3,
                steps: vec![DETECT, PLAN, RETOUCH, UPSCALE],
            })
    }

    /// Register (or replace) a definition.
    pub fn with(mut self, definition: WorkflowDefinition) -> Self {
        self.workflows.insert(definition.workflow_type, definition);
        self
    }

    pub fn get(&self, workflow_type: WorkflowType) -> Option<&WorkflowDefinition> {
        self.workflows.get(&workflow_type)
    }
}
