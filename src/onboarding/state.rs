//! Step graph and sequencer: which step follows which.
//!
//! Steps are numbered `1..=TOTAL_STEPS`. Moves are described by a
//! declarative edge list rather than conditionals in the handlers, so the
//! whole graph can be inspected and tested on its own. The only irregular
//! edge is the plan step, which constrained hosts jump over in both
//! directions; the step count itself never changes.

use serde::{Deserialize, Serialize};

use super::session::OnboardingSession;
use super::validate;
use crate::error::ValidationError;

pub const FIRST_STEP: u8 = 1;
pub const TOTAL_STEPS: u8 = 11;

/// The wizard's steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Name = 1,
    DateOfBirth = 2,
    Sex = 3,
    Height = 4,
    ActivityLevel = 5,
    CurrentWeight = 6,
    GoalType = 7,
    GoalWeight = 8,
    Plan = 9,
    FocusModules = 10,
    Legal = 11,
}

impl Step {
    pub const ALL: [Step; TOTAL_STEPS as usize] = [
        Self::Name,
        Self::DateOfBirth,
        Self::Sex,
        Self::Height,
        Self::ActivityLevel,
        Self::CurrentWeight,
        Self::GoalType,
        Self::GoalWeight,
        Self::Plan,
        Self::FocusModules,
        Self::Legal,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Step> {
        Self::ALL.get(usize::from(index).checked_sub(1)?).copied()
    }

    pub fn is_last(self) -> bool {
        self.index() == TOTAL_STEPS
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Name => "name",
            Self::DateOfBirth => "date_of_birth",
            Self::Sex => "sex",
            Self::Height => "height",
            Self::ActivityLevel => "activity_level",
            Self::CurrentWeight => "current_weight",
            Self::GoalType => "goal_type",
            Self::GoalWeight => "goal_weight",
            Self::Plan => "plan",
            Self::FocusModules => "focus_modules",
            Self::Legal => "legal",
        };
        write!(f, "{s}")
    }
}

/// The host the wizard runs inside.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostContext {
    #[default]
    Standard,
    /// A host that must not show the calorie plan step.
    Constrained,
}

impl HostContext {
    pub fn skips_plan_step(&self) -> bool {
        matches!(self, Self::Constrained)
    }
}

impl std::str::FromStr for HostContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "constrained" => Ok(Self::Constrained),
            other => Err(format!("unknown host context '{other}'")),
        }
    }
}

impl std::fmt::Display for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Constrained => write!(f, "constrained"),
        }
    }
}

/// Outgoing edges of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepEdge {
    pub step: u8,
    /// Where "next" goes; `None` on the last step (finalization follows).
    pub forward: Option<u8>,
    /// Where "back" goes; `None` on the first step.
    pub back: Option<u8>,
}

/// The complete step graph for one host context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepGraph {
    total_steps: u8,
    edges: Vec<StepEdge>,
}

impl StepGraph {
    pub fn for_host(host: HostContext) -> Self {
        let plan = Step::Plan.index();
        let skip = host.skips_plan_step();
        let edges = (FIRST_STEP..=TOTAL_STEPS)
            .map(|step| {
                let mut forward = (step < TOTAL_STEPS).then(|| step + 1);
                let mut back = (step > FIRST_STEP).then(|| step - 1);
                if skip {
                    if forward == Some(plan) {
                        forward = Some(plan + 1);
                    }
                    if back == Some(plan) {
                        back = Some(plan - 1);
                    }
                }
                StepEdge {
                    step,
                    forward,
                    back,
                }
            })
            .collect();
        Self {
            total_steps: TOTAL_STEPS,
            edges,
        }
    }

    pub fn total_steps(&self) -> u8 {
        self.total_steps
    }

    pub fn edges(&self) -> &[StepEdge] {
        &self.edges
    }

    fn edge(&self, step: u8) -> Option<&StepEdge> {
        self.edges.iter().find(|e| e.step == step)
    }

    pub fn forward(&self, step: u8) -> Option<u8> {
        self.edge(step)?.forward
    }

    pub fn back(&self, step: u8) -> Option<u8> {
        self.edge(step)?.back
    }
}

/// Result of an `advance` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advance {
    Moved { from: u8, to: u8 },
    /// The last step passed validation; finalization is next.
    ReadyToFinalize,
}

/// Drives `current_step` through the graph, gating forward moves on validation.
#[derive(Debug, Clone)]
pub struct StepSequencer {
    graph: StepGraph,
}

impl StepSequencer {
    pub fn new(host: HostContext) -> Self {
        Self {
            graph: StepGraph::for_host(host),
        }
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Validate `step` against the form state.
    pub fn check(&self, step: u8, session: &OnboardingSession) -> Result<(), ValidationError> {
        let step = Step::from_index(step).ok_or_else(|| {
            ValidationError::new("onboarding.errors.unknown_step").with_param("step", step)
        })?;
        validate::validate_step(step, session)
    }

    pub fn can_advance(&self, step: u8, session: &OnboardingSession) -> bool {
        self.check(step, session).is_ok()
    }

    /// Next step after `step`, ignoring validation.
    pub fn next_step(&self, step: u8) -> Option<u8> {
        self.graph.forward(step)
    }

    /// Previous step before `step`. Retreating is never gated.
    pub fn retreat(&self, step: u8) -> Option<u8> {
        self.graph.back(step)
    }

    /// Validate the session's current step and compute the move.
    ///
    /// On failure the session's step is untouched and the error is returned.
    pub fn advance(&self, session: &OnboardingSession) -> Result<Advance, ValidationError> {
        let from = session.current_step;
        self.check(from, session)?;
        Ok(match self.next_step(from) {
            Some(to) => Advance::Moved { from, to },
            None => Advance::ReadyToFinalize,
        })
    }
}
