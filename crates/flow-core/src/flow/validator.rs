//! Flow Plan Model validation (§4.8 — C8): DAG-ness, closure of
//! `depends_on` within the plan, presence of the required steps named by
//! the flow-definition table (§3), and rejection of unknown step kinds.
//! Validation failure is always a `MalformedPlan` fatal error.

use std::collections::{HashMap, HashSet};

use flow_domain::{StepKind, TaskKind};

use crate::errors::OrchestratorError;
use crate::flow::plan::FlowPlan;

/// The steps every plan of this kind must contain regardless of which
/// optional steps were gated in (§3's flow-definition table). `FullIngest`
/// grafts a `ProcessUpload` subflow and a `DetectLabels` subflow together,
/// so its minimum is the union of both subflows' own required steps.
fn required_steps(kind: TaskKind) -> &'static [StepKind] {
    match kind {
        TaskKind::ProcessUpload => &[StepKind::TranscodeProbe],
        TaskKind::DetectLabels => &[StepKind::LabelsUploadToGcs],
        TaskKind::RenderTimeline => &[StepKind::RenderPrepare, StepKind::RenderExecute, StepKind::RenderFinalize],
        TaskKind::FullIngest => &[StepKind::TranscodeProbe, StepKind::LabelsUploadToGcs],
    }
}

pub fn validate_plan(plan: &FlowPlan, task_kind: TaskKind) -> Result<(), OrchestratorError> {
    let known: HashSet<StepKind> = plan.children.iter().map(|c| c.step_kind).collect();

    if known.len() != plan.children.len() {
        return Err(OrchestratorError::MalformedPlan("duplicate step kind in plan".into()));
    }

    for required in required_steps(task_kind) {
        if !known.contains(required) {
            return Err(OrchestratorError::MalformedPlan(format!(
                "plan for {task_kind} is missing required step {required}"
            )));
        }
    }

    for child in &plan.children {
        for dep in &child.depends_on {
            if !known.contains(dep) {
                return Err(OrchestratorError::MalformedPlan(format!(
                    "step {} depends on {} which is not in this plan",
                    child.step_kind, dep
                )));
            }
        }
    }

    detect_cycle(plan)?;
    Ok(())
}

fn detect_cycle(plan: &FlowPlan) -> Result<(), OrchestratorError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let edges: HashMap<StepKind, &Vec<StepKind>> =
        plan.children.iter().map(|c| (c.step_kind, &c.depends_on)).collect();
    let mut marks: HashMap<StepKind, Mark> =
        plan.children.iter().map(|c| (c.step_kind, Mark::Unvisited)).collect();

    fn visit(
        node: StepKind,
        edges: &HashMap<StepKind, &Vec<StepKind>>,
        marks: &mut HashMap<StepKind, Mark>,
    ) -> Result<(), OrchestratorError> {
        match marks.get(&node).copied().unwrap_or(Mark::Unvisited) {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(OrchestratorError::MalformedPlan(format!("cycle detected at step {node}")));
            }
            Mark::Unvisited => {}
        }
        marks.insert(node, Mark::InProgress);
        if let Some(deps) = edges.get(&node) {
            for &dep in deps.iter() {
                visit(dep, edges, marks)?;
            }
        }
        marks.insert(node, Mark::Done);
        Ok(())
    }

    for kind in plan.step_kinds() {
        visit(kind, &edges, &mut marks)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::plan::{BackoffPolicy, ParentNode, StepNode, StepOpts};
    use std::collections::HashMap as Map;

    fn node(kind: StepKind, deps: Vec<StepKind>) -> StepNode {
        StepNode {
            step_kind: kind,
            queue: kind.queue(),
            data: serde_json::json!({}),
            opts: StepOpts { attempts: 3, backoff: BackoffPolicy { delay_ms: 1000 } },
            depends_on: deps,
        }
    }

    #[test]
    fn rejects_cycles() {
        // `TranscodeProbe` present so this exercises cycle detection in
        // isolation from the required-steps check below.
        let plan = FlowPlan {
            parent: ParentNode { task_id: "t".into(), workspace_id: "w".into(), step_results: Map::new() },
            children: vec![
                node(StepKind::TranscodeProbe, vec![]),
                node(StepKind::TranscodeThumbnail, vec![StepKind::TranscodeSprite]),
                node(StepKind::TranscodeSprite, vec![StepKind::TranscodeThumbnail]),
            ],
        };
        assert!(validate_plan(&plan, TaskKind::ProcessUpload).is_err());
    }

    #[test]
    fn rejects_dangling_dependency() {
        let plan = FlowPlan {
            parent: ParentNode { task_id: "t".into(), workspace_id: "w".into(), step_results: Map::new() },
            children: vec![
                node(StepKind::TranscodeProbe, vec![]),
                node(StepKind::TranscodeThumbnail, vec![StepKind::TranscodeSprite]),
            ],
        };
        assert!(validate_plan(&plan, TaskKind::ProcessUpload).is_err());
    }

    #[test]
    fn accepts_valid_dag() {
        let plan = FlowPlan {
            parent: ParentNode { task_id: "t".into(), workspace_id: "w".into(), step_results: Map::new() },
            children: vec![
                node(StepKind::RenderPrepare, vec![]),
                node(StepKind::RenderExecute, vec![StepKind::RenderPrepare]),
                node(StepKind::RenderFinalize, vec![StepKind::RenderExecute]),
            ],
        };
        assert!(validate_plan(&plan, TaskKind::RenderTimeline).is_ok());
    }

    #[test]
    fn rejects_plan_missing_a_required_step() {
        let plan = FlowPlan {
            parent: ParentNode { task_id: "t".into(), workspace_id: "w".into(), step_results: Map::new() },
            children: vec![node(StepKind::RenderPrepare, vec![]), node(StepKind::RenderExecute, vec![StepKind::RenderPrepare])],
        };
        assert!(validate_plan(&plan, TaskKind::RenderTimeline).is_err());
    }
}
