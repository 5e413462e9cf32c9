//! Mermaid flowchart rendering of an operation plan.
//!
//! Steps are drawn by kind: bucket entry steps as `>…]`, sync-and-safe steps
//! as `[…]`, everything else as `[[…]]`. A `Buckets` subgraph lists each
//! bucket's reason, copied steps, root step and output shape.

use batchplan_core::LayerPlanId;

use crate::error::Result;
use crate::layer::{LayerReason, OutputMap, OutputMode};
use crate::plan::OperationPlan;
use crate::step::{StepKind, StepNode};

const COLORS: [&str; 12] = [
    "#696969", "#00bfff", "#7f007f", "#ffa500", "#0000ff", "#7fff00", "#ff1493", "#808000",
    "#dda0dd", "#ff0000", "#ffff00", "#00ffff",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct PrintOptions {
    /// Shorten long step metadata and omit nested output paths.
    pub concise: bool,
}

/// Render `plan` as a Mermaid flowchart.
pub fn print_plan_graph(plan: &OperationPlan, opts: PrintOptions) -> Result<String> {
    let mut out = String::new();
    let header = if opts.concise { "flowchart" } else { "graph" };
    line(&mut out, &format!("{header} TD"));
    line(&mut out, "    classDef plan fill:#fff,stroke-width:3px,color:#000");
    line(&mut out, "    classDef itemplan fill:#fff,stroke-width:6px,color:#000");
    line(&mut out, "    classDef sideeffectplan fill:#f00,stroke-width:6px,color:#000");
    line(
        &mut out,
        "    classDef bucket fill:#f6f6f6,color:#000,stroke-width:6px,text-align:left",
    );

    line(&mut out, "");
    line(&mut out, "    %% define steps");
    let mut nodes = Vec::new();
    plan.process_steps_dependencies_first(|node| nodes.push(node.id))?;
    for id in &nodes {
        let node = plan.step(*id)?;
        line(&mut out, &step_node(node, opts));
    }

    line(&mut out, "");
    line(&mut out, "    %% plan dependencies");
    for id in &nodes {
        let node = plan.step(*id)?;
        if matches!(node.kind, StepKind::Entry) {
            let root = plan.layer_plan(node.layer_plan)?.root_step_id;
            if let Some(root) = root {
                let root = plan.step(root)?;
                line(&mut out, &format!("    {} ==> {}", node_id(root), node_id(node)));
            }
            continue;
        }
        let deps = node
            .dependencies
            .iter()
            .map(|d| plan.step(*d).map(node_id))
            .collect::<Result<Vec<_>>>()?;
        if !deps.is_empty() {
            line(&mut out, &format!("    {} --> {}", deps.join(" & "), node_id(node)));
        }
        if let Some(se) = node.implicit_side_effect {
            line(&mut out, &format!("    {} -.-> {}", node_id(plan.step(se)?), node_id(node)));
        }
    }

    line(&mut out, "");
    line(&mut out, "    subgraph Buckets");
    for lp in plan.layer_plans() {
        let mut label = format!("Bucket {}\n({})", lp.id.get(), lp.reason.label());
        if !lp.copied_step_ids.is_empty() {
            let deps: Vec<String> = lp.copied_step_ids.iter().map(|s| s.get().to_string()).collect();
            label.push_str(&format!("\nDeps: {}", deps.join(", ")));
        }
        if let (Some(root), false) = (lp.root_step_id, lp.reason == LayerReason::Root) {
            let root = plan.step(root)?;
            label.push_str(&format!("\nROOT {}{}", root.name(), root.id));
        }
        for t in &lp.polymorphic_branches {
            label.push_str(&format!("\n-> {t}"));
        }
        let mut outputs = Vec::new();
        output_lines(&lp.output_map, "", opts.concise, &mut outputs);
        if let Some(item) = &lp.item_output {
            outputs.push(format!("[] <-{}- {}", mode_label(&item.mode), item.step.get()));
        }
        for o in outputs {
            label.push('\n');
            label.push_str(&o);
        }
        line(
            &mut out,
            &format!("    {}({}):::bucket", bucket_id(lp.id), escape(&label)),
        );
        line(
            &mut out,
            &format!(
                "    classDef bucket{} stroke:{}",
                lp.id.get(),
                COLORS[lp.id.index() % COLORS.len()]
            ),
        );
        let mut members = vec![bucket_id(lp.id)];
        members.extend(plan.steps_in(lp.id).map(node_id));
        line(
            &mut out,
            &format!("    class {} bucket{}", members.join(","), lp.id.get()),
        );
    }
    for lp in plan.layer_plans() {
        if !lp.children.is_empty() {
            let children: Vec<String> = lp.children.iter().map(|c| bucket_id(*c)).collect();
            line(
                &mut out,
                &format!("    {} --> {}", bucket_id(lp.id), children.join(" & ")),
            );
        }
    }
    line(&mut out, "    end");
    Ok(out)
}

fn line(out: &mut String, s: &str) {
    out.push_str(s);
    out.push('\n');
}

fn node_id(node: &StepNode) -> String {
    format!("{}{}", node.name().trim_start_matches('_'), node.id.get())
}

fn bucket_id(id: LayerPlanId) -> String {
    format!("Bucket{}", id.get())
}

fn step_node(node: &StepNode, opts: PrintOptions) -> String {
    let mut label = format!("{}[{}∈{}]", node.name(), node.id.get(), node.layer_plan.get());
    if let Some(meta) = node.meta() {
        let meta = if opts.concise { squish(&meta) } else { meta };
        label.push_str(&format!("\n<{meta}>"));
    }
    for t in &node.polymorphic_branches {
        label.push_str(&format!("\n-> {t}"));
    }
    let (open, close) = match node.kind {
        StepKind::Entry => (">", "]"),
        _ if node.is_sync_and_safe() => ("[", "]"),
        _ => ("[[", "]]"),
    };
    let class = if node.has_side_effects() {
        "sideeffectplan"
    } else if matches!(node.kind, StepKind::Entry) {
        "itemplan"
    } else {
        "plan"
    };
    format!("    {}{open}{}{close}:::{class}", node_id(node), escape(&label))
}

fn mode_label(mode: &OutputMode) -> &'static str {
    match mode {
        OutputMode::Scalar => "L",
        OutputMode::Object(_) => "O",
        OutputMode::List(_) => "[]",
        OutputMode::Polymorphic(_) => "P",
        OutputMode::Deferred(_) => "D",
    }
}

fn output_lines(map: &OutputMap, prefix: &str, concise: bool, out: &mut Vec<String>) {
    for (key, entry) in map {
        out.push(format!(
            "{prefix}{key} <-{}- {}",
            mode_label(&entry.mode),
            entry.step.get()
        ));
        if let OutputMode::Object(fields) = &entry.mode {
            let nested = if concise {
                format!("{prefix}  ")
            } else {
                format!("{prefix}{key}.")
            };
            output_lines(fields, &nested, concise, out);
        }
    }
}

fn squish(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 8..].iter().collect();
        format!("{head}...{tail}")
    } else {
        s.to_string()
    }
}

/// Quote a node label, swapping characters Mermaid would misparse for
/// lookalikes.
fn escape(s: &str) -> String {
    if s.chars().all(|c| c.is_ascii_alphanumeric() || c == ' ') {
        return s.to_string();
    }
    let body: String = s
        .trim()
        .chars()
        .map(|c| match c {
            '#' => 'ꖛ',
            '"' => '”',
            '<' => 'ᐸ',
            '>' => 'ᐳ',
            other => other,
        })
        .collect();
    format!("\"{}\"", body.replace('\n', "<br />"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_plan, FieldPlans};
    use crate::request::{RequestNode, RequestTree};
    use crate::steps::LambdaStep;
    use batchplan_core::config::PlannerConfig;
    use batchplan_core::Value;

    #[test]
    fn graph_lists_steps_buckets_and_item_edges() {
        let request = RequestTree::new(
            "Query",
            vec![RequestNode::object("users", "User", vec![RequestNode::scalar("name")]).list()],
        );
        let plan = build_plan(&request, &FieldPlans::new(), PlannerConfig::default()).unwrap();
        let graph = print_plan_graph(&plan, PrintOptions::default()).unwrap();

        assert!(graph.starts_with("graph TD\n"));
        assert!(graph.contains("Access2[\"Access[2∈0]<br />ᐸ.usersᐳ\"]:::plan"));
        assert!(graph.contains("Item3>\"__Item[3∈1]\"]:::itemplan"));
        assert!(graph.contains("    Access2 ==> Item3"));
        assert!(graph.contains("    Bucket0 --> Bucket1"));
        assert!(graph.contains("(listItem)"));
        assert!(graph.trim_end().ends_with("end"));
    }

    #[test]
    fn side_effects_and_async_steps_are_marked() {
        let mut plans = FieldPlans::new();
        plans.register("Mutation", "write", |ctx, _, _| {
            ctx.add_step(LambdaStep::new("write", |_| Ok(Value::Null)).with_side_effects(), &[])
        });
        plans.register("Mutation", "slow", |ctx, _, _| {
            ctx.add_step(LambdaStep::new("slow", |_| Ok(Value::Null)).suspending(), &[])
        });
        let request = RequestTree::new(
            "Mutation",
            vec![RequestNode::scalar("write"), RequestNode::scalar("slow")],
        );
        let plan = build_plan(&request, &plans, PlannerConfig::default()).unwrap();
        let graph = print_plan_graph(&plan, PrintOptions { concise: true }).unwrap();

        assert!(graph.starts_with("flowchart TD\n"));
        assert!(graph.contains(":::sideeffectplan"));
        assert!(graph.contains("Lambda3[["));
        assert!(graph.contains("    Lambda2 -.-> Lambda3"));
    }

    #[test]
    fn bucket_labels_list_copies_and_root() {
        let mut plans = FieldPlans::new();
        plans.register("User", "greeting", |ctx, _, _| ctx.context());
        let request = RequestTree::new(
            "Query",
            vec![RequestNode::object("users", "User", vec![RequestNode::scalar("greeting")]).list()],
        );
        let plan = build_plan(&request, &plans, PlannerConfig::default()).unwrap();
        let graph = print_plan_graph(&plan, PrintOptions::default()).unwrap();

        assert!(
            graph.contains("Bucket1(\"Bucket 1<br />(listItem)<br />Deps: 1<br />ROOT Accessꖛ2"),
            "{graph}"
        );
    }

    #[test]
    fn escape_keeps_plain_labels() {
        assert_eq!(escape("Bucket 0"), "Bucket 0");
        assert_eq!(escape("a#1"), "\"aꖛ1\"");
    }
}
