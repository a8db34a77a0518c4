/// Graph stitching
///
/// Derives each activity's `previous`/`next` references from the flat link list
/// and compiles the incoming link expressions of every activity into a single
/// Lua transfer unit. Stitching never aborts as a whole: a failure on one
/// activity is reported as a [`StitchIssue`] and that activity keeps an empty
/// result for the failed piece.

use crate::flow::types::{Activity, Flow};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

/// Token addressing the destination activity inside a link expression
pub const DESTINATION_TOKEN: &str = "destination.";
/// Token addressing the source activity inside a link expression
pub const SOURCE_TOKEN: &str = "source.";
/// Marker prefixed to every generated transfer statement
pub const LINK_MARKER: &str = "-- LINK::";

/// Which part of an activity's stitching failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchPiece {
    Previous,
    Next,
    Transfer,
    Graph,
}

impl fmt::Display for StitchPiece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StitchPiece::Previous => "previous activity selection",
            StitchPiece::Next => "next activity selection",
            StitchPiece::Transfer => "one or more links",
            StitchPiece::Graph => "graph structure",
        };
        f.write_str(label)
    }
}

/// A non-fatal problem found while stitching one activity
#[derive(Debug, Clone, PartialEq)]
pub struct StitchIssue {
    /// Reference of the offending activity
    pub reference: String,
    /// The piece left empty because of the problem
    pub piece: StitchPiece,
    pub message: String,
}

impl fmt::Display for StitchIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Problem in {} for activity {}:\n{}",
            self.piece, self.reference, self.message
        )
    }
}

/// Stitch a flow in place, returning every per-activity problem encountered
///
/// Previous, next and transfer code are recomputed from scratch on every call.
pub fn stitch(flow: &mut Flow) -> Vec<StitchIssue> {
    let mut issues = Vec::new();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for activity in &flow.activities {
        *counts.entry(activity.reference.clone()).or_default() += 1;
    }
    let duplicated = |reference: &str| counts.get(reference).copied().unwrap_or(0) > 1;

    // Back edges first, the forward edges are their inverse
    let mut previous_sets = Vec::with_capacity(flow.activities.len());
    for activity in &flow.activities {
        match select_previous(flow, activity, duplicated(&activity.reference)) {
            Ok(previous) => previous_sets.push(previous),
            Err(message) => {
                tracing::error!("🧵 Stitching previous for '{}' failed: {}", activity.reference, message);
                issues.push(StitchIssue {
                    reference: activity.reference.clone(),
                    piece: StitchPiece::Previous,
                    message,
                });
                previous_sets.push(Vec::new());
            }
        }
    }
    for (activity, previous) in flow.activities.iter_mut().zip(previous_sets) {
        activity.previous = previous;
    }

    let mut next_sets = Vec::with_capacity(flow.activities.len());
    let mut transfer_units = Vec::with_capacity(flow.activities.len());
    for activity in &flow.activities {
        if duplicated(&activity.reference) {
            let message = format!("activity reference `{}` is used more than once", activity.reference);
            tracing::error!("🧵 Stitching next for '{}' failed: {}", activity.reference, message);
            issues.push(StitchIssue {
                reference: activity.reference.clone(),
                piece: StitchPiece::Next,
                message,
            });
            next_sets.push(Vec::new());
        } else {
            next_sets.push(select_next(flow, &activity.reference));
        }

        match build_assign(activity, flow) {
            Ok(code) => transfer_units.push(code),
            Err(message) => {
                tracing::error!("🧵 Stitching links for '{}' failed: {}", activity.reference, message);
                issues.push(StitchIssue {
                    reference: activity.reference.clone(),
                    piece: StitchPiece::Transfer,
                    message,
                });
                transfer_units.push(None);
            }
        }
    }
    for ((activity, next), code) in flow.activities.iter_mut().zip(next_sets).zip(transfer_units) {
        activity.next = next;
        activity.assign_code = code;
    }

    let graph = FlowGraph::build(flow);
    if let Some(reference) = graph.cycle_member() {
        tracing::warn!("🔁 Flow '{}' contains a cycle through '{}'", flow.name, reference);
        issues.push(StitchIssue {
            reference,
            piece: StitchPiece::Graph,
            message: "activity is part of a cycle; its join can never be released".to_string(),
        });
    }

    tracing::debug!(
        "🧵 Stitched flow '{}': {} activities, {} links, {} issues",
        flow.name,
        flow.activities.len(),
        flow.links.len(),
        issues.len()
    );

    issues
}

fn select_previous(flow: &Flow, activity: &Activity, duplicated: bool) -> Result<Vec<String>, String> {
    if duplicated {
        return Err(format!("activity reference `{}` is used more than once", activity.reference));
    }

    let sources: HashSet<&str> = flow
        .links
        .iter()
        .filter(|l| l.destination == activity.reference)
        .map(|l| l.source.as_str())
        .collect();

    if let Some(missing) = sources.iter().find(|s| flow.activity(s).is_none()) {
        return Err(format!("link source `{}` is not an activity of this flow", missing));
    }

    // Flow order keeps the generated transfer statements deterministic
    let mut previous: Vec<String> = Vec::new();
    for candidate in &flow.activities {
        if sources.contains(candidate.reference.as_str()) && !previous.contains(&candidate.reference) {
            previous.push(candidate.reference.clone());
        }
    }
    Ok(previous)
}

fn select_next(flow: &Flow, reference: &str) -> Vec<String> {
    flow.activities
        .iter()
        .filter(|a| a.previous.iter().any(|p| p == reference))
        .map(|a| a.reference.clone())
        .collect()
}

/// Build the combined transfer unit for one activity
///
/// Returns `Ok(None)` when no incoming link carries a usable expression.
fn build_assign(activity: &Activity, flow: &Flow) -> Result<Option<String>, String> {
    let mut statements = Vec::new();

    for source_ref in &activity.previous {
        let source = flow
            .activity(source_ref)
            .ok_or_else(|| format!("previous activity `{}` disappeared from the flow", source_ref))?;

        let expressions: Vec<&str> = flow
            .links
            .iter()
            .filter(|l| l.source == *source_ref && l.destination == activity.reference)
            .filter_map(|l| l.usable_expression())
            .collect();

        let expression = match expressions.as_slice() {
            [] => continue,
            [single] => *single,
            _ => {
                return Err(format!(
                    "{} links from `{}` carry expressions; only one is allowed",
                    expressions.len(),
                    source_ref
                ))
            }
        };

        ensure_embeddable(&source.reference)?;
        ensure_embeddable(&source.kind)?;
        ensure_embeddable(&activity.reference)?;

        let lookup = format!("flow.get(\"{}\", \"{}\").", source.reference, source.kind);
        let body = replace_token(expression, DESTINATION_TOKEN, "activity.");
        let body = replace_token(&body, SOURCE_TOKEN, &lookup);
        let body = body.lines().collect::<Vec<_>>().join("\n\t");

        statements.push(format!(
            "{} {} => {}\n\t{}",
            LINK_MARKER, source.reference, activity.reference, body
        ));
    }

    if statements.is_empty() {
        return Ok(None);
    }

    Ok(Some(format!(
        "function(activity, variables, flow)\n\t{}\nend",
        statements.join("\n\t")
    )))
}

fn ensure_embeddable(text: &str) -> Result<(), String> {
    if text.chars().any(|c| c == '"' || c == '\\' || c.is_control()) {
        return Err(format!("`{}` cannot be embedded in generated transfer code", text.escape_debug()));
    }
    Ok(())
}

/// Replace `token` wherever it starts an identifier path
///
/// `resource.x` is left alone when replacing `source.`; a plain textual template,
/// so occurrences inside string literals are still replaced.
fn replace_token(code: &str, token: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    let mut last: Option<char> = None;

    while let Some(pos) = rest.find(token) {
        let before = &rest[..pos];
        out.push_str(before);

        let preceding = before.chars().last().or(last);
        let at_boundary = preceding.map_or(true, |c| !(c.is_alphanumeric() || c == '_' || c == '.'));
        out.push_str(if at_boundary { replacement } else { token });

        last = token.chars().last();
        rest = &rest[pos + token.len()..];
    }

    out.push_str(rest);
    out
}

/// Petgraph view of a stitched flow
///
/// Only used for structural questions (cycles, reachability); traversal itself
/// follows the activities' `next` references.
#[derive(Debug)]
pub struct FlowGraph {
    graph: DiGraph<String, ()>,
    index_of: HashMap<String, NodeIndex>,
}

impl FlowGraph {
    /// Build the graph from resolvable links, ignoring dangling ones
    pub fn build(flow: &Flow) -> Self {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();

        for activity in &flow.activities {
            index_of
                .entry(activity.reference.clone())
                .or_insert_with(|| graph.add_node(activity.reference.clone()));
        }

        for link in &flow.links {
            if let (Some(&from), Some(&to)) = (index_of.get(&link.source), index_of.get(&link.destination)) {
                graph.add_edge(from, to, ());
            }
        }

        Self { graph, index_of }
    }

    /// A reference on some cycle, if the graph is not a DAG
    pub fn cycle_member(&self) -> Option<String> {
        toposort(&self.graph, None)
            .err()
            .map(|cycle| self.graph[cycle.node_id()].clone())
    }

    /// Every activity reachable from `reference`, excluding the activity itself
    pub fn downstream(&self, reference: &str) -> BTreeSet<String> {
        let mut reachable = BTreeSet::new();
        let Some(&start) = self.index_of.get(reference) else {
            return reachable;
        };

        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for target in self.graph.neighbors(current) {
                if seen.insert(target) {
                    reachable.insert(self.graph[target].clone());
                    queue.push_back(target);
                }
            }
        }

        reachable
    }
}
