//! Strongly connected components over the package (or subject) graph.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::Deserialize;

use crate::location::LocationMatcher;
use crate::model::{Model, UNNAMED_PACKAGE};

/// Granularity of the graph searched for cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CycleMode {
    #[default]
    Packages,
    Subjects,
    Off,
}

/// One concrete class edge backing a node-to-node dependency.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CycleHop {
    pub from: String,
    pub to: String,
    pub from_class: String,
    pub to_class: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cycle {
    /// Node names in ascending order.
    pub members: Vec<String>,
    /// Closed walk through the component, starting and ending at the first member.
    pub chain: Vec<CycleHop>,
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle between {}", self.members.join(", "))?;
        for (index, hop) in self.chain.iter().enumerate() {
            let separator = if index == 0 { ": " } else { ", " };
            write!(
                f,
                "{separator}{} -> {} ({} -> {})",
                hop.from, hop.to, hop.from_class, hop.to_class
            )?;
        }
        Ok(())
    }
}

/// Node-level dependency graph; each edge keeps the smallest class edge seen.
#[derive(Debug, Default)]
pub(crate) struct NodeGraph {
    edges: BTreeMap<String, BTreeMap<String, (String, String)>>,
}

impl NodeGraph {
    pub(crate) fn add_edge(&mut self, from: &str, to: &str, from_class: &str, to_class: &str) {
        if from == to {
            return;
        }
        let candidate = (from_class.to_string(), to_class.to_string());
        let targets = self.edges.entry(from.to_string()).or_default();
        match targets.get_mut(to) {
            Some(existing) if *existing <= candidate => {}
            Some(existing) => *existing = candidate,
            None => {
                targets.insert(to.to_string(), candidate);
            }
        }
    }

    fn nodes(&self) -> Vec<&str> {
        let mut nodes: BTreeSet<&str> = BTreeSet::new();
        for (from, targets) in &self.edges {
            nodes.insert(from);
            nodes.extend(targets.keys().map(String::as_str));
        }
        nodes.into_iter().collect()
    }

    fn successors(&self, node: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(node)
            .into_iter()
            .flat_map(|targets| targets.keys().map(String::as_str))
    }

    fn hop(&self, from: &str, to: &str) -> Option<CycleHop> {
        let (from_class, to_class) = self.edges.get(from)?.get(to)?;
        Some(CycleHop {
            from: from.to_string(),
            to: to.to_string(),
            from_class: from_class.clone(),
            to_class: to_class.clone(),
        })
    }

    /// Every strongly connected component with more than one node.
    pub(crate) fn cycles(&self) -> Vec<Cycle> {
        let nodes = self.nodes();
        let index_of: BTreeMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (*node, index))
            .collect();
        let adjacency: Vec<Vec<usize>> = nodes
            .iter()
            .map(|node| self.successors(node).map(|next| index_of[next]).collect())
            .collect();

        let mut tarjan = Tarjan::new(&adjacency);
        for node in 0..nodes.len() {
            if tarjan.index[node].is_none() {
                tarjan.visit(node);
            }
        }

        let mut cycles: Vec<Cycle> = tarjan
            .components
            .into_iter()
            .filter(|component| component.len() > 1)
            .map(|component| {
                let mut members: Vec<String> =
                    component.iter().map(|node| nodes[*node].to_string()).collect();
                members.sort();
                let chain = self.chain(&members);
                Cycle { members, chain }
            })
            .collect();
        cycles.sort_by(|a, b| a.members.cmp(&b.members));
        cycles
    }

    /// Shortest walk from the first member back to itself inside the component.
    fn chain(&self, members: &[String]) -> Vec<CycleHop> {
        let component: BTreeSet<&str> = members.iter().map(String::as_str).collect();
        let start = members[0].as_str();
        let mut previous: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue = VecDeque::from([start]);
        let mut closing = None;
        while let Some(node) = queue.pop_front() {
            for next in self.successors(node) {
                if next == start {
                    closing = Some(node);
                    break;
                }
                if component.contains(next) && !previous.contains_key(next) {
                    previous.insert(next, node);
                    queue.push_back(next);
                }
            }
            if closing.is_some() {
                break;
            }
        }

        let Some(last) = closing else {
            return Vec::new();
        };
        let mut path = vec![start, last];
        let mut cursor = last;
        while cursor != start {
            cursor = previous[cursor];
            path.push(cursor);
        }
        path.reverse();
        path.windows(2)
            .filter_map(|pair| self.hop(pair[0], pair[1]))
            .collect()
    }
}

struct Tarjan<'a> {
    adjacency: &'a [Vec<usize>],
    counter: usize,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn new(adjacency: &'a [Vec<usize>]) -> Self {
        let count = adjacency.len();
        Self {
            adjacency,
            counter: 0,
            index: vec![None; count],
            lowlink: vec![0; count],
            on_stack: vec![false; count],
            stack: Vec::new(),
            components: Vec::new(),
        }
    }

    fn visit(&mut self, node: usize) {
        self.index[node] = Some(self.counter);
        self.lowlink[node] = self.counter;
        self.counter += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        let adjacency = self.adjacency;
        for &next in &adjacency[node] {
            match self.index[next] {
                None => {
                    self.visit(next);
                    self.lowlink[node] = self.lowlink[node].min(self.lowlink[next]);
                }
                Some(next_index) if self.on_stack[next] => {
                    self.lowlink[node] = self.lowlink[node].min(next_index);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[node]) == self.index[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                component.push(member);
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

/// Cycles between packages, leaving out packages matched by `exclude`.
pub fn package_cycles(model: &Model, exclude: &[LocationMatcher]) -> Vec<Cycle> {
    let excluded = |package: &str| {
        let package = if package == UNNAMED_PACKAGE { "" } else { package };
        exclude.iter().any(|matcher| matcher.matches_package(package))
    };
    let mut graph = NodeGraph::default();
    for (_, class) in model.defined_classes() {
        let from = model.package(class.package()).name();
        if excluded(from) {
            continue;
        }
        for target in class.uses() {
            let target = model.class(*target);
            let to = model.package(target.package()).name();
            if !excluded(to) {
                graph.add_edge(from, to, class.name(), target.name());
            }
        }
    }
    graph.cycles()
}
