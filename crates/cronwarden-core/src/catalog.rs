//! The validated, immutable set of job definitions.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::CatalogError;
use crate::types::JobDefinition;

/// Every job definition loaded at startup, validated once.
///
/// Loading either yields a complete catalog or fails; a partially valid
/// document never produces a catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    jobs: Vec<JobDefinition>,
    index: HashMap<String, usize>,
    /// Indices into `jobs`, dependencies before dependents.
    startup_order: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

impl Catalog {
    pub fn load(definitions: Vec<JobDefinition>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(definitions.len());
        let mut jobs = Vec::with_capacity(definitions.len());

        for mut def in definitions {
            if def.name.trim().is_empty() {
                return Err(CatalogError::EmptyName);
            }
            if index.contains_key(&def.name) {
                return Err(CatalogError::DuplicateName { name: def.name });
            }
            let mut seen = HashSet::new();
            def.depends_on.retain(|d| seen.insert(d.clone()));
            index.insert(def.name.clone(), jobs.len());
            jobs.push(def);
        }

        for def in &jobs {
            if let Some(missing) = def.depends_on.iter().find(|d| !index.contains_key(*d)) {
                return Err(CatalogError::UnknownDependency {
                    job: def.name.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        // Adjacency by index: dependent -> its dependencies.
        let edges: Vec<Vec<usize>> = jobs
            .iter()
            .map(|def| def.depends_on.iter().map(|d| index[d]).collect())
            .collect();

        let mut marks = vec![Mark::Unvisited; jobs.len()];
        let mut stack = Vec::new();
        let mut startup_order = Vec::with_capacity(jobs.len());
        for root in 0..jobs.len() {
            visit(root, &edges, &mut marks, &mut stack, &mut startup_order).map_err(|cycle| {
                CatalogError::DependencyCycle {
                    path: cycle.into_iter().map(|i| jobs[i].name.clone()).collect(),
                }
            })?;
        }

        debug!(jobs = jobs.len(), "job catalog loaded");
        Ok(Self {
            jobs,
            index,
            startup_order,
        })
    }

    pub fn get(&self, name: &str) -> Option<&JobDefinition> {
        self.index.get(name).map(|&i| &self.jobs[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Definitions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.iter()
    }

    /// Definitions ordered so every job follows all of its dependencies.
    pub fn startup_order(&self) -> impl Iterator<Item = &JobDefinition> {
        self.startup_order.iter().map(|&i| &self.jobs[i])
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Depth-first walk with an on-stack marker. A back-edge to a node still on
/// the stack is a cycle; the returned path runs from that node back to itself.
fn visit(
    node: usize,
    edges: &[Vec<usize>],
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<(), Vec<usize>> {
    match marks[node] {
        Mark::Done => return Ok(()),
        Mark::OnStack => {
            let from = stack.iter().position(|&n| n == node).unwrap_or(0);
            let mut cycle = stack[from..].to_vec();
            cycle.push(node);
            return Err(cycle);
        }
        Mark::Unvisited => {}
    }

    marks[node] = Mark::OnStack;
    stack.push(node);
    for &dep in &edges[node] {
        visit(dep, edges, marks, stack, order)?;
    }
    stack.pop();
    marks[node] = Mark::Done;
    order.push(node);
    Ok(())
}
