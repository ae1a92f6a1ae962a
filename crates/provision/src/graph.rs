//! Dependency graph construction and validation.
//!
//! Edges come from two sources: implicit references embedded in input
//! values and explicit `depends_on` hints. An edge A -> B means B must be
//! provisioned before A. Duplicate names, dangling references and cycles
//! are declaration errors caught here, before any provisioning starts.

use crate::error::DeclarationError;
use crate::resource::ResourceDecl;
use std::collections::HashMap;

/// The derived DAG over a declaration set.
#[derive(Debug)]
pub struct DependencyGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    /// Predecessors per node (must complete first)
    deps: Vec<Vec<usize>>,
    /// Reverse edges
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build and validate the graph for a declaration set.
    pub fn build(decls: &[ResourceDecl]) -> Result<Self, DeclarationError> {
        let mut index = HashMap::with_capacity(decls.len());
        let mut names = Vec::with_capacity(decls.len());

        for decl in decls {
            if index.insert(decl.name.clone(), names.len()).is_some() {
                return Err(DeclarationError::DuplicateName {
                    name: decl.name.clone(),
                });
            }
            names.push(decl.name.clone());
        }

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); decls.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); decls.len()];

        for (node, decl) in decls.iter().enumerate() {
            for target in decl.predecessors() {
                let Some(&dep) = index.get(&target) else {
                    return Err(DeclarationError::DanglingReference {
                        resource: decl.name.clone(),
                        target,
                    });
                };
                deps[node].push(dep);
                dependents[dep].push(node);
            }
        }

        let graph = Self {
            names,
            index,
            deps,
            dependents,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// DFS with visiting/visited marking; reports the full cycle path.
    fn check_acyclic(&self) -> Result<(), DeclarationError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        let mut marks = vec![Mark::White; self.names.len()];
        let mut stack: Vec<usize> = Vec::new();

        // Iterative DFS; frame is (node, next dep index to visit).
        for root in 0..self.names.len() {
            if marks[root] != Mark::White {
                continue;
            }
            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::Gray;
            stack.push(root);

            while let Some(&mut (node, ref mut next)) = frames.last_mut() {
                if *next < self.deps[node].len() {
                    let dep = self.deps[node][*next];
                    *next += 1;
                    match marks[dep] {
                        Mark::White => {
                            marks[dep] = Mark::Gray;
                            stack.push(dep);
                            frames.push((dep, 0));
                        }
                        Mark::Gray => {
                            let start = stack
                                .iter()
                                .position(|&n| n == dep)
                                .unwrap_or(stack.len() - 1);
                            let mut members: Vec<String> = stack[start..]
                                .iter()
                                .map(|&n| self.names[n].clone())
                                .collect();
                            members.push(self.names[dep].clone());
                            return Err(DeclarationError::Cycle { members });
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks[node] = Mark::Black;
                    stack.pop();
                    frames.pop();
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, node: usize) -> &str {
        &self.names[node]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Direct predecessors of a node.
    pub fn dependencies_of(&self, node: usize) -> &[usize] {
        &self.deps[node]
    }

    /// Direct successors of a node.
    pub fn dependents_of(&self, node: usize) -> &[usize] {
        &self.dependents[node]
    }

    /// Dependency names for a node, for recording into state.
    pub fn dependency_names(&self, node: usize) -> Vec<String> {
        self.deps[node]
            .iter()
            .map(|&dep| self.names[dep].clone())
            .collect()
    }

    /// A topological order: every node appears after all its predecessors.
    /// Deterministic (Kahn's algorithm seeded in declaration order).
    pub fn topo_order(&self) -> Vec<usize> {
        let mut indegree: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut queue: std::collections::VecDeque<usize> = (0..self.names.len())
            .filter(|&n| indegree[n] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.names.len());

        while let Some(node) = queue.pop_front() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        debug_assert_eq!(order.len(), self.names.len());
        order
    }
}
