//! Dependency-first ordering of a directed graph.
//!
//! Depth-first search with an explicit stack of `(node, remaining edges)`
//! frames, so graph depth is bounded by memory rather than the call stack.
//! Used for policy emission order and for filter stage scheduling.

use std::collections::HashSet;
use std::hash::Hash;

/// A cycle found while ordering: the nodes on the visiting stack from the
/// first occurrence of the repeated node to the top of the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle<N> {
    pub members: Vec<N>,
}

struct Frame<N, I> {
    node: N,
    edges: I,
}

/// Order `roots` and everything reachable from them so every node comes after
/// all nodes it has edges to.
///
/// Roots are visited in the given order and edges in the order `edges`
/// yields them, so the result is deterministic. A node reachable from
/// several places is emitted once.
pub fn dependency_order<N, F, I>(roots: &[N], mut edges: F) -> Result<Vec<N>, Cycle<N>>
where
    N: Clone + Eq + Hash,
    F: FnMut(&N) -> I,
    I: IntoIterator<Item = N>,
{
    let mut ordered = Vec::new();
    let mut done: HashSet<N> = HashSet::new();
    let mut on_stack: HashSet<N> = HashSet::new();

    for root in roots {
        if done.contains(root) {
            continue;
        }
        let mut stack = vec![Frame {
            node: root.clone(),
            edges: edges(root).into_iter(),
        }];
        on_stack.insert(root.clone());

        loop {
            let next = match stack.last_mut() {
                Some(frame) => frame.edges.next(),
                None => break,
            };
            match next {
                Some(target) => {
                    if done.contains(&target) {
                        continue;
                    }
                    if on_stack.contains(&target) {
                        let start = stack
                            .iter()
                            .position(|f| f.node == target)
                            .unwrap_or(0);
                        return Err(Cycle {
                            members: stack[start..].iter().map(|f| f.node.clone()).collect(),
                        });
                    }
                    on_stack.insert(target.clone());
                    let target_edges = edges(&target).into_iter();
                    stack.push(Frame {
                        node: target,
                        edges: target_edges,
                    });
                }
                None => {
                    if let Some(frame) = stack.pop() {
                        on_stack.remove(&frame.node);
                        done.insert(frame.node.clone());
                        ordered.push(frame.node);
                    }
                }
            }
        }
    }

    Ok(ordered)
}
