use std::{
    collections::{HashMap, VecDeque},
    fmt::Debug,
    hash::Hash,
};

use crate::error::ConfigError;

/// Compute topological order of nodes using BFS.
///
/// Return node list in order and their levels. Nodes on a cycle never reach
/// in-degree zero, which is reported as [`ConfigError::CyclicTopology`].
pub fn topo<Node: Copy + Eq + Hash + Debug>(
    nodes: impl Iterator<Item = Node> + Clone,
    edges: impl Iterator<Item = (Node, Node)> + Clone,
) -> Result<Vec<(Node, i32)>, ConfigError> {
    let mut degree_level: HashMap<Node, (i32, i32)> = HashMap::default();
    for (_, to) in edges.clone() {
        let entry = degree_level.entry(to).or_default();
        entry.0 += 1;
    }
    let mut que: VecDeque<Node> = VecDeque::new();
    let mut levels = Vec::new();
    for node in nodes {
        if degree_level.get(&node).cloned().unwrap_or_default().0 == 0 {
            que.push_back(node)
        }
    }
    while let Some(head) = que.pop_front() {
        let level = degree_level.remove(&head).map(|o| o.1).unwrap_or(0);
        levels.push((head, level));
        for (from, to) in edges.clone() {
            if from == head {
                if let Some(entry) = degree_level.get_mut(&to) {
                    entry.0 -= 1;
                    entry.1 = entry.1.max(level + 1);
                    if entry.0 == 0 {
                        que.push_back(to);
                    }
                }
            }
        }
    }

    if !degree_level.is_empty() {
        tracing::error!("not a DAG, remaining degrees: {:?}", degree_level);
        return Err(ConfigError::CyclicTopology);
    }

    Ok(levels)
}

/// Evaluation order of the components of a fabric.
///
/// `edges` go from the component driving the request half of a channel to
/// the component driving its response half, i.e. in the direction requests
/// travel. Components sharing a level are independent of each other.
#[derive(Debug, Default, Clone)]
pub struct PropOrder {
    pub(crate) order: Vec<usize>,
}

impl PropOrder {
    pub fn build(n: usize, edges: &[(usize, usize)]) -> Result<Self, ConfigError> {
        let mut levels = topo(0..n, edges.iter().copied())?;
        // deterministic order within a level
        levels.sort_by_key(|&(node, level)| (level, node));
        Ok(Self {
            order: levels.into_iter().map(|(node, _)| node).collect(),
        })
    }

    /// Request direction: initiators first.
    pub fn forward(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().copied()
    }

    /// Response direction: targets first.
    pub fn backward(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().rev().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topo_levels() {
        let edges = [(0, 2), (1, 2), (2, 3)];
        let levels = topo(0..4, edges.iter().copied()).unwrap();
        let level_of = |n| levels.iter().find(|(x, _)| *x == n).unwrap().1;
        assert_eq!(level_of(0), 0);
        assert_eq!(level_of(1), 0);
        assert_eq!(level_of(2), 1);
        assert_eq!(level_of(3), 2);
    }

    #[test]
    fn test_cycle_rejected() {
        let edges = [(0, 1), (1, 0)];
        assert_eq!(
            PropOrder::build(2, &edges).unwrap_err(),
            ConfigError::CyclicTopology
        );
    }

    #[test]
    fn test_order_directions() {
        let order = PropOrder::build(3, &[(2, 1), (1, 0)]).unwrap();
        assert_eq!(order.forward().collect::<Vec<_>>(), vec![2, 1, 0]);
        assert_eq!(order.backward().collect::<Vec<_>>(), vec![0, 1, 2]);
    }
}
