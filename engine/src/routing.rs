use std::collections::HashSet;
use std::hash::Hash;

/// Whether adding the edge `from -> to` closes a cycle, given the existing
/// edges reported by `neighbors` (node -> nodes it feeds).
pub fn would_create_cycle<Node, Neighbors, Iter>(
    from: &Node,
    to: &Node,
    mut neighbors: Neighbors,
) -> bool
where
    Node: Clone + Eq + Hash,
    Neighbors: FnMut(&Node) -> Iter,
    Iter: IntoIterator<Item = Node>,
{
    if from == to {
        return true;
    }
    has_path(to, from, &mut neighbors)
}

/// Depth-first search from `start`, true if `target` is reachable.
pub fn has_path<Node, Neighbors, Iter>(start: &Node, target: &Node, neighbors: &mut Neighbors) -> bool
where
    Node: Clone + Eq + Hash,
    Neighbors: FnMut(&Node) -> Iter,
    Iter: IntoIterator<Item = Node>,
{
    let mut visited = HashSet::new();
    let mut pending = vec![start.clone()];
    while let Some(current) = pending.pop() {
        if &current == target {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        pending.extend(neighbors(&current));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::would_create_cycle;
    use std::collections::HashMap;

    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    enum Node {
        Inlet,
        Synth,
        Delay,
        Chain,
    }

    #[test]
    fn detects_feedback_into_chain_member() {
        let graph = HashMap::from([
            (Node::Inlet, vec![Node::Synth]),
            (Node::Synth, vec![Node::Delay]),
            (Node::Delay, vec![Node::Chain]),
            (Node::Chain, vec![]),
        ]);

        assert!(would_create_cycle(&Node::Chain, &Node::Synth, |node| {
            graph.get(node).cloned().unwrap_or_default()
        }));
    }

    #[test]
    fn detects_self_connection() {
        assert!(would_create_cycle(&7_u64, &7_u64, |_| Vec::new()));
    }

    #[test]
    fn allows_parallel_edge() {
        let graph = HashMap::from([
            (1_u64, vec![2_u64, 3]),
            (2, vec![4]),
            (3, vec![4]),
            (4, vec![]),
        ]);

        assert!(!would_create_cycle(&2, &3, |node| {
            graph.get(node).cloned().unwrap_or_default()
        }));
    }
}
