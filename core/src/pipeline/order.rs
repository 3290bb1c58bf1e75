//! Stable topological ordering of filter-sets

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Sort `nodes` so that for every edge `(a, b)`, `a` precedes `b`.
///
/// Nodes are registration indices; among nodes with no remaining
/// predecessors the lowest index goes first. Edges naming nodes outside
/// `nodes` are ignored. On a cycle, returns the nodes that could not be
/// placed, in index order.
pub(crate) fn sort(nodes: &[usize], edges: &[(usize, usize)]) -> Result<Vec<usize>, Vec<usize>> {
    let present: HashSet<usize> = nodes.iter().copied().collect();
    let mut indegree: HashMap<usize, usize> = nodes.iter().map(|n| (*n, 0)).collect();
    let mut successors: HashMap<usize, Vec<usize>> = HashMap::new();

    let mut seen = HashSet::new();
    for &(a, b) in edges {
        if a == b || !present.contains(&a) || !present.contains(&b) || !seen.insert((a, b)) {
            continue;
        }
        successors.entry(a).or_default().push(b);
        *indegree.entry(b).or_default() += 1;
    }

    let mut ready: BinaryHeap<Reverse<usize>> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| Reverse(*n))
        .collect();
    let mut sorted = Vec::with_capacity(nodes.len());

    while let Some(Reverse(n)) = ready.pop() {
        sorted.push(n);
        for s in successors.get(&n).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(s) {
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse(*s));
                }
            }
        }
    }

    if sorted.len() == indegree.len() {
        Ok(sorted)
    } else {
        let placed: HashSet<usize> = sorted.into_iter().collect();
        let mut stuck: Vec<usize> = indegree.into_keys().filter(|n| !placed.contains(n)).collect();
        stuck.sort_unstable();
        Err(stuck)
    }
}

/// Like [`sort`], but keeps the relative order of `previous` where the
/// constraints allow it.
pub(crate) fn sort_preserving(
    nodes: &[usize],
    edges: &[(usize, usize)],
    previous: &[usize],
) -> Result<Vec<usize>, Vec<usize>> {
    if previous.len() > 1 {
        let mut with_previous = edges.to_vec();
        with_previous.extend(previous.windows(2).map(|w| (w[0], w[1])));
        if let Ok(order) = sort(nodes, &with_previous) {
            return Ok(order);
        }
    }
    sort(nodes, edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ties_broken_by_registration() {
        assert_eq!(sort(&[2, 0, 1], &[]), Ok(vec![0, 1, 2]));
    }

    #[test]
    fn test_constraints_override_registration() {
        // 2 must run before 0
        assert_eq!(sort(&[0, 1, 2], &[(2, 0)]), Ok(vec![1, 2, 0]));
    }

    #[test]
    fn test_absent_nodes_ignored() {
        assert_eq!(sort(&[0, 1], &[(1, 0), (5, 1), (0, 7)]), Ok(vec![1, 0]));
    }

    #[test]
    fn test_cycle_reported() {
        assert_eq!(sort(&[0, 1, 2, 3], &[(1, 2), (2, 3), (3, 1)]), Err(vec![1, 2, 3]));
    }

    #[test]
    fn test_previous_order_kept() {
        // Without the previous order, 1 would sort before 2.
        assert_eq!(sort_preserving(&[1, 2, 3], &[], &[2, 1]), Ok(vec![2, 1, 3]));
        // A real constraint wins over the previous order.
        assert_eq!(sort_preserving(&[1, 2], &[(1, 2)], &[2, 1]), Ok(vec![1, 2]));
    }
}
