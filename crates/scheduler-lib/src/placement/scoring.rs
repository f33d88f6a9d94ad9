use crate::models::{NodeState, Resources};
use std::cmp::Ordering;

/// Smaller of the CPU and memory fractions left free after placing `request`
///
/// Each fraction is `(available - request) / allocatable`. A node with no
/// allocatable capacity in some resource scores zero.
pub fn headroom(node: &NodeState, request: &Resources) -> f64 {
    let fraction = |available: u64, requested: u64, allocatable: u64| {
        if allocatable == 0 {
            return 0.0;
        }
        (available as f64 - requested as f64) / allocatable as f64
    };
    let cpu = fraction(
        node.available.cpu_millis,
        request.cpu_millis,
        node.allocatable.cpu_millis,
    );
    let ram = fraction(
        node.available.memory_bytes,
        request.memory_bytes,
        node.allocatable.memory_bytes,
    );
    cpu.min(ram)
}

/// A feasible node scored for one labelled task
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<'a> {
    pub node: &'a str,
    /// Label distance to the task, `u32::MAX` for unlabelled nodes
    pub distance: u32,
    pub speed: f64,
    pub headroom: f64,
}

/// Order candidates best first
///
/// Lower label distance wins, then higher speed, then higher headroom.
/// Node name makes the order total.
pub fn compare_candidates(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    a.distance
        .cmp(&b.distance)
        .then_with(|| b.speed.total_cmp(&a.speed))
        .then_with(|| b.headroom.total_cmp(&a.headroom))
        .then_with(|| a.node.cmp(b.node))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headroom_takes_tighter_resource() {
        let node = NodeState::new(
            "a",
            Resources::new(3000, 2000),
            Resources::new(4000, 4000),
        );
        // cpu (3000 - 1000) / 4000 = 0.5, ram (2000 - 1000) / 4000 = 0.25
        assert_eq!(headroom(&node, &Resources::new(1000, 1000)), 0.25);

        let empty = NodeState::new("b", Resources::default(), Resources::default());
        assert_eq!(headroom(&empty, &Resources::default()), 0.0);
    }

    #[test]
    fn test_compare_tiers() {
        let base = Candidate {
            node: "a",
            distance: 1,
            speed: 2.0,
            headroom: 0.5,
        };
        let closer = Candidate {
            node: "b",
            distance: 0,
            speed: 0.0,
            headroom: 0.0,
        };
        assert_eq!(compare_candidates(&closer, &base), Ordering::Less);

        let faster = Candidate {
            node: "b",
            speed: 3.0,
            headroom: 0.0,
            ..base.clone()
        };
        assert_eq!(compare_candidates(&faster, &base), Ordering::Less);

        let roomier = Candidate {
            node: "b",
            headroom: 0.9,
            ..base.clone()
        };
        assert_eq!(compare_candidates(&roomier, &base), Ordering::Less);

        let same = Candidate {
            node: "b",
            ..base.clone()
        };
        assert_eq!(compare_candidates(&base, &same), Ordering::Less);
    }
}
