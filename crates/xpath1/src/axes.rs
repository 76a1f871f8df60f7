//! Contains pure functions for collecting nodes along each XPath axis.
//!
//! Every collector returns nodes in axis order: document order for forward
//! axes, nearest-first for reverse axes. Proximity positions in predicates
//! depend on this.

use crate::ast::Axis;
use crate::datasource::{DataSourceNode, NodeType};

/// Collects the nodes reachable from `node` along `axis`.
pub fn collect<'a, N: DataSourceNode<'a>>(axis: Axis, node: N) -> Vec<N> {
    let mut results = Vec::new();
    match axis {
        Axis::Child => results.extend(node.children()),
        Axis::Attribute => results.extend(node.attributes()),
        Axis::SelfAxis => results.push(node),
        Axis::Parent => results.extend(node.parent()),
        Axis::Descendant => collect_descendants(node, &mut results),
        Axis::DescendantOrSelf => {
            results.push(node);
            collect_descendants(node, &mut results);
        }
        Axis::Ancestor => collect_ancestors(node, &mut results),
        Axis::AncestorOrSelf => {
            results.push(node);
            collect_ancestors(node, &mut results);
        }
        Axis::FollowingSibling => collect_following_siblings(node, &mut results),
        Axis::PrecedingSibling => collect_preceding_siblings(node, &mut results),
        Axis::Following => collect_following(node, &mut results),
        Axis::Preceding => collect_preceding(node, &mut results),
    }
    results
}

/// Pre-order traversal of the subtree below `node`, excluding attributes.
pub fn collect_descendants<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    let mut stack: Vec<N> = node.children().collect();
    stack.reverse();
    while let Some(current) = stack.pop() {
        results.push(current);
        let mut children: Vec<N> = current.children().collect();
        children.reverse();
        stack.extend(children);
    }
}

pub fn collect_ancestors<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    let mut current = node.parent();
    while let Some(p) = current {
        results.push(p);
        current = p.parent();
    }
}

fn is_attribute<'a, N: DataSourceNode<'a>>(node: &N) -> bool {
    node.node_type() == NodeType::Attribute
}

pub fn collect_following_siblings<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    if is_attribute(&node) {
        return;
    }
    if let Some(parent) = node.parent() {
        results.extend(parent.children().skip_while(|s| *s != node).skip(1));
    }
}

pub fn collect_preceding_siblings<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    if is_attribute(&node) {
        return;
    }
    if let Some(parent) = node.parent() {
        let before: Vec<N> = parent.children().take_while(|s| *s != node).collect();
        results.extend(before.into_iter().rev());
    }
}

pub fn collect_following<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    // An attribute's following nodes start after its owner element's start tag,
    // which includes the owner's children.
    let mut current = node;
    if is_attribute(&node) {
        if let Some(owner) = node.parent() {
            collect_descendants(owner, results);
            current = owner;
        }
    }
    loop {
        let Some(parent) = current.parent() else { break };
        for sibling in parent.children().skip_while(|s| *s != current).skip(1) {
            results.push(sibling);
            collect_descendants(sibling, results);
        }
        current = parent;
    }
}

pub fn collect_preceding<'a, N: DataSourceNode<'a>>(node: N, results: &mut Vec<N>) {
    let mut current = if is_attribute(&node) {
        match node.parent() {
            Some(owner) => owner,
            None => return,
        }
    } else {
        node
    };
    loop {
        let Some(parent) = current.parent() else { break };
        let before: Vec<N> = parent.children().take_while(|s| *s != current).collect();
        for sibling in before.into_iter().rev() {
            let mut subtree = vec![sibling];
            collect_descendants(sibling, &mut subtree);
            results.extend(subtree.into_iter().rev());
        }
        current = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::create_test_tree;

    #[test]
    fn test_collect_child() {
        let tree = create_test_tree();
        let children = collect(Axis::Child, tree.node(0));
        let ids: Vec<usize> = children.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 8, 5, 9, 6]);
    }

    #[test]
    fn test_collect_ancestor_is_nearest_first() {
        let tree = create_test_tree();
        let ancestors = collect(Axis::Ancestor, tree.node(4));
        assert_eq!(ancestors, vec![tree.node(1), tree.node(0)]);

        let with_self = collect(Axis::AncestorOrSelf, tree.node(4));
        assert_eq!(with_self.len(), 3);
        assert_eq!(with_self[0], tree.node(4));
    }

    #[test]
    fn test_collect_descendant_in_document_order() {
        let tree = create_test_tree();
        let ids: Vec<usize> = collect(Axis::Descendant, tree.node(0))
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec![1, 4, 8, 5, 9, 6, 7]);
        let mut sorted = collect(Axis::Descendant, tree.node(0));
        sorted.sort();
        assert_eq!(sorted, collect(Axis::Descendant, tree.node(0)));
    }

    #[test]
    fn test_collect_siblings() {
        let tree = create_test_tree();
        let following: Vec<usize> = collect(Axis::FollowingSibling, tree.node(1))
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(following, vec![8, 5, 9, 6]);

        let preceding: Vec<usize> = collect(Axis::PrecedingSibling, tree.node(6))
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(preceding, vec![9, 5, 8, 1]);
    }

    #[test]
    fn test_attributes_have_no_siblings() {
        let tree = create_test_tree();
        assert!(collect(Axis::FollowingSibling, tree.node(2)).is_empty());
        assert!(collect(Axis::PrecedingSibling, tree.node(3)).is_empty());
    }

    #[test]
    fn test_collect_following_preceding() {
        let tree = create_test_tree();
        let following: Vec<usize> = collect(Axis::Following, tree.node(4))
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(following, vec![8, 5, 9, 6, 7]);

        let preceding: Vec<usize> = collect(Axis::Preceding, tree.node(5))
            .iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(preceding, vec![8, 4, 1]);
    }
}
