use crate::{child_segment, text_path, ElementNode, LocalTree, TextRun};

/// Read-only walk over the local tree.
///
/// The default methods walk the whole tree. Override a `visit_*` method to
/// act on a node, and call the matching `walk_*` function to keep descending.
pub trait Visitor: Sized {
    fn visit_element(&mut self, node: &ElementNode, path: &[usize]) {
        walk_element(self, node, path);
    }

    fn visit_text(&mut self, _owner: &ElementNode, _text: &TextRun, _path: &[usize]) {
        // Leaf, nothing to walk
    }
}

pub fn walk_tree<V: Visitor>(visitor: &mut V, tree: &LocalTree) {
    visitor.visit_element(tree.root(), &[]);
}

pub fn walk_element<V: Visitor>(visitor: &mut V, node: &ElementNode, path: &[usize]) {
    visitor.visit_text(node, &node.text, &text_path(path));

    let mut child_path = path.to_vec();
    child_path.push(0);
    for (i, child) in node.children.iter().enumerate() {
        if let Some(last) = child_path.last_mut() {
            *last = child_segment(i);
        }
        visitor.visit_element(child, &child_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::fixtures::{element, paragraph, with_children};
    use blocksync_schema::BlockType;

    struct Collect(Vec<(String, Vec<usize>)>);

    impl Visitor for Collect {
        fn visit_element(&mut self, node: &ElementNode, path: &[usize]) {
            self.0.push((node.block_id.to_string(), path.to_vec()));
            walk_element(self, node, path);
        }

        fn visit_text(&mut self, owner: &ElementNode, _text: &TextRun, path: &[usize]) {
            self.0.push((format!("{}#text", owner.block_id), path.to_vec()));
        }
    }

    #[test]
    fn test_walk_visits_text_before_children() {
        let tree = LocalTree::new(with_children(
            element("page", BlockType::Page, ""),
            vec![with_children(paragraph("a", "x"), vec![paragraph("b", "y")])],
        ));
        let mut collect = Collect(Vec::new());
        walk_tree(&mut collect, &tree);

        let seen: Vec<_> = collect.0.iter().map(|(id, path)| (id.as_str(), path.clone())).collect();
        assert_eq!(
            seen,
            vec![
                ("page", vec![]),
                ("page#text", vec![0]),
                ("a", vec![1]),
                ("a#text", vec![1, 0]),
                ("b", vec![1, 1]),
                ("b#text", vec![1, 1, 0]),
            ]
        );
    }
}
