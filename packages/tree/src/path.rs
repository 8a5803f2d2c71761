/// Position of a node in the local tree, one segment per level
pub type Path = Vec<usize>;

/// Segment of the text run inside every element
pub const TEXT_SLOT: usize = 0;

/// Segment addressing element child `index`
pub fn child_segment(index: usize) -> usize {
    index + 1
}

/// Element child index for a segment, `None` for the text slot
pub fn child_index(segment: usize) -> Option<usize> {
    segment.checked_sub(1)
}

pub fn child_path(parent: &[usize], index: usize) -> Path {
    let mut path = parent.to_vec();
    path.push(child_segment(index));
    path
}

pub fn text_path(element: &[usize]) -> Path {
    let mut path = element.to_vec();
    path.push(TEXT_SLOT);
    path
}

/// Parent path and child index of an element path
pub fn parent_and_index(path: &[usize]) -> Option<(&[usize], usize)> {
    let (last, parent) = path.split_last()?;
    Some((parent, child_index(*last)?))
}

/// True when `ancestor` is a strict prefix of `path`
pub fn is_ancestor(ancestor: &[usize], path: &[usize]) -> bool {
    ancestor.len() < path.len() && path.starts_with(ancestor)
}
