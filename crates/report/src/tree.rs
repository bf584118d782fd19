//! Stack-based traversal of untyped JSON trees. Deeply nested documents never
//! grow the native call stack.

use serde_json::{Map, Value};

/// Visits every object under `root` (including `root`) in document pre-order.
pub fn for_each_object<'a>(root: &'a Value, mut visit: impl FnMut(&'a Map<String, Value>)) {
    let mut stack: Vec<&'a Value> = vec![root];
    while let Some(node) = stack.pop() {
        match node {
            Value::Object(map) => {
                visit(map);
                stack.extend(map.values().rev());
            }
            Value::Array(items) => stack.extend(items.iter().rev()),
            _ => {}
        }
    }
}

/// Pre-order flattening of a node list where each node may carry children.
/// `children` picks a node's child list; nodes are emitted before their children.
pub fn flatten_preorder<'a, T: ?Sized>(
    roots: &[&'a T],
    mut children: impl FnMut(&'a T) -> Vec<&'a T>,
) -> Vec<&'a T> {
    let mut out = Vec::new();
    let mut stack: Vec<&'a T> = roots.iter().rev().copied().collect();
    while let Some(node) = stack.pop() {
        out.push(node);
        let mut kids = children(node);
        kids.reverse();
        stack.extend(kids);
    }
    out
}
