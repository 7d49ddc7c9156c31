//! Property path addressing inside a scope's value tree.
//!
//! Paths use dots for object keys and brackets for array indices:
//! `foo.bar`, `foo[1]`, `foo[1].bar`, `foo["with.dot"]`.

use crate::{ContextError, ContextResult};
use serde_json::{Map, Value};
use std::fmt;

/// The decoded contents of one scope's backing file.
pub type Tree = Map<String, Value>;

/// A single step of a property path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object key.
    Key(String),
    /// Zero-based array index.
    Index(usize),
}

/// A parsed property path.
///
/// The first step is always an object key, since a value tree is a mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    root: String,
    segments: Vec<Segment>,
}

impl PropertyPath {
    /// Parse a property path string.
    pub fn parse(path: &str) -> ContextResult<Self> {
        if path.is_empty() {
            return Err(ContextError::invalid_path(path, "path is empty"));
        }

        let mut keys = Vec::new();
        let mut rest = path;
        loop {
            let end = rest.find(|c: char| c == '.' || c == '[').unwrap_or(rest.len());
            keys.push(Segment::Key(parse_key(path, &rest[..end])?));
            rest = &rest[end..];

            while let Some(inner) = rest.strip_prefix('[') {
                let close = inner
                    .find(']')
                    .ok_or_else(|| ContextError::invalid_path(path, "unterminated '['"))?;
                keys.push(parse_bracket(path, &inner[..close])?);
                rest = &inner[close + 1..];
            }

            if rest.is_empty() {
                break;
            }
            rest = rest
                .strip_prefix('.')
                .ok_or_else(|| ContextError::invalid_path(path, "expected '.' or '['"))?;
        }

        let mut segments = keys.into_iter();
        let root = match segments.next() {
            Some(Segment::Key(key)) => key,
            _ => return Err(ContextError::invalid_path(path, "path must start with a key")),
        };
        Ok(Self {
            root,
            segments: segments.collect(),
        })
    }

    /// The top-level property this path lives under.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Steps below the top-level property.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for segment in &self.segments {
            match segment {
                Segment::Key(key) if key.contains('.') || key.contains('[') => {
                    write!(f, "[{:?}]", key)?
                }
                Segment::Key(key) => write!(f, ".{}", key)?,
                Segment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

fn parse_key(path: &str, key: &str) -> ContextResult<String> {
    if key.is_empty() {
        return Err(ContextError::invalid_path(path, "empty segment"));
    }
    if key.chars().any(|c| c.is_whitespace() || c == ']') {
        return Err(ContextError::invalid_path(
            path,
            "segment contains whitespace or ']'",
        ));
    }
    Ok(key.to_string())
}

fn parse_bracket(path: &str, inner: &str) -> ContextResult<Segment> {
    if !inner.is_empty() && inner.bytes().all(|b| b.is_ascii_digit()) {
        return inner
            .parse()
            .map(Segment::Index)
            .map_err(|_| ContextError::invalid_path(path, "index out of range"));
    }

    let quoted = ['"', '\''].iter().find_map(|q| {
        inner
            .strip_prefix(*q)
            .and_then(|s| s.strip_suffix(*q))
    });
    match quoted {
        Some(key) if inner.len() >= 2 => {
            if key.trim().is_empty() || key.chars().any(char::is_whitespace) {
                return Err(ContextError::invalid_path(path, "empty segment"));
            }
            Ok(Segment::Key(key.to_string()))
        }
        _ => Err(ContextError::invalid_path(
            path,
            "brackets must hold an index or a quoted key",
        )),
    }
}

/// Largest number of `null`s an assignment may pad an array with.
pub const MAX_INDEX_GAP: usize = 1024;

/// Look up the value at `path`. A missing step anywhere yields `None`.
pub fn get<'a>(tree: &'a Tree, path: &PropertyPath) -> Option<&'a Value> {
    let mut current = tree.get(&path.root)?;
    for segment in &path.segments {
        current = step(current, segment)?;
    }
    Some(current)
}

fn step<'a>(node: &'a Value, segment: &Segment) -> Option<&'a Value> {
    match (segment, node) {
        (Segment::Key(key), Value::Object(map)) => map.get(key),
        (Segment::Index(index), Value::Array(items)) => items.get(*index),
        (Segment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
        _ => None,
    }
}

/// Store `value` at `path`, or delete it when `value` is `None`.
///
/// Missing intermediate objects and arrays are created. Deleting prunes every
/// ancestor left empty by the removal, up to but excluding the tree itself.
/// Returns `false` only for a delete that found nothing to remove.
///
/// An index more than [`MAX_INDEX_GAP`] past the end of its array is an
/// `InvalidPath` error, and the tree is left untouched.
pub fn set(tree: &mut Tree, path: &PropertyPath, value: Option<Value>) -> ContextResult<bool> {
    match value {
        Some(value) => {
            check_gaps(tree, path)?;
            assign(tree, path, value);
            Ok(true)
        }
        None => Ok(remove(tree, path)),
    }
}

/// Walk `path` read-only and reject any index that would pad too far.
fn check_gaps(tree: &Tree, path: &PropertyPath) -> ContextResult<()> {
    let mut current = tree.get(&path.root);
    for segment in &path.segments {
        if let Segment::Index(index) = segment {
            let len = match current {
                Some(Value::Object(_)) => None,
                Some(Value::Array(items)) => Some(items.len()),
                _ => Some(0),
            };
            let limit = len.and_then(|len| len.checked_add(MAX_INDEX_GAP));
            if limit.is_some_and(|limit| *index > limit) {
                return Err(ContextError::invalid_path(
                    path.to_string(),
                    "index too far past the end of the array",
                ));
            }
        }
        current = current.and_then(|node| step(node, segment));
    }
    Ok(())
}

fn assign(tree: &mut Tree, path: &PropertyPath, value: Value) {
    let slot = tree.entry(path.root.clone()).or_insert(Value::Null);
    let target = path
        .segments
        .iter()
        .fold(slot, |node, segment| descend(node, segment));
    *target = value;
}

fn descend<'a>(node: &'a mut Value, segment: &Segment) -> &'a mut Value {
    match segment {
        Segment::Key(key) => object_slot(node, key.clone()),
        Segment::Index(index) if node.is_object() => object_slot(node, index.to_string()),
        Segment::Index(index) => array_slot(node, *index),
    }
}

fn object_slot(node: &mut Value, key: String) -> &mut Value {
    match node {
        Value::Object(map) => map.entry(key).or_insert(Value::Null),
        _ => {
            *node = Value::Object(Map::new());
            object_slot(node, key)
        }
    }
}

/// `index` has already been bounded by `check_gaps`.
fn array_slot(node: &mut Value, index: usize) -> &mut Value {
    match node {
        Value::Array(items) => {
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            &mut items[index]
        }
        _ => {
            *node = Value::Array(Vec::new());
            array_slot(node, index)
        }
    }
}

/// Returns whether anything was removed.
fn remove(tree: &mut Tree, path: &PropertyPath) -> bool {
    if path.segments.is_empty() {
        return tree.shift_remove(&path.root).is_some();
    }
    let Some(child) = tree.get_mut(&path.root) else {
        return false;
    };
    let removed = remove_below(child, &path.segments);
    if removed && is_empty_container(child) {
        tree.shift_remove(&path.root);
    }
    removed
}

fn remove_below(node: &mut Value, segments: &[Segment]) -> bool {
    let Some((segment, rest)) = segments.split_first() else {
        return false;
    };
    if rest.is_empty() {
        return remove_child(node, segment);
    }
    let Some(child) = child_mut(node, segment) else {
        return false;
    };
    let removed = remove_below(child, rest);
    if removed && is_empty_container(child) {
        remove_child(node, segment);
    }
    removed
}

fn child_mut<'a>(node: &'a mut Value, segment: &Segment) -> Option<&'a mut Value> {
    match (segment, node) {
        (Segment::Key(key), Value::Object(map)) => map.get_mut(key),
        (Segment::Index(index), Value::Array(items)) => items.get_mut(*index),
        (Segment::Index(index), Value::Object(map)) => map.get_mut(&index.to_string()),
        _ => None,
    }
}

fn remove_child(node: &mut Value, segment: &Segment) -> bool {
    match (segment, node) {
        (Segment::Key(key), Value::Object(map)) => map.shift_remove(key).is_some(),
        (Segment::Index(index), Value::Object(map)) => {
            map.shift_remove(&index.to_string()).is_some()
        }
        (Segment::Index(index), Value::Array(items)) if *index < items.len() => {
            items.remove(*index);
            true
        }
        _ => false,
    }
}

fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
