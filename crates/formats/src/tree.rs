// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/tree.rs
//
// The key/value tree a file stores: arrays plus arbitrary YAML metadata.

use anyhow::{Context, Result};
use serde_yaml::Value;

use crate::array::NdArray;

/// One value inside a [`Tree`].
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Array(NdArray),
    /// Any plain YAML value, including tagged values this crate does not interpret.
    Scalar(Value),
    Mapping(Tree),
    Sequence(Vec<Node>),
}

impl Node {
    pub fn as_array(&self) -> Option<&NdArray> {
        match self {
            Node::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Node::Mapping(t) => Some(t),
            _ => None,
        }
    }
}

impl From<NdArray> for Node {
    fn from(array: NdArray) -> Self {
        Node::Array(array)
    }
}

impl From<Tree> for Node {
    fn from(tree: Tree) -> Self {
        Node::Mapping(tree)
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::Scalar(value)
    }
}

/// String-keyed mapping that remembers insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tree {
    entries: Vec<(String, Node)>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `node` under `key`, returning the node it replaced.
    pub fn insert(&mut self, key: impl Into<String>, node: impl Into<Node>) -> Option<Node> {
        let key = key.into();
        let node = node.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, node)),
            None => {
                self.entries.push((key, node));
                None
            }
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, node: impl Into<Node>) -> Self {
        self.insert(key, node);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, n)| n)
    }

    pub fn remove(&mut self, key: &str) -> Option<Node> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Look up the array stored under `key`.
    pub fn array(&self, key: &str) -> Result<&NdArray> {
        self.get(key)
            .with_context(|| format!("Tree has no entry '{}'", key))?
            .as_array()
            .with_context(|| format!("Tree entry '{}' is not an array", key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(k, n)| (k.as_str(), n))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every array in the tree with its `/`-separated path, depth first.
    /// Sequence items are addressed by their index.
    pub fn arrays(&self) -> Vec<(String, &NdArray)> {
        let mut found = Vec::new();
        for (key, node) in self.iter() {
            collect_arrays(key.to_string(), node, &mut found);
        }
        found
    }
}

fn collect_arrays<'a>(path: String, node: &'a Node, found: &mut Vec<(String, &'a NdArray)>) {
    match node {
        Node::Array(a) => found.push((path, a)),
        Node::Mapping(tree) => {
            for (key, child) in tree.iter() {
                collect_arrays(format!("{}/{}", path, key), child, found);
            }
        }
        Node::Sequence(items) => {
            for (i, child) in items.iter().enumerate() {
                collect_arrays(format!("{}/{}", path, i), child, found);
            }
        }
        Node::Scalar(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::MemoryOrder;

    fn small() -> NdArray {
        NdArray::from_shape_vec(&[2], vec![1u8, 2], MemoryOrder::C).unwrap()
    }

    #[test]
    fn insert_replaces_and_keeps_order() {
        let mut tree = Tree::new()
            .with("b", Value::from(1))
            .with("a", small());
        let old = tree.insert("b", Value::from(2));
        assert_eq!(old, Some(Node::Scalar(Value::from(1))));
        assert_eq!(tree.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn array_lookup_errors_are_descriptive() {
        let tree = Tree::new().with("meta", Value::from("x"));
        assert!(tree.array("missing").unwrap_err().to_string().contains("no entry"));
        assert!(tree.array("meta").unwrap_err().to_string().contains("not an array"));
    }

    #[test]
    fn arrays_walks_nested_nodes() {
        let inner = Tree::new().with("x", small());
        let tree = Tree::new()
            .with("top", small())
            .with("group", inner)
            .with("list", Node::Sequence(vec![Node::Scalar(Value::Null), small().into()]));
        let paths: Vec<String> = tree.arrays().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["top", "group/x", "list/1"]);
    }
}
