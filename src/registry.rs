use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::Value;

/// One segment of the namespace tree. Intermediate nodes are plain
/// containers created on demand; a node holds a value once its full
/// dotted name has been bound. A container already occupies its segment,
/// so it can never be bound itself, while a bound module may still gain
/// nested modules below it.
#[derive(Debug, Default)]
struct Node {
    value: Option<Value>,
    children: BTreeMap<String, Node>,
}

/// Storage for constructed modules, keyed by dotted name.
///
/// Entries are permanent: there is no removal.
#[derive(Debug, Default)]
pub struct Registry {
    root: Node,
    len: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under `name`, creating intermediate containers as needed.
    ///
    /// Fails when `name` is already bound or already holds nested modules.
    pub fn put(&mut self, name: &str, value: Value) -> Result<()> {
        if self.occupied(name) {
            return Err(Error::DuplicateDefinition(name.to_string()));
        }
        let mut node = &mut self.root;
        for segment in name.split('.') {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.value = Some(value);
        self.len += 1;
        Ok(())
    }

    /// Look up a bound value. Missing segments and bare containers are
    /// both reported as absent.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut node = &self.root;
        for segment in name.split('.') {
            node = node.children.get(segment)?;
        }
        node.value.as_ref()
    }

    fn occupied(&self, name: &str) -> bool {
        let mut node = &self.root;
        for segment in name.split('.') {
            match node.children.get(segment) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.value.is_some() || !node.children.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of all bound modules, in lexical tree order.
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.len);
        collect_names(&self.root, &mut String::new(), &mut names);
        names
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn collect_names(node: &Node, prefix: &mut String, names: &mut Vec<String>) {
    for (segment, child) in &node.children {
        let restore = prefix.len();
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(segment);
        if child.value.is_some() {
            names.push(prefix.clone());
        }
        collect_names(child, prefix, names);
        prefix.truncate(restore);
    }
}
