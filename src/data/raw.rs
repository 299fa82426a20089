use std::collections::BTreeMap;

/// A child group of a parsed element. Converting a document into a tree gives a lone child a
/// different shape from a repeated one; both must be handled uniformly downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn push(self, item: T) -> Self {
        match self {
            OneOrMany::One(first) => OneOrMany::Many(vec![first, item]),
            OneOrMany::Many(mut items) => {
                items.push(item);
                OneOrMany::Many(items)
            },
        }
    }

    pub fn first(&self) -> Option<&T> {
        match self {
            OneOrMany::One(item) => Some(item),
            OneOrMany::Many(items) => items.first(),
        }
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

/// Loosely typed element straight from the document: attributes plus children grouped by
/// element name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntity {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub children: BTreeMap<String, OneOrMany<RawEntity>>,
}

impl RawEntity {
    pub fn new(name: impl Into<String>) -> Self {
        RawEntity {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn add_child(&mut self, child: RawEntity) {
        let name = child.name.clone();
        let group = match self.children.remove(&name) {
            Some(existing) => existing.push(child),
            None => OneOrMany::One(child),
        };
        self.children.insert(name, group);
    }

    pub fn take_children(&mut self, name: &str) -> Vec<RawEntity> {
        self.children
            .remove(name)
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }

    /// Keeps only the allow-listed attributes and child groups.
    pub fn retain_keys(&mut self, attributes: &[&str], children: &[&str]) {
        self.attributes.retain(|key, _| attributes.contains(&key.as_str()));
        self.children.retain(|key, _| children.contains(&key.as_str()));
    }
}
