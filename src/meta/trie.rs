//! In-memory prefix index over metadata keys.
//!
//! A plain character trie: every key ever put into the store is inserted,
//! removals prune empty branches.  Shared by all [`MetaStore`]
//! (crate::meta::MetaStore) handles derived from the same root and mutated
//! under their common lock.

use std::collections::HashMap;

#[derive(Debug, Default)]
struct Node {
    children: HashMap<char, Node>,
    terminal: bool,
}

impl Node {
    fn collect(&self, prefix: &mut String, out: &mut Vec<String>) {
        if self.terminal {
            out.push(prefix.clone());
        }
        for (ch, child) in &self.children {
            prefix.push(*ch);
            child.collect(prefix, out);
            prefix.pop();
        }
    }
}

/// Prefix index over string keys.
#[derive(Debug, Default)]
pub struct Trie {
    root: Node,
}

impl Trie {
    /// Empty trie.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key.  Idempotent.
    pub fn insert(&mut self, key: &str) {
        let mut node = &mut self.root;
        for ch in key.chars() {
            node = node.children.entry(ch).or_default();
        }
        node.terminal = true;
    }

    /// Remove a key, pruning branches left empty.  Returns whether the key
    /// was present.
    pub fn remove(&mut self, key: &str) -> bool {
        fn walk(node: &mut Node, key: &[char]) -> (bool, bool) {
            match key.split_first() {
                None => {
                    let was = node.terminal;
                    node.terminal = false;
                    (was, !node.terminal && node.children.is_empty())
                }
                Some((ch, rest)) => {
                    let Some(child) = node.children.get_mut(ch) else {
                        return (false, false);
                    };
                    let (removed, prune) = walk(child, rest);
                    if prune {
                        node.children.remove(ch);
                    }
                    (removed, !node.terminal && node.children.is_empty())
                }
            }
        }
        let chars: Vec<char> = key.chars().collect();
        walk(&mut self.root, &chars).0
    }

    /// True if the exact key is present.
    pub fn contains(&self, key: &str) -> bool {
        let mut node = &self.root;
        for ch in key.chars() {
            match node.children.get(&ch) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.terminal
    }

    /// All keys starting with `prefix`.  The empty prefix yields the empty
    /// result, never a full scan.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        if prefix.is_empty() {
            return Vec::new();
        }
        let mut node = &self.root;
        for ch in prefix.chars() {
            match node.children.get(&ch) {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }
        let mut out = Vec::new();
        let mut buf = prefix.to_owned();
        node.collect(&mut buf, &mut out);
        out
    }
}
