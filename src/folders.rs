//! Mailbox hierarchy reconstruction
//!
//! IMAP `LIST` returns full names with a delimiter. They are arranged into a
//! tree so that the flattened listing always shows parents before children,
//! whatever order the server used.

use crate::transport::ListedMailbox;

/// One folder and its children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    /// Last path segment
    pub name: String,
    /// Delimiter used to join this node's children
    pub delimiter: Option<String>,
    pub children: Vec<FolderNode>,
}

impl FolderNode {
    pub fn new(name: &str, delimiter: Option<&str>, children: Vec<FolderNode>) -> Self {
        Self {
            name: name.to_owned(),
            delimiter: delimiter.map(str::to_owned),
            children,
        }
    }
}

/// Arrange a flat `LIST` response into top-level folder nodes
///
/// Intermediate segments that the server did not list themselves still get
/// a node so their children stay reachable.
pub fn build_tree(listed: &[ListedMailbox]) -> Vec<FolderNode> {
    let mut roots: Vec<FolderNode> = Vec::new();
    for item in listed {
        let segments: Vec<&str> = match item.delimiter.as_deref() {
            Some(delim) if !delim.is_empty() => item.name.split(delim).collect(),
            _ => vec![item.name.as_str()],
        };
        insert_path(&mut roots, &segments, item.delimiter.as_deref());
    }
    roots
}

fn insert_path(level: &mut Vec<FolderNode>, segments: &[&str], delimiter: Option<&str>) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let idx = match level.iter().position(|node| node.name == *first) {
        Some(idx) => idx,
        None => {
            level.push(FolderNode::new(first, delimiter, Vec::new()));
            level.len() - 1
        }
    };
    let node = &mut level[idx];
    if node.delimiter.is_none() {
        node.delimiter = delimiter.map(str::to_owned);
    }
    insert_path(&mut node.children, rest, delimiter);
}

/// Flatten folder nodes depth first into fully qualified names
pub fn flatten(nodes: &[FolderNode]) -> Vec<String> {
    let mut out = Vec::new();
    for node in nodes {
        flatten_into(node, None, &mut out);
    }
    out
}

fn flatten_into(node: &FolderNode, parent: Option<(&str, &str)>, out: &mut Vec<String>) {
    let full = match parent {
        Some((prefix, delim)) => format!("{prefix}{delim}{}", node.name),
        None => node.name.clone(),
    };
    out.push(full.clone());
    let delim = node.delimiter.as_deref().unwrap_or("/");
    for child in &node.children {
        flatten_into(child, Some((full.as_str(), delim)), out);
    }
}
