#![forbid(unsafe_code)]

//! In-memory host adapter that records every call.
//!
//! [`RecordingHost`] keeps a real tree (parent links and ordered children)
//! so tests can assert on the resulting structure, and a log of every
//! [`HostCall`] so they can assert on how it was reached. Misuse that a
//! real host would reject (inserting before a node that is not a child,
//! removing a node from the wrong parent) fails with a [`HostError`].
//!
//! # Fault injection
//!
//! [`RecordingHost::fail_after`] arms a failure for one operation kind:
//! after `n` more successful calls of that kind, the next one returns an
//! error and the fault disarms.

use serde_json::json;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use weave_reconciler::{HostConfig, HostError, HostOp, PropValue, Props};

/// Handle to a node in a [`RecordingHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeData {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct HostNode {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// One recorded host operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    CreateInstance { id: NodeId, tag: String },
    CreateTextInstance { id: NodeId, text: String },
    AppendChild { parent: NodeId, child: NodeId },
    InsertBefore { parent: NodeId, child: NodeId, before: NodeId },
    RemoveChild { parent: NodeId, child: NodeId },
    UpdateInstance { id: NodeId, changed: Vec<String> },
    UpdateText { id: NodeId, text: String },
}

impl HostCall {
    #[must_use]
    pub fn op(&self) -> HostOp {
        match self {
            Self::CreateInstance { .. } => HostOp::CreateInstance,
            Self::CreateTextInstance { .. } => HostOp::CreateTextInstance,
            Self::AppendChild { .. } => HostOp::AppendChild,
            Self::InsertBefore { .. } => HostOp::InsertBefore,
            Self::RemoveChild { .. } => HostOp::RemoveChild,
            Self::UpdateInstance { .. } => HostOp::UpdateInstance,
            Self::UpdateText { .. } => HostOp::UpdateText,
        }
    }

    /// True for operations that change an attached tree rather than build
    /// a detached node.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Self::CreateInstance { .. } | Self::CreateTextInstance { .. }
        )
    }

    fn to_json(&self) -> serde_json::Value {
        let op = self.op().as_str();
        match self {
            Self::CreateInstance { id, tag } => json!({"op": op, "id": id.0, "tag": tag}),
            Self::CreateTextInstance { id, text } => json!({"op": op, "id": id.0, "text": text}),
            Self::AppendChild { parent, child } | Self::RemoveChild { parent, child } => {
                json!({"op": op, "parent": parent.0, "child": child.0})
            }
            Self::InsertBefore {
                parent,
                child,
                before,
            } => json!({"op": op, "parent": parent.0, "child": child.0, "before": before.0}),
            Self::UpdateInstance { id, changed } => {
                json!({"op": op, "id": id.0, "changed": changed})
            }
            Self::UpdateText { id, text } => json!({"op": op, "id": id.0, "text": text}),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Fault {
    op: HostOp,
    remaining: usize,
}

/// Reference host adapter for tests, benches and fuzzing.
#[derive(Debug, Default)]
pub struct RecordingHost {
    nodes: BTreeMap<NodeId, HostNode>,
    next_id: u32,
    log: Vec<HostCall>,
    faults: Vec<Fault>,
}

impl RecordingHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached container element to mount a root into. Not
    /// logged.
    pub fn create_container(&mut self) -> NodeId {
        self.alloc(NodeData::Element {
            tag: "root".to_owned(),
            attrs: BTreeMap::new(),
        })
    }

    /// Fail the next call of `op` after `successes` more successful ones.
    pub fn fail_after(&mut self, op: HostOp, successes: usize) {
        self.faults.push(Fault {
            op,
            remaining: successes,
        });
    }

    /// Every call so far, oldest first.
    #[must_use]
    pub fn log(&self) -> &[HostCall] {
        &self.log
    }

    pub fn take_log(&mut self) -> Vec<HostCall> {
        std::mem::take(&mut self.log)
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Number of logged calls of `op`.
    #[must_use]
    pub fn count(&self, op: HostOp) -> usize {
        self.log.iter().filter(|call| call.op() == op).count()
    }

    /// Number of logged calls that touched an attached tree.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.log.iter().filter(|call| call.is_mutation()).count()
    }

    /// The log as JSON lines, one call per line.
    #[must_use]
    pub fn log_jsonl(&self) -> String {
        let mut out = String::new();
        for call in &self.log {
            out.push_str(&call.to_json().to_string());
            out.push('\n');
        }
        out
    }

    /// Nodes ever created, including the detached ones.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map_or(&[], |node| node.children.as_slice())
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id)?.parent
    }

    #[must_use]
    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.nodes.get(&id)?.data {
            NodeData::Element { tag, .. } => Some(tag),
            NodeData::Text(_) => None,
        }
    }

    #[must_use]
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes.get(&id)?.data {
            NodeData::Text(text) => Some(text),
            NodeData::Element { .. } => None,
        }
    }

    #[must_use]
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.nodes.get(&id)?.data {
            NodeData::Element { attrs, .. } => attrs.get(name).map(String::as_str),
            NodeData::Text(_) => None,
        }
    }

    /// Markup for the children of `container`, e.g. `<ul><li>a</li></ul>`.
    #[must_use]
    pub fn render(&self, container: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(container) {
            self.write_node(&mut out, child);
        }
        out
    }

    /// Markup for `id` itself.
    #[must_use]
    pub fn render_node(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(&mut out, id);
        out
    }

    /// `blake3:`-prefixed digest of [`RecordingHost::render`].
    #[must_use]
    pub fn checksum(&self, container: NodeId) -> String {
        let digest = blake3::hash(self.render(container).as_bytes());
        format!("blake3:{}", digest.to_hex())
    }

    fn write_node(&self, out: &mut String, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        match &node.data {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Element { tag, attrs } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                out.push('>');
                for &child in &node.children {
                    self.write_node(out, child);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            HostNode {
                data,
                parent: None,
                children: Vec::new(),
            },
        );
        id
    }

    fn check_fault(&mut self, op: HostOp) -> Result<(), HostError> {
        let Some(index) = self.faults.iter().position(|fault| fault.op == op) else {
            return Ok(());
        };
        if self.faults[index].remaining > 0 {
            self.faults[index].remaining -= 1;
            return Ok(());
        }
        self.faults.remove(index);
        Err(HostError::new(op, "injected fault"))
    }

    fn require(&self, op: HostOp, id: NodeId) -> Result<(), HostError> {
        if self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(HostError::new(op, format!("unknown node {}", id.0)))
        }
    }

    fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.nodes.get_mut(&child).and_then(|node| node.parent.take()) else {
            return;
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|&c| c != child);
        }
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, index: Option<usize>) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            match index {
                Some(index) => node.children.insert(index, child),
                None => node.children.push(child),
            }
        }
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parent = Some(parent);
        }
    }
}

fn attr_text(value: &PropValue) -> Option<String> {
    match value {
        PropValue::Null | PropValue::Callback(_) => None,
        PropValue::Bool(v) => Some(v.to_string()),
        PropValue::Int(v) => Some(v.to_string()),
        PropValue::Float(v) => Some(v.to_string()),
        PropValue::Str(v) => Some(v.to_string()),
    }
}

fn host_attrs(props: &Props) -> BTreeMap<String, String> {
    props
        .attrs()
        .filter_map(|(name, value)| Some((name.to_owned(), attr_text(value)?)))
        .collect()
}

impl HostConfig for RecordingHost {
    type Instance = NodeId;

    fn create_instance(&mut self, tag: &str, props: &Props) -> Result<NodeId, HostError> {
        self.check_fault(HostOp::CreateInstance)?;
        let id = self.alloc(NodeData::Element {
            tag: tag.to_owned(),
            attrs: host_attrs(props),
        });
        self.log.push(HostCall::CreateInstance {
            id,
            tag: tag.to_owned(),
        });
        Ok(id)
    }

    fn create_text_instance(&mut self, text: &str) -> Result<NodeId, HostError> {
        self.check_fault(HostOp::CreateTextInstance)?;
        let id = self.alloc(NodeData::Text(text.to_owned()));
        self.log.push(HostCall::CreateTextInstance {
            id,
            text: text.to_owned(),
        });
        Ok(id)
    }

    fn append_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<(), HostError> {
        self.check_fault(HostOp::AppendChild)?;
        self.require(HostOp::AppendChild, *parent)?;
        self.require(HostOp::AppendChild, *child)?;
        self.detach(*child);
        self.attach(*parent, *child, None);
        self.log.push(HostCall::AppendChild {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: &NodeId,
        child: &NodeId,
        before: &NodeId,
    ) -> Result<(), HostError> {
        self.check_fault(HostOp::InsertBefore)?;
        self.require(HostOp::InsertBefore, *parent)?;
        self.require(HostOp::InsertBefore, *child)?;
        if child == before {
            return Err(HostError::new(HostOp::InsertBefore, "node inserted before itself"));
        }
        self.detach(*child);
        let Some(index) = self
            .children(*parent)
            .iter()
            .position(|&c| c == *before)
        else {
            return Err(HostError::new(
                HostOp::InsertBefore,
                format!("anchor {} is not a child of {}", before.0, parent.0),
            ));
        };
        self.attach(*parent, *child, Some(index));
        self.log.push(HostCall::InsertBefore {
            parent: *parent,
            child: *child,
            before: *before,
        });
        Ok(())
    }

    fn remove_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<(), HostError> {
        self.check_fault(HostOp::RemoveChild)?;
        if self.parent(*child) != Some(*parent) {
            return Err(HostError::new(
                HostOp::RemoveChild,
                format!("{} is not a child of {}", child.0, parent.0),
            ));
        }
        self.detach(*child);
        self.log.push(HostCall::RemoveChild {
            parent: *parent,
            child: *child,
        });
        Ok(())
    }

    fn update_instance(
        &mut self,
        instance: &NodeId,
        old_props: &Props,
        new_props: &Props,
    ) -> Result<(), HostError> {
        self.check_fault(HostOp::UpdateInstance)?;
        let old = host_attrs(old_props);
        let new = host_attrs(new_props);
        let mut changed: Vec<String> = new
            .iter()
            .filter(|(name, value)| old.get(*name) != Some(*value))
            .map(|(name, _)| name.clone())
            .collect();
        changed.extend(old.keys().filter(|name| !new.contains_key(*name)).cloned());
        changed.sort();

        match self.nodes.get_mut(instance).map(|node| &mut node.data) {
            Some(NodeData::Element { attrs, .. }) => *attrs = new,
            _ => {
                return Err(HostError::new(
                    HostOp::UpdateInstance,
                    format!("{} is not an element", instance.0),
                ));
            }
        }
        self.log.push(HostCall::UpdateInstance {
            id: *instance,
            changed,
        });
        Ok(())
    }

    fn update_text(
        &mut self,
        instance: &NodeId,
        _old_text: &str,
        new_text: &str,
    ) -> Result<(), HostError> {
        self.check_fault(HostOp::UpdateText)?;
        match self.nodes.get_mut(instance).map(|node| &mut node.data) {
            Some(NodeData::Text(text)) => *text = new_text.to_owned(),
            _ => {
                return Err(HostError::new(
                    HostOp::UpdateText,
                    format!("{} is not a text node", instance.0),
                ));
            }
        }
        self.log.push(HostCall::UpdateText {
            id: *instance,
            text: new_text.to_owned(),
        });
        Ok(())
    }
}
