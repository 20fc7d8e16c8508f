#![forbid(unsafe_code)]

//! Host adapter boundary.
//!
//! The reconciler never touches concrete UI nodes; it asks the host through
//! this trait. All operations are synchronous. Any `Err` is fatal to the
//! root that issued it.

use crate::element::Props;
use crate::error::HostError;
use std::fmt;

/// Operations on the concrete host tree.
pub trait HostConfig: 'static {
    /// Handle to one host node. Work units hold clones of it.
    type Instance: Clone + PartialEq + fmt::Debug + 'static;

    /// Create an element node. Children are appended separately.
    fn create_instance(&mut self, tag: &str, props: &Props) -> Result<Self::Instance, HostError>;

    /// Create a text node.
    fn create_text_instance(&mut self, text: &str) -> Result<Self::Instance, HostError>;

    /// Append `child` as the last child of `parent`.
    fn append_child(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
    ) -> Result<(), HostError>;

    /// Insert `child` into `parent` immediately before `before`.
    ///
    /// If `child` is already attached to `parent` it is moved.
    fn insert_before(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
        before: &Self::Instance,
    ) -> Result<(), HostError>;

    /// Detach `child` from `parent`.
    fn remove_child(
        &mut self,
        parent: &Self::Instance,
        child: &Self::Instance,
    ) -> Result<(), HostError>;

    /// Apply changed attributes.
    fn update_instance(
        &mut self,
        instance: &Self::Instance,
        old_props: &Props,
        new_props: &Props,
    ) -> Result<(), HostError>;

    /// Replace a text node's content.
    fn update_text(
        &mut self,
        instance: &Self::Instance,
        old_text: &str,
        new_text: &str,
    ) -> Result<(), HostError>;
}
