#![forbid(unsafe_code)]

//! Description nodes: what the caller wants the UI to look like.
//!
//! A [`Node`] is an immutable, cheaply cloned description. The reconciler
//! only relies on two things from it: [`ElementKind`] equality and key
//! equality, which together decide whether a previous work unit can be
//! reused for a new description.
//!
//! The constructors here are deliberately minimal; richer builders (macros,
//! templating) live outside this crate.

use crate::hooks::RenderCx;
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sibling identity across renders.
pub type Key = Rc<str>;

/// Signature of a component function.
pub type RenderFn = dyn Fn(&mut RenderCx<'_>, &Props) -> Node;

/// A callback stored in props. Compared by identity.
#[derive(Clone)]
pub struct Callback(Rc<dyn Fn()>);

impl Callback {
    /// Wrap a closure.
    pub fn new(f: impl Fn() + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke the callback.
    pub fn call(&self) {
        (self.0)();
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

/// A prop, context, or dependency value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PropValue {
    /// Absent / undefined.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Callback(Callback),
}

impl PropValue {
    /// String payload, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload, if this is an integer.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for PropValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for PropValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for PropValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropValue {
    fn from(v: &str) -> Self {
        Self::Str(Rc::from(v))
    }
}

impl From<String> for PropValue {
    fn from(v: String) -> Self {
        Self::Str(Rc::from(v))
    }
}

impl From<Callback> for PropValue {
    fn from(v: Callback) -> Self {
        Self::Callback(v)
    }
}

/// Attributes plus children.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Props {
    attrs: BTreeMap<Rc<str>, PropValue>,
    children: Node,
}

impl Props {
    /// Empty props.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set an attribute.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.attrs.insert(Rc::from(name), value.into());
        self
    }

    /// Builder: set children.
    #[must_use]
    pub fn with_children(mut self, children: impl Into<Node>) -> Self {
        self.children = children.into();
        self
    }

    /// Attribute lookup.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.attrs.get(name)
    }

    /// True if the attribute is present (even if `Null`).
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// Iterate attributes in name order.
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.attrs.iter().map(|(k, v)| (&**k, v))
    }

    /// The children description.
    #[must_use]
    pub fn children(&self) -> &Node {
        &self.children
    }

    /// True if both carry the same attributes. Children are not compared;
    /// they are reconciled separately.
    #[must_use]
    pub fn same_attrs(&self, other: &Props) -> bool {
        self.attrs == other.attrs
    }

    pub(crate) fn set(&mut self, name: &str, value: PropValue) {
        self.attrs.insert(Rc::from(name), value);
    }

    pub(crate) fn push_child(&mut self, child: Node) {
        self.children = match std::mem::take(&mut self.children) {
            Node::Empty => child,
            Node::List(items) => {
                let mut items = items.to_vec();
                items.push(child);
                Node::List(items.into())
            }
            single => Node::List(vec![single, child].into()),
        };
    }
}

/// A component function with a display name.
#[derive(Clone)]
pub struct Component {
    name: Rc<str>,
    render: Rc<RenderFn>,
}

impl Component {
    /// Wrap a render function.
    pub fn new(
        name: &str,
        render: impl Fn(&mut RenderCx<'_>, &Props) -> Node + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name),
            render: Rc::new(render),
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn render(&self, cx: &mut RenderCx<'_>, props: &Props) -> Node {
        (self.render)(cx, props)
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.render, &other.render)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Component").field(&self.name).finish()
    }
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

/// A value channel from a provider to its descendants.
#[derive(Debug, Clone)]
pub struct Context {
    id: ContextId,
    default: PropValue,
}

impl Context {
    /// Create a context with a default value seen outside any provider.
    pub fn new(default: impl Into<PropValue>) -> Self {
        Self {
            id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
            default: default.into(),
        }
    }

    /// Identity.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Value outside any provider.
    #[must_use]
    pub fn default_value(&self) -> &PropValue {
        &self.default
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A slot that receives a host instance after commit.
///
/// The instance is stored type-erased; read it back with [`NodeRef::get`]
/// using the host adapter's instance type.
#[derive(Clone, Default)]
pub struct NodeRef(Rc<RefCell<Option<Rc<dyn Any>>>>);

impl NodeRef {
    /// Create an empty ref.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The attached instance, if any and if it is an `I`.
    #[must_use]
    pub fn get<I: Clone + 'static>(&self) -> Option<I> {
        self.0
            .borrow()
            .as_ref()
            .and_then(|value| value.downcast_ref::<I>().cloned())
    }

    /// Whether an instance is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.0.borrow().is_some()
    }

    pub(crate) fn attach(&self, instance: Rc<dyn Any>) {
        *self.0.borrow_mut() = Some(instance);
    }

    pub(crate) fn detach(&self) {
        *self.0.borrow_mut() = None;
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// What an element describes.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    /// A concrete host node with a tag name.
    Host(Rc<str>),
    /// A component function.
    Component(Component),
    /// A grouping with no host node of its own.
    Fragment,
    /// Provides a context value to descendants.
    Provider(Context),
    /// A description kind this runtime does not render.
    Foreign(Rc<str>),
}

/// One description node with kind, key, optional ref and props.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub kind: ElementKind,
    pub key: Option<Key>,
    pub node_ref: Option<NodeRef>,
    pub props: Props,
}

impl Element {
    fn with_kind(kind: ElementKind) -> Self {
        Self {
            kind,
            key: None,
            node_ref: None,
            props: Props::default(),
        }
    }

    /// A host element such as `div`.
    #[must_use]
    pub fn host(tag: &str) -> Self {
        Self::with_kind(ElementKind::Host(Rc::from(tag)))
    }

    /// A fragment over `children`.
    #[must_use]
    pub fn fragment(children: impl IntoIterator<Item = Node>) -> Self {
        let mut element = Self::with_kind(ElementKind::Fragment);
        element.props.children = Node::list(children);
        element
    }

    /// A component invocation.
    #[must_use]
    pub fn component(component: &Component, props: Props) -> Self {
        let mut element = Self::with_kind(ElementKind::Component(component.clone()));
        element.props = props;
        element
    }

    /// A context provider.
    #[must_use]
    pub fn provider(context: &Context, value: impl Into<PropValue>) -> Self {
        let mut element = Self::with_kind(ElementKind::Provider(context.clone()));
        element.props.set("value", value.into());
        element
    }

    /// A provider with no `value` prop.
    #[must_use]
    pub fn provider_without_value(context: &Context) -> Self {
        Self::with_kind(ElementKind::Provider(context.clone()))
    }

    /// An element kind unknown to the runtime.
    #[must_use]
    pub fn foreign(name: &str) -> Self {
        Self::with_kind(ElementKind::Foreign(Rc::from(name)))
    }

    /// Builder: set the key.
    #[must_use]
    pub fn key(mut self, key: impl AsRef<str>) -> Self {
        self.key = Some(Rc::from(key.as_ref()));
        self
    }

    /// Builder: set an attribute.
    #[must_use]
    pub fn attr(mut self, name: &str, value: impl Into<PropValue>) -> Self {
        self.props.set(name, value.into());
        self
    }

    /// Builder: append one child.
    #[must_use]
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.props.push_child(child.into());
        self
    }

    /// Builder: replace children with a list.
    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.props.children = Node::list(children);
        self
    }

    /// Builder: attach a ref.
    #[must_use]
    pub fn with_ref(mut self, node_ref: &NodeRef) -> Self {
        self.node_ref = Some(node_ref.clone());
        self
    }
}

/// A description of zero or more UI nodes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    /// Nothing.
    #[default]
    Empty,
    /// A text leaf.
    Text(Rc<str>),
    /// A single element.
    Element(Rc<Element>),
    /// An ordered list of nodes.
    List(Rc<[Node]>),
}

impl Node {
    /// A text node.
    #[must_use]
    pub fn text(text: impl AsRef<str>) -> Self {
        Self::Text(Rc::from(text.as_ref()))
    }

    /// A list node.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Node>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Key of an element node.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::Element(element) => element.key.as_ref(),
            _ => None,
        }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(Rc::new(element))
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Self::Text(Rc::from(text))
    }
}

impl From<Vec<Node>> for Node {
    fn from(items: Vec<Node>) -> Self {
        Self::List(items.into())
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(node: Option<T>) -> Self {
        node.map_or(Node::Empty, Into::into)
    }
}
