#![forbid(unsafe_code)]

//! Provider value stack for one render pass.
//!
//! A provider pushes in its begin step and pops in its complete step, so
//! the stack always mirrors the providers on the path from the root to the
//! unit being rendered.

use crate::element::{Context, ContextId, PropValue};

#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    entries: Vec<(ContextId, PropValue)>,
}

impl ContextStack {
    pub(crate) fn push(&mut self, context: &Context, value: PropValue) {
        self.entries.push((context.id(), value));
    }

    pub(crate) fn pop(&mut self, context: &Context) {
        if let Some(pos) = self.entries.iter().rposition(|(id, _)| *id == context.id()) {
            self.entries.remove(pos);
        }
    }

    /// Innermost provided value, or the context default.
    pub(crate) fn read(&self, context: &Context) -> PropValue {
        self.entries
            .iter()
            .rev()
            .find(|(id, _)| *id == context.id())
            .map_or_else(|| context.default_value().clone(), |(_, v)| v.clone())
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn innermost_value_wins() {
        let theme = Context::new("light");
        let mut stack = ContextStack::default();
        assert_eq!(stack.read(&theme), PropValue::from("light"));

        stack.push(&theme, "dark".into());
        stack.push(&theme, "blue".into());
        assert_eq!(stack.read(&theme), PropValue::from("blue"));
        stack.pop(&theme);
        assert_eq!(stack.read(&theme), PropValue::from("dark"));
        stack.pop(&theme);
        assert_eq!(stack.depth(), 0);
    }
}
