//! Per-dispatch handler context.

use std::sync::Arc;

use serde_json::Value;

/// Ordered, immutable invocation arguments handed to a handler.
///
/// Transports decide what goes in here (the raw inbound message, a channel
/// name, headers). Cloning is cheap; the argument list is shared.
#[derive(Clone, Debug, Default)]
pub struct RpcContext {
    args: Arc<[Value]>,
}

impl RpcContext {
    /// Build a context from its arguments.
    pub fn new(args: impl Into<Vec<Value>>) -> Self {
        let args: Vec<Value> = args.into();
        Self { args: args.into() }
    }

    /// All arguments in order.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn index_access() {
        let ctx = RpcContext::new(vec![json!("channel"), json!({"h": 1})]);
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.arg(0), Some(&json!("channel")));
        assert_eq!(ctx.arg(1).unwrap()["h"], 1);
        assert!(ctx.arg(2).is_none());
    }

    #[test]
    fn clones_share_arguments() {
        let ctx = RpcContext::new(vec![json!(1)]);
        let other = ctx.clone();
        assert!(std::ptr::eq(ctx.args().as_ptr(), other.args().as_ptr()));
    }

    #[test]
    fn default_is_empty() {
        let ctx = RpcContext::default();
        assert!(ctx.is_empty());
        assert!(ctx.args().is_empty());
    }
}
