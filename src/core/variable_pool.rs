use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

pub use crate::domain::execution::Segment;
pub use crate::domain::model::Selector;
use crate::error::NodeError;

pub const SYSTEM_VARIABLE_NODE_ID: &str = "sys";
pub const ENVIRONMENT_VARIABLE_NODE_ID: &str = "env";
pub const CONVERSATION_VARIABLE_NODE_ID: &str = "conversation";

/// `{{#owner.name#}}`, optionally followed by attribute path parts.
fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{#([a-zA-Z0-9_]{1,50}(?:\.[a-zA-Z_][a-zA-Z0-9_]{0,29}){1,10})#\}\}")
            .expect("variable pattern is a valid regex")
    })
}

/// Variable store shared by every node of a run.
///
/// Variables are grouped by owner (usually a node id) so that everything a
/// node produced can be dropped in one call.
#[derive(Debug, Clone, Default)]
pub struct VariablePool {
    variables: HashMap<String, HashMap<String, Segment>>,
    /// Raw inputs of the run, published by the start node.
    user_inputs: HashMap<String, Value>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pool with system, environment and conversation variables.
    pub fn with_scopes(
        system: HashMap<String, Value>,
        environment: HashMap<String, Value>,
        conversation: HashMap<String, Value>,
    ) -> Self {
        let mut pool = Self::new();
        pool.add_values(SYSTEM_VARIABLE_NODE_ID, &system);
        pool.add_values(ENVIRONMENT_VARIABLE_NODE_ID, &environment);
        pool.add_values(CONVERSATION_VARIABLE_NODE_ID, &conversation);
        pool
    }

    pub fn with_user_inputs(mut self, user_inputs: HashMap<String, Value>) -> Self {
        self.user_inputs = user_inputs;
        self
    }

    pub fn user_inputs(&self) -> &HashMap<String, Value> {
        &self.user_inputs
    }

    pub fn len(&self) -> usize {
        self.variables.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or overwrite. Any attribute path on the selector is ignored.
    pub fn add(&mut self, selector: &Selector, value: impl Into<Segment>) {
        self.variables
            .entry(selector.node_id().to_string())
            .or_default()
            .insert(selector.variable_name().to_string(), value.into());
    }

    pub fn add_values(&mut self, owner: &str, values: &HashMap<String, Value>) {
        for (name, value) in values {
            self.add(&Selector::new(owner, name.clone()), Segment::from_value(value));
        }
    }

    pub fn set_node_outputs(&mut self, node_id: &str, outputs: &HashMap<String, Segment>) {
        for (name, value) in outputs {
            self.add(&Selector::new(node_id, name.clone()), value.clone());
        }
    }

    /// Point lookup on `(owner, name)`.
    pub fn get(&self, selector: &Selector) -> Option<&Segment> {
        self.variables
            .get(selector.node_id())?
            .get(selector.variable_name())
    }

    /// Lookup that also walks the selector's attribute path.
    pub fn resolve(&self, selector: &Selector) -> Option<Segment> {
        let mut current = self.get(selector)?.clone();
        for part in selector.path() {
            current = current.attribute(part)?;
        }
        Some(current)
    }

    pub fn has(&self, selector: &Selector) -> bool {
        self.resolve(selector).is_some()
    }

    pub fn remove(&mut self, selector: &Selector) -> Option<Segment> {
        let owner = self.variables.get_mut(selector.node_id())?;
        let removed = owner.remove(selector.variable_name());
        if owner.is_empty() {
            self.variables.remove(selector.node_id());
        }
        removed
    }

    /// Drop every variable owned by `owner_id`.
    pub fn remove_by_owner(&mut self, owner_id: &str) {
        self.variables.remove(owner_id);
    }

    pub fn owner_variables(&self, owner_id: &str) -> Option<&HashMap<String, Segment>> {
        self.variables.get(owner_id)
    }

    pub fn snapshot_owner(&self, owner_id: &str) -> HashMap<String, Segment> {
        self.variables.get(owner_id).cloned().unwrap_or_default()
    }

    /// Overwrite the named variables of `owner_id`, leaving the others in place.
    pub fn restore_owner(&mut self, owner_id: &str, values: HashMap<String, Segment>) {
        if values.is_empty() {
            return;
        }
        self.variables
            .entry(owner_id.to_string())
            .or_default()
            .extend(values);
    }

    /// Replace every `{{#owner.name#}}` reference with the variable's text.
    ///
    /// Fails with [`NodeError::VariableNotFound`] listing every reference
    /// that did not resolve.
    pub fn render_template(&self, text: &str) -> Result<String, NodeError> {
        let mut missing = Vec::new();
        let rendered = variable_pattern().replace_all(text, |caps: &regex::Captures<'_>| {
            let path = &caps[1];
            match Selector::parse_str(path).and_then(|s| self.resolve(&s)) {
                Some(segment) => segment.to_display_string(),
                None => {
                    missing.push(path.to_string());
                    String::new()
                }
            }
        });
        if missing.is_empty() {
            Ok(rendered.into_owned())
        } else {
            Err(NodeError::VariableNotFound(missing.join(", ")))
        }
    }

    /// Every selector referenced by a template, in order of appearance.
    pub fn template_selectors(text: &str) -> Vec<Selector> {
        variable_pattern()
            .captures_iter(text)
            .filter_map(|caps| Selector::parse_str(&caps[1]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_variable_pool_basic() {
        let mut pool = VariablePool::new();
        let sel = Selector::new("node1", "output");
        pool.add(&sel, "hello");
        assert_eq!(pool.get(&sel), Some(&Segment::String("hello".into())));
        pool.add(&sel, 3i64);
        assert_eq!(pool.get(&sel), Some(&Segment::Integer(3)));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.remove(&sel), Some(Segment::Integer(3)));
        assert!(pool.get(&sel).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_remove_by_owner() {
        let mut pool = VariablePool::new();
        pool.add(&Selector::new("llm", "text"), "a");
        pool.add(&Selector::new("llm", "usage"), 1i64);
        pool.add(&Selector::new("llm2", "text"), "b");
        pool.remove_by_owner("llm");
        assert!(!pool.has(&Selector::new("llm", "text")));
        assert!(!pool.has(&Selector::new("llm", "usage")));
        assert!(pool.has(&Selector::new("llm2", "text")));
    }

    #[test]
    fn test_resolve_path() {
        let mut pool = VariablePool::new();
        pool.add(
            &Selector::new("http", "body"),
            Segment::from_value(&json!({"user": {"name": "ann"}})),
        );
        let sel = Selector::new("http", "body").with_path(vec!["user".into(), "name".into()]);
        assert_eq!(pool.resolve(&sel), Some(Segment::String("ann".into())));
        let missing = Selector::new("http", "body").with_path(vec!["nope".into()]);
        assert!(!pool.has(&missing));
    }

    #[test]
    fn test_render_template() {
        let mut pool = VariablePool::new();
        pool.add(&Selector::new("start", "name"), "world");
        pool.add(&Selector::new("count", "n"), 2i64);
        let out = pool
            .render_template("Hello {{#start.name#}} x{{#count.n#}}")
            .unwrap();
        assert_eq!(out, "Hello world x2");
    }

    #[test]
    fn test_render_template_reports_missing() {
        let pool = VariablePool::new();
        let err = pool.render_template("{{#a.b#}} and {{#c.d#}}").unwrap_err();
        match err {
            NodeError::VariableNotFound(msg) => assert_eq!(msg, "a.b, c.d"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_scopes_and_snapshot() {
        let mut pool = VariablePool::with_scopes(
            HashMap::from([("user_id".to_string(), json!("u1"))]),
            HashMap::new(),
            HashMap::from([("counter".to_string(), json!(1))]),
        );
        assert!(pool.has(&Selector::new(SYSTEM_VARIABLE_NODE_ID, "user_id")));
        let snap = pool.snapshot_owner(CONVERSATION_VARIABLE_NODE_ID);
        pool.add(&Selector::new(CONVERSATION_VARIABLE_NODE_ID, "counter"), 5i64);
        pool.restore_owner(CONVERSATION_VARIABLE_NODE_ID, snap);
        assert_eq!(
            pool.get(&Selector::new(CONVERSATION_VARIABLE_NODE_ID, "counter")),
            Some(&Segment::Integer(1))
        );
    }

    #[test]
    fn test_template_selectors() {
        let sels = VariablePool::template_selectors("{{#a.b#}} {{#c.d.e#}} {{ plain }}");
        assert_eq!(sels.len(), 2);
        assert_eq!(sels[1].path(), &["e".to_string()]);
    }
}
