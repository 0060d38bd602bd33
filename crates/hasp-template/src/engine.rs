//! Template engine
//!
//! Templates see `states` plus the state helper functions bound to a fresh
//! [`StatesObject`] for every render, so each render reports exactly the
//! entities it read.

use crate::error::{TemplateError, TemplateResult};
use crate::filters;
use crate::states::{Dependencies, StatesObject};
use hasp_state_machine::StateMachine;
use minijinja::{Environment, UndefinedBehavior, Value};
use serde_json::Map;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// Output of a tracked render
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// Rendered text with surrounding whitespace removed
    pub value: String,
    pub dependencies: Dependencies,
}

pub struct TemplateEngine {
    env: Environment<'static>,
    state_machine: Arc<StateMachine>,
}

impl TemplateEngine {
    pub fn new(state_machine: Arc<StateMachine>) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);

        env.add_filter("int", filters::to_int);
        env.add_filter("float", filters::to_float);
        env.add_filter("bool", filters::to_bool);
        env.add_filter("round", filters::round_filter);
        env.add_filter("abs", filters::abs_filter);
        env.add_filter("to_json", filters::to_json);
        env.add_filter("from_json", filters::from_json);

        env.add_test("number", filters::is_number);

        env.add_function("iif", filters::iif);
        env.add_function("now", filters::now);
        env.add_function("utcnow", filters::utcnow);

        Self { env, state_machine }
    }

    /// Render a template that has no variables of its own
    pub fn render(&self, template: &str) -> TemplateResult<String> {
        self.render_tracked(template, &Map::new()).map(|r| r.value)
    }

    /// Render with extra variables, e.g. the payload of a panel event
    pub fn render_with_context(
        &self,
        template: &str,
        variables: &Map<String, serde_json::Value>,
    ) -> TemplateResult<String> {
        self.render_tracked(template, variables).map(|r| r.value)
    }

    /// Render and report which entities the template read
    pub fn render_tracked(
        &self,
        template: &str,
        variables: &Map<String, serde_json::Value>,
    ) -> TemplateResult<Rendered> {
        let (value, dependencies) = self.render_watched(template, variables);
        Ok(Rendered {
            value: value?,
            dependencies,
        })
    }

    /// Like [`render_tracked`](Self::render_tracked), but the entities read
    /// before a failure are reported too
    ///
    /// A template that fails on a placeholder state (`unknown` fed to
    /// `from_json`, say) must still be re-rendered once that entity changes.
    pub fn render_watched(
        &self,
        template: &str,
        variables: &Map<String, serde_json::Value>,
    ) -> (TemplateResult<String>, Dependencies) {
        trace!(template, "Rendering template");

        let states = Arc::new(StatesObject::new(self.state_machine.clone()));
        let context = Self::context(states.clone(), variables);

        let value = self
            .env
            .render_str(template, context)
            .map(|value| value.trim().to_string())
            .map_err(TemplateError::from);
        (value, states.take_dependencies())
    }

    /// Compile a template without rendering it
    pub fn validate(&self, template: &str) -> TemplateResult<()> {
        self.env.template_from_str(template)?;
        Ok(())
    }

    /// Check if a string contains template syntax
    pub fn is_template(template: &str) -> bool {
        template.contains("{{") || template.contains("{%") || template.contains("{#")
    }

    fn context(states: Arc<StatesObject>, variables: &Map<String, serde_json::Value>) -> Value {
        let mut ctx: BTreeMap<String, Value> = variables
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_serialize(v)))
            .collect();

        let s = states.clone();
        ctx.insert(
            "is_state".into(),
            Value::from_function(move |entity_id: &str, state: Value| {
                s.is_state(entity_id, &state)
            }),
        );

        let s = states.clone();
        ctx.insert(
            "state_attr".into(),
            Value::from_function(move |entity_id: &str, attribute: &str| {
                s.state_attr(entity_id, attribute)
            }),
        );

        let s = states.clone();
        ctx.insert(
            "is_state_attr".into(),
            Value::from_function(move |entity_id: &str, attribute: &str, value: Value| {
                s.is_state_attr(entity_id, attribute, &value)
            }),
        );

        let s = states.clone();
        ctx.insert(
            "has_value".into(),
            Value::from_function(move |entity_id: &str| s.has_value(entity_id)),
        );

        ctx.insert("states".into(), Value::from_dyn_object(states));

        Value::from_object(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hasp_core::{Context, EntityId};
    use hasp_event_bus::EventBus;
    use serde_json::json;
    use std::collections::HashMap;

    fn make_test_engine() -> TemplateEngine {
        let state_machine = Arc::new(StateMachine::new(Arc::new(EventBus::new())));

        state_machine.set(
            EntityId::new("light", "kitchen").unwrap(),
            "on",
            HashMap::from([
                ("brightness".to_string(), json!(255)),
                ("friendly_name".to_string(), json!("Kitchen")),
            ]),
            Context::new(),
        );
        state_machine.set(
            EntityId::new("sensor", "temperature").unwrap(),
            "23.46",
            HashMap::new(),
            Context::new(),
        );

        TemplateEngine::new(state_machine)
    }

    fn vars(value: serde_json::Value) -> Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_states_access() {
        let engine = make_test_engine();
        assert_eq!(engine.render("{{ states('light.kitchen') }}").unwrap(), "on");
        assert_eq!(
            engine.render("{{ states.light.kitchen.state }}").unwrap(),
            "on"
        );
        assert_eq!(engine.render("{{ states.light.kitchen.name }}").unwrap(), "Kitchen");
        assert_eq!(
            engine.render("{{ states('light.missing') }}").unwrap(),
            "unknown"
        );
    }

    #[test]
    fn test_state_functions() {
        let engine = make_test_engine();
        assert_eq!(
            engine.render("{{ is_state('light.kitchen', 'on') }}").unwrap(),
            "True"
        );
        assert_eq!(
            engine
                .render("{{ state_attr('light.kitchen', 'brightness') }}")
                .unwrap(),
            "255"
        );
        assert_eq!(
            engine.render("{{ has_value('sensor.temperature') }}").unwrap(),
            "true"
        );
    }

    #[test]
    fn test_filters() {
        let engine = make_test_engine();
        assert_eq!(
            engine
                .render("{{ states('sensor.temperature') | float | round(1) }}")
                .unwrap(),
            "23.5"
        );
        assert_eq!(
            engine
                .render("{{ states('sensor.temperature') | int }}")
                .unwrap(),
            "23"
        );
        assert_eq!(
            engine
                .render("{{ iif(is_state('light.kitchen', 'on'), '#FFFF00', '#333333') }}")
                .unwrap(),
            "#FFFF00"
        );
    }

    #[test]
    fn test_failed_render_still_reports_dependencies() {
        let engine = make_test_engine();
        let (value, dependencies) =
            engine.render_watched("{{ (states('sensor.raw') | from_json).a }}", &Map::new());

        assert!(value.is_err());
        assert!(dependencies.matches("sensor.raw"));
    }

    #[test]
    fn test_render_tracked_dependencies() {
        let engine = make_test_engine();
        let rendered = engine
            .render_tracked(
                "{{ states('sensor.temperature') }} {{ is_state('light.kitchen', 'on') }}",
                &Map::new(),
            )
            .unwrap();

        assert_eq!(rendered.value, "23.46 True");
        assert!(rendered.dependencies.matches("sensor.temperature"));
        assert!(rendered.dependencies.matches("light.kitchen"));
        assert!(!rendered.dependencies.matches("light.hall"));
    }

    #[test]
    fn test_dependencies_follow_the_branch_taken() {
        let engine = make_test_engine();
        let rendered = engine
            .render_tracked(
                "{% if is_state('light.kitchen', 'off') %}{{ states('sensor.temperature') }}{% endif %}",
                &Map::new(),
            )
            .unwrap();

        assert_eq!(rendered.value, "");
        assert!(rendered.dependencies.matches("light.kitchen"));
        assert!(!rendered.dependencies.matches("sensor.temperature"));
    }

    #[test]
    fn test_render_with_event_variables() {
        let engine = make_test_engine();
        let result = engine
            .render_with_context(
                "{{ val * 2 }} {{ event }}",
                &vars(json!({"event": "changed", "val": 21})),
            )
            .unwrap();
        assert_eq!(result, "42 changed");
    }

    #[test]
    fn test_output_is_trimmed() {
        let engine = make_test_engine();
        assert_eq!(engine.render("  {{ 1 + 1 }}\n").unwrap(), "2");
    }

    #[test]
    fn test_validate() {
        let engine = make_test_engine();
        assert!(engine.validate("{{ states('light.kitchen') }}").is_ok());
        assert!(engine.validate("{{ states('light.kitchen' }}").is_err());
        assert!(engine.render("{% if %}").is_err());
    }

    #[test]
    fn test_is_template() {
        assert!(TemplateEngine::is_template("{{ foo }}"));
        assert!(TemplateEngine::is_template("{% if true %}{% endif %}"));
        assert!(!TemplateEngine::is_template("plain text"));
    }
}
