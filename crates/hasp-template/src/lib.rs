//! Jinja2-compatible templates for plate objects
//!
//! Built on minijinja with the Home Assistant state helpers:
//!
//! - `states('entity_id')` / `states.light.kitchen` - entity states
//! - `is_state('entity_id', 'on')` - state comparison, also against a list
//! - `state_attr('entity_id', 'brightness')` - attribute value
//! - `has_value('entity_id')` - neither unknown nor unavailable
//!
//! [`TemplateEngine::render_tracked`] also reports which entities a render
//! read, which is how object properties subscribe to state changes.
//!
//! ```ignore
//! let engine = TemplateEngine::new(state_machine);
//! let rendered = engine.render_tracked("{{ states('sensor.temperature') }}", &Map::new())?;
//! assert!(rendered.dependencies.matches("sensor.temperature"));
//! ```

mod engine;
mod error;
mod filters;
mod states;

pub use engine::{Rendered, TemplateEngine};
pub use error::{TemplateError, TemplateResult};
pub use filters::DateTimeWrapper;
pub use states::{Dependencies, StateWrapper, StatesObject};
