//! Stream display formatter.
//!
//! Turns a [`ParsedStream`] into the `name`/`description` pair shown by the
//! client, using a small template language:
//!
//! ```text
//! {service.shortName::exists["[{service.shortName}] "||""]}{stream.resolution}
//! ```
//!
//! Templates are compiled once per [`Formatter`]; evaluation never fails.
//! Unknown sections, fields and modifiers render as `{unknown_...}` markers.

pub mod languages;
pub mod modifiers;
pub mod presets;
pub mod template;
pub mod value;

pub use template::{post_process, Template, MAX_DEPTH};
pub use value::{FieldValue, ParseValue, Section};

use crate::config::{FormatterConfig, LanguagePreferences, UserConfig};
use crate::models::{ParsedStream, ResponseStream};

/// User-level values visible to templates besides the stream itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatContext {
    pub addon_name: String,
    pub languages: LanguagePreferences,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedStream {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Formatter {
    name: Template,
    description: Template,
    context: FormatContext,
}

impl Formatter {
    /// Compile the configured templates, falling back to the preset.
    #[must_use]
    pub fn new(config: &FormatterConfig, context: FormatContext) -> Self {
        let preset = presets::templates(config.preset);
        Self {
            name: Template::compile(config.name.as_deref().unwrap_or(preset.name)),
            description: Template::compile(config.description.as_deref().unwrap_or(preset.description)),
            context,
        }
    }

    #[must_use]
    pub fn for_user(config: &UserConfig) -> Self {
        let context = FormatContext {
            addon_name: config.addon_name.clone(),
            languages: config.languages.clone(),
        };
        Self::new(&config.formatter, context)
    }

    #[must_use]
    pub fn format(&self, stream: &ParsedStream) -> FormattedStream {
        let with_debug = self.name.uses_debug() || self.description.uses_debug();
        let value = ParseValue::build(stream, &self.context, with_debug);
        FormattedStream {
            name: self.name.render(&value),
            description: self.description.render(&value),
        }
    }

    /// Format and combine with the stream's locator into a client object.
    #[must_use]
    pub fn to_response(&self, stream: &ParsedStream) -> ResponseStream {
        let FormattedStream { name, description } = self.format(stream);
        ResponseStream::from_parsed(stream, name, description)
    }
}

/// One-off rendering of a single template.
#[must_use]
pub fn render_template(source: &str, stream: &ParsedStream, context: &FormatContext) -> String {
    let template = Template::compile(source);
    let value = ParseValue::build(stream, context, template.uses_debug());
    template.render(&value)
}
