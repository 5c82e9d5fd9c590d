use crate::error::{Error, Result};
use crate::placeholder::CONTENT_TOKEN;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name of the binding that designates the batch's subject file or folder.
pub const CONTENT_BINDING: &str = "content";

/// Value written over every path field when a transformer is exported.
pub const EXPORT_PATH_PLACEHOLDER: &str = "/";

const DEFAULT_TEMPERATURE: f64 = 0.7;

/// How discovered input files are sent to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessFormat {
    /// One prompt and one output file per input file
    #[default]
    EachFile,
    /// All input files concatenated into a single prompt and output file
    JoinFiles,
}

/// A named input slot of a transformer.
///
/// The `value` is either literal text or a path to a file whose contents
/// replace the matching `{{name}}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    /// Placeholder name, matched exactly against `{{name}}`
    pub name: String,

    /// Free text shown to users
    #[serde(default)]
    pub description: String,

    /// Kind hint for editors (`file`, `folder`, `text`, ...)
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Literal text or filesystem path
    #[serde(default)]
    pub value: String,

    /// Whether the binding must be filled before a run
    #[serde(default = "default_required")]
    pub required: bool,
}

const fn default_required() -> bool {
    true
}

impl InputBinding {
    /// Creates a required binding with the given name and value.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind: "text".to_string(),
            value: value.into(),
            required: true,
        }
    }

    /// Creates the `content` binding pointing at a file or folder.
    #[must_use]
    pub fn content(path: impl Into<PathBuf>) -> Self {
        Self {
            name: CONTENT_BINDING.to_string(),
            description: "Input file or folder".to_string(),
            kind: "file".to_string(),
            value: path.into().to_string_lossy().into_owned(),
            required: true,
        }
    }

    /// Sets the kind hint.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A persisted transformer definition: prompt template plus input and output wiring.
///
/// Use [`TransformerConfig::builder()`] to construct a validated configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformerConfig {
    /// Opaque unique identifier, fixed at creation
    pub id: String,

    /// Human-readable label, also accepted as a lookup key
    pub name: String,

    /// Free text
    #[serde(default)]
    pub description: String,

    /// Prompt template; must contain `{{content}}`
    #[serde(default)]
    pub prompt: String,

    /// Ordered input bindings
    #[serde(default)]
    pub input: Vec<InputBinding>,

    /// Destination root directory
    #[serde(default)]
    pub output_folder: PathBuf,

    /// Output name pattern; a single `*` stands for the input file stem
    #[serde(default)]
    pub output_file_name: Option<String>,

    /// Sampling temperature in `[0, 1]`
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Upper bound on generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-file or joined processing
    #[serde(default)]
    pub process_format: ProcessFormat,
}

const fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

impl TransformerConfig {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_transformer::{InputBinding, TransformerConfig};
    ///
    /// let config = TransformerConfig::builder()
    ///     .name("Summarize")
    ///     .description("One paragraph summary per file")
    ///     .prompt("Summarize:\n{{content}}")
    ///     .input(InputBinding::content("./docs"))
    ///     .output_folder("./summaries")
    ///     .output_file_name("*_summary.md")
    ///     .build()
    ///     .expect("valid configuration");
    ///
    /// assert_eq!(config.content_binding().unwrap().value, "./docs");
    /// ```
    #[must_use]
    pub fn builder() -> TransformerConfigBuilder {
        TransformerConfigBuilder::default()
    }

    /// Returns the binding named `content`, if any.
    #[must_use]
    pub fn content_binding(&self) -> Option<&InputBinding> {
        self.binding(CONTENT_BINDING)
    }

    /// Returns the binding with exactly this name.
    #[must_use]
    pub fn binding(&self, name: &str) -> Option<&InputBinding> {
        self.input.iter().find(|b| b.name == name)
    }

    /// Checks the field invariants, failing on the first violated field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the field when:
    /// - `id`, `name`, `description` or `prompt` is blank
    /// - `prompt` lacks the `{{content}}` placeholder
    /// - `temperature` is outside `[0, 1]`
    /// - `maxTokens` is zero
    /// - `input` is empty or contains a binding without a name
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("id", "must not be empty"));
        }

        if self.name.trim().is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }

        if self.description.trim().is_empty() {
            return Err(Error::validation("description", "must not be empty"));
        }

        if self.prompt.trim().is_empty() {
            return Err(Error::validation("prompt", "must not be empty"));
        }

        if !self.prompt.contains(CONTENT_TOKEN) {
            return Err(Error::validation(
                "prompt",
                format!("must contain the {CONTENT_TOKEN} placeholder"),
            ));
        }

        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(Error::validation(
                "temperature",
                format!("{} is outside the range [0, 1]", self.temperature),
            ));
        }

        if self.max_tokens == Some(0) {
            return Err(Error::validation("maxTokens", "must be greater than 0"));
        }

        if self.input.is_empty() {
            return Err(Error::validation("input", "at least one input is required"));
        }

        if let Some(index) = self.input.iter().position(|b| b.name.trim().is_empty()) {
            return Err(Error::validation(
                format!("input[{index}].name"),
                "must not be empty",
            ));
        }

        Ok(())
    }

    /// Returns a copy with every input value and the output folder replaced
    /// by [`EXPORT_PATH_PLACEHOLDER`], ready to be shared.
    #[must_use]
    pub fn for_export(&self) -> Self {
        let mut exported = self.clone();
        for binding in &mut exported.input {
            binding.value = EXPORT_PATH_PLACEHOLDER.to_string();
        }
        exported.output_folder = PathBuf::from(EXPORT_PATH_PLACEHOLDER);
        exported
    }
}

/// Builder for creating a [`TransformerConfig`].
#[derive(Debug, Default)]
pub struct TransformerConfigBuilder {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    prompt: Option<String>,
    input: Vec<InputBinding>,
    output_folder: Option<PathBuf>,
    output_file_name: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    process_format: Option<ProcessFormat>,
}

impl TransformerConfigBuilder {
    /// Sets the id. A random id is generated when omitted.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the prompt template.
    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Appends an input binding.
    #[must_use]
    pub fn input(mut self, binding: InputBinding) -> Self {
        self.input.push(binding);
        self
    }

    /// Sets the output root directory.
    #[must_use]
    pub fn output_folder(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_folder = Some(path.into());
        self
    }

    /// Sets the output name pattern.
    #[must_use]
    pub fn output_file_name(mut self, pattern: impl Into<String>) -> Self {
        self.output_file_name = Some(pattern.into());
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the generated token limit.
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the processing format.
    #[must_use]
    pub fn process_format(mut self, format: ProcessFormat) -> Self {
        self.process_format = Some(format);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn build(self) -> Result<TransformerConfig> {
        let config = TransformerConfig {
            id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: self.name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            prompt: self.prompt.unwrap_or_default(),
            input: self.input,
            output_folder: self.output_folder.unwrap_or_default(),
            output_file_name: self.output_file_name,
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: self.max_tokens,
            process_format: self.process_format.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> TransformerConfig {
        TransformerConfig::builder()
            .id("t-1")
            .name("Test")
            .description("Test transformer")
            .prompt("Rewrite: {{content}}")
            .input(InputBinding::content("in"))
            .output_folder("out")
            .build()
            .unwrap()
    }

    fn violated_field(config: &TransformerConfig) -> String {
        match config.validate() {
            Err(Error::Validation { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_builder_defaults() {
        let config = valid();
        assert_eq!(config.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(config.process_format, ProcessFormat::EachFile);
        assert!(config.output_file_name.is_none());
    }

    #[test]
    fn test_builder_generates_id() {
        let config = TransformerConfig::builder()
            .name("Generated")
            .description("d")
            .prompt("{{content}}")
            .input(InputBinding::content("x"))
            .build()
            .unwrap();
        assert!(!config.id.is_empty());
    }

    #[test]
    fn test_prompt_requires_content_placeholder() {
        let mut config = valid();
        config.prompt = "No placeholder here".to_string();
        assert_eq!(violated_field(&config), "prompt");
    }

    #[test]
    fn test_first_violation_is_reported() {
        let mut config = valid();
        config.name = " ".to_string();
        config.temperature = 3.0;
        assert_eq!(violated_field(&config), "name");
    }

    #[test]
    fn test_temperature_range() {
        let mut config = valid();
        config.temperature = 1.0;
        assert!(config.validate().is_ok());
        config.temperature = -0.1;
        assert_eq!(violated_field(&config), "temperature");
        config.temperature = f64::NAN;
        assert_eq!(violated_field(&config), "temperature");
    }

    #[test]
    fn test_input_rules() {
        let mut config = valid();
        config.input.clear();
        assert_eq!(violated_field(&config), "input");

        config.input.push(InputBinding::content("x"));
        config.input.push(InputBinding::new("", "v"));
        assert_eq!(violated_field(&config), "input[1].name");
    }

    #[test]
    fn test_camel_case_wire_format() {
        let json = serde_json::to_value(valid()).unwrap();
        assert_eq!(json["outputFolder"], "out");
        assert_eq!(json["processFormat"], "eachFile");
        assert_eq!(json["input"][0]["type"], "file");
        assert!(json.get("maxTokens").is_none());
    }

    #[test]
    fn test_for_export_normalizes_paths() {
        let mut config = valid();
        config.input.push(InputBinding::new("style", "/home/me/style.md"));
        let exported = config.for_export();

        assert!(exported.input.iter().all(|b| b.value == EXPORT_PATH_PLACEHOLDER));
        assert_eq!(exported.output_folder, PathBuf::from(EXPORT_PATH_PLACEHOLDER));
        assert_eq!(exported.prompt, config.prompt);
    }
}
