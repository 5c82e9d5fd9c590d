use crate::config::TransformerConfig;
use crate::naming::output_name;
use crate::placeholder::{output_instruction, resolve};
use std::path::Path;

/// Per-file hooks the batch executor calls while processing an input.
///
/// Every hook has a default, so an implementation only overrides what it
/// changes. [`DefaultExecuter`] uses all defaults.
pub trait Executer: Send + Sync {
    /// Decides whether a file's raw text should be processed at all.
    /// A rejected file is recorded as a failure of that file.
    fn validate_input(&self, _config: &TransformerConfig, _path: &Path, _data: &str) -> bool {
        true
    }

    /// Turns raw file text into the `{{content}}` value. Trims by default.
    fn pre_process_input(&self, data: &str) -> String {
        data.trim().to_string()
    }

    /// Names the output file for an input path.
    fn output_file_name(&self, config: &TransformerConfig, input_path: &Path) -> String {
        output_name(config.output_file_name.as_deref(), input_path)
    }

    /// Builds the prompt: the expanded template followed by the output instruction line.
    fn user_message(&self, config: &TransformerConfig, content: &str, output_file_name: &str) -> String {
        let mut message = resolve(&config.prompt, content, &config.input);
        message.push('\n');
        message.push_str(&output_instruction(output_file_name));
        message
    }

    /// Decides whether a model response may be written.
    /// A rejected response is recorded as a failure of that file.
    fn validate_output(&self, _config: &TransformerConfig, _response: &str) -> bool {
        true
    }
}

/// The stock hook set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExecuter;

impl Executer for DefaultExecuter {}
