//! Built-in tools offered to the model during extraction.
//!
//! - `run_script`: sandboxed evaluation for dates, numbers, JSON and regex
//! - `web_fetch`: bounded outbound HTTP GET/POST
//! - `think`: side-effect-free scratchpad
//! - `schema_validation`: checks a draft answer against the extraction schema

pub mod sandbox;
pub mod script;
pub mod think;
pub mod verify;
pub mod web_fetch;

pub use sandbox::{SandboxCommand, SANDBOX_ARG};
pub use script::{RunScriptTool, ScriptLimits};
pub use think::ThinkTool;
pub use verify::SchemaVerifierTool;
pub use web_fetch::WebFetchTool;

use maidx_core::config::ToolsConfig;
use maidx_core::ExtractionSchema;

use crate::registry::{RegistryError, ToolRegistry};

/// Registry with every built-in tool and its configured usage limit.
pub fn standard_registry(
    config: &ToolsConfig,
    schema: &ExtractionSchema,
) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    let sandbox = SandboxCommand::from_config(config).map_err(|e| RegistryError::Setup {
        name: "run_script".to_string(),
        reason: e.to_string(),
    })?;
    registry.register_with_limit(
        RunScriptTool::new(ScriptLimits::from_config(config), sandbox),
        config.script_call_limit,
    )?;
    let fetch = WebFetchTool::from_config(config).map_err(|e| RegistryError::Setup {
        name: "web_fetch".to_string(),
        reason: e.to_string(),
    })?;
    registry.register_with_limit(fetch, config.web_fetch_call_limit)?;
    registry.register_with_limit(ThinkTool, config.think_call_limit)?;
    registry.register_with_limit(
        SchemaVerifierTool::new(schema.display_title()),
        config.verify_call_limit,
    )?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maidx_core::ExtractionConfig;

    #[test]
    fn test_standard_registry() {
        let mut config = ExtractionConfig::default().tools;
        config.web_fetch_call_limit = 0;
        let schema = crate::tool::test_context("").schema;
        let registry = standard_registry(&config, &schema).unwrap();

        let names: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["run_script", "web_fetch", "think", "schema_validation"]);

        let advertised: Vec<_> = registry
            .definitions_for(&registry.budget())
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(advertised, ["run_script", "think", "schema_validation"]);
    }
}
