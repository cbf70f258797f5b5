//! Command execution.
//!
//! Argument validation happens here, before any container is started.

mod build;

use crate::cli::{Args, RuntimeConfig};
use crate::error::Result;

use build::execute_build;

/// Execute the build described by the parsed arguments
pub async fn execute_command(args: Args) -> Result<i32> {
    if let Err(validation_error) = args.validate() {
        // Create output for validation errors (never quiet)
        let output = super::OutputManager::new(false, false);
        output.error(&format!("Invalid arguments: {validation_error}"));
        return Ok(2);
    }

    let config = RuntimeConfig::from(&args);

    match execute_build(&args, &config).await {
        Ok(exit_code) => Ok(exit_code),
        Err(e) => {
            config.error_println(&format!("cibuildwheel: {e}"));

            let suggestions = e.recovery_suggestions();
            if !suggestions.is_empty() {
                config.println("\n💡 Recovery suggestions:");
                for suggestion in suggestions {
                    config.indent(&format!("• {suggestion}"));
                }
            }

            Ok(e.exit_code())
        }
    }
}
