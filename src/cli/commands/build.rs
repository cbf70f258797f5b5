//! Build command implementation.

use crate::architecture::Host;
use crate::cli::{Args, RuntimeConfig};
use crate::container::EngineBackend;
use crate::error::Result;
use crate::logger::BuildLogger;
use crate::pipeline::{BuildPipeline, select_configurations};

/// Resolve options, then print identifiers or run the pipeline
pub(super) async fn execute_build(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    let project_dir = std::env::current_dir()?;
    let host = Host::detect();
    log::debug!("host: {host:?}");

    let options = args.build_options(project_dir, &host)?;
    let configurations = select_configurations(&options.build_selector, &options.architectures)?;

    if args.print_build_identifiers {
        // data for scripts, printed even when quiet
        for configuration in &configurations {
            println!("{}", configuration.identifier);
        }
        return Ok(0);
    }

    if configurations.is_empty() {
        config.warning_println(&format!(
            "No build identifiers selected for archs '{}'; nothing to do",
            args.archs_config()
        ));
        return Ok(0);
    }

    let identifiers: Vec<&str> = configurations.iter().map(|c| c.identifier.as_str()).collect();
    config.verbose_println(&format!("Selected: {}", identifiers.join(" ")));

    let logger = BuildLogger::new(config.output().clone());
    let backend = EngineBackend::new(args.engine()?).with_output(config.output().clone());
    BuildPipeline::new(backend, options, &logger).run().await?;
    Ok(0)
}
