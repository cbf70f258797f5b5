//! Cross-build pipeline.
//!
//! For each platform tag, one cross-build container builds every selected
//! configuration. Each built wheel is handed through the host mount to a fresh
//! container of the target's native image, which repairs and tests it. The
//! repaired wheels are collected in the cross-build container and copied to
//! the host once all configurations are done.
//!
//! Per configuration the phases run in a fixed order:
//! environment, before-build, build, repair, test, collect. The first
//! failure aborts the whole run.

mod command;
mod config;
mod environment;
mod layout;
mod options;
mod restricted;
mod selector;
mod troubleshoot;

pub use command::{format_safe, prepare_command};
pub use config::{CROSS_ENV_SUFFIX, PythonConfiguration, read_python_configs, select_configurations};
pub use environment::{EnvironmentAssignment, ParsedEnvironment};
pub use layout::{CrossLayout, platform_tag_to_arch};
pub use options::{
    BuildOptions, DEFAULT_IMAGES, DependencyConstraints, build_verbosity_flags, format_test_extras,
};
pub use restricted::{
    RestrictedCommand, RestrictedContext, classify_line, execute_restricted_command,
};
pub use selector::{BuildSelector, TestSelector, expand_braces};
pub use troubleshoot::{find_shared_objects, is_wheel_build_command, troubleshoot};

use crate::container::{
    CommandInvocation, ContainerBackend, ContainerPath, Environment, ShellChannel,
};
use crate::error::{BuildError, Result};
use crate::logger::BuildLogger;
use path_absolutize::Absolutize;
use std::path::{Path, PathBuf};

/// (implementation prefix, platform tag, image key of the cross-build image)
pub const PLATFORMS: [(&str, &str, &str); 1] = [("cp", "manylinux_aarch64", "cross_aarch64")];

/// Drives builds for a set of options over a container backend
pub struct BuildPipeline<'a, B: ContainerBackend> {
    backend: B,
    options: BuildOptions,
    logger: &'a BuildLogger,
    layout: CrossLayout,
}

/// Container-side locations resolved once per run
struct RunPaths {
    project: ContainerPath,
    package: ContainerPath,
    output: ContainerPath,
    constraints: ContainerPath,
}

impl<'a, B: ContainerBackend> BuildPipeline<'a, B> {
    /// Pipeline for `options`, reporting through `logger`
    pub fn new(backend: B, options: BuildOptions, logger: &'a BuildLogger) -> Self {
        Self {
            backend,
            options,
            logger,
            layout: CrossLayout::default(),
        }
    }

    /// Use `host_tmp` as the host side of `/host/tmp`
    pub fn with_host_tmp(mut self, host_tmp: impl Into<PathBuf>) -> Self {
        self.layout = CrossLayout::new(host_tmp);
        self
    }

    /// The backend, e.g. to inspect a test double after a run
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Build, repair, test and collect every selected configuration
    pub async fn run(&self) -> Result<()> {
        self.backend.check_available().await?;
        let paths = self.resolve_paths()?;
        let configurations =
            select_configurations(&self.options.build_selector, &self.options.architectures)?;

        for (implementation, platform_tag, image_key) in PLATFORMS {
            let platform_configs: Vec<&PythonConfiguration> = configurations
                .iter()
                .filter(|c| {
                    c.identifier.starts_with(implementation) && c.identifier.ends_with(platform_tag)
                })
                .collect();
            if platform_configs.is_empty() {
                continue;
            }

            let image = self.options.image(image_key)?;
            let built = self.build_platform(platform_tag, image, &platform_configs, &paths).await;
            if let Err(error) = built {
                self.logger.step_end_with_error(&error.to_string());
                troubleshoot(&self.options.package_dir, &error, self.logger.output());
                return Err(error);
            }
        }

        self.logger.summary(&self.options.output_dir);
        Ok(())
    }

    fn resolve_paths(&self) -> Result<RunPaths> {
        let project_dir = self.options.project_dir.absolutize()?.into_owned();
        let package_dir = self.options.package_dir.absolutize()?.into_owned();
        let relative = package_dir
            .strip_prefix(&project_dir)
            .map_err(|_| BuildError::PathLayout {
                package_dir: package_dir.clone(),
                project_dir: project_dir.clone(),
            })?;

        let project = ContainerPath::new(layout::PROJECT_DIR);
        let package = relative
            .components()
            .fold(project.clone(), |path, component| {
                path.join(&component.as_os_str().to_string_lossy())
            });

        Ok(RunPaths {
            project,
            package,
            output: ContainerPath::new(layout::OUTPUT_DIR),
            constraints: ContainerPath::new(layout::CONSTRAINTS_FILE),
        })
    }

    async fn build_platform(
        &self,
        platform_tag: &str,
        image: &str,
        configs: &[&PythonConfiguration],
        paths: &RunPaths,
    ) -> Result<()> {
        self.logger.step(&format!("Starting container image {image}..."));
        let mut cross = self
            .backend
            .open(image, platform_tag.ends_with("i686"), &paths.project)
            .await?;

        let outcome = self.build_in_container(&mut cross, platform_tag, configs, paths).await;
        let closed = cross.close().await;
        outcome?;
        closed?;
        Ok(())
    }

    async fn build_in_container(
        &self,
        cross: &mut B::Channel,
        platform_tag: &str,
        configs: &[&PythonConfiguration],
        paths: &RunPaths,
    ) -> Result<()> {
        self.logger.step("Copying project into container...");
        cross.copy_in(&self.options.project_dir, &paths.project).await?;

        let target_arch = platform_tag_to_arch(platform_tag);
        let native_image = self.options.image(target_arch)?;
        let ctx = RestrictedContext {
            backend: &self.backend,
            native_image,
            target_arch,
            layout: &self.layout,
            logger: self.logger,
        };

        if let Some(before_all) = &self.options.before_all {
            self.logger.step("Running before_all...");
            let mut env = cross.environment().await?;
            env.prepend_path(layout::UTILITY_PYTHON_BIN);
            env.insert("PIP_DISABLE_PIP_VERSION_CHECK", "1");
            let env = self.options.environment.as_environment(env, cross).await?;

            let prepared = self.prepare_user_command(before_all, paths);
            execute_restricted_command(&ctx, cross, &prepared, false, &env).await?;
        }

        for config in configs {
            self.build_configuration(&ctx, cross, config, platform_tag, paths).await?;
        }

        self.logger.step("Copying wheels back to host...");
        cross.copy_out(&paths.output, &self.options.output_dir).await?;
        self.logger.step_end();
        Ok(())
    }

    async fn build_configuration(
        &self,
        ctx: &RestrictedContext<'_, B>,
        cross: &mut B::Channel,
        config: &PythonConfiguration,
        platform_tag: &str,
        paths: &RunPaths,
    ) -> Result<()> {
        self.logger.build_start(&config.identifier);

        let constraints_file = self
            .options
            .dependency_constraints
            .as_ref()
            .map(|c| c.get_for_python_version(&config.version));
        let mut constraint_flags = Vec::new();
        if let Some(file) = &constraints_file {
            cross.copy_in(file, &paths.constraints).await?;
            constraint_flags = vec!["-c".to_string(), paths.constraints.to_string()];
        }

        self.logger.step("Setting up build environment...");
        let mut env = cross.environment().await?;
        env.prepend_path(config.bin_dir().as_str());
        env.prepend_path(config.build_bin_dir().as_str());
        let env = self.options.environment.as_environment(env, cross).await?;

        for tool in ["python", "pip"] {
            verify_on_path(cross, &env, tool, &config.bin_dir()).await?;
        }

        if let Some(before_build) = &self.options.before_build {
            self.logger.step("Running before_build...");
            let prepared = self.prepare_user_command(before_build, paths);
            execute_restricted_command(ctx, cross, &prepared, true, &env).await?;
        }

        self.logger.step("Building wheel...");
        let built_wheel_dir = self.layout.built_wheel_dir();
        cross.call(["rm", "-rf", built_wheel_dir.as_str()]).await?;
        cross.call(["mkdir", "-p", built_wheel_dir.as_str()]).await?;

        let mut build_args = vec![
            "python".to_string(),
            "setup.py".to_string(),
            "bdist_wheel".to_string(),
            format!("--dist-dir={built_wheel_dir}"),
        ];
        build_args.extend(build_verbosity_flags(self.options.build_verbosity));
        cross
            .exec(CommandInvocation::new(build_args).env(&env).cwd(&paths.package))
            .await?;

        let built_wheel = cross
            .glob(&built_wheel_dir, "*.whl")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BuildError::NoWheelProduced {
                dir: built_wheel_dir.to_string(),
            })?;

        // the native container reaches the built wheel through the host mount
        let built_wheel = built_wheel.rebased(layout::HOST_MOUNT);
        let repaired_wheel_dir = self.layout.repaired_wheel_dir();
        cross.call(["rm", "-rf", repaired_wheel_dir.as_str()]).await?;
        cross.call(["mkdir", "-p", repaired_wheel_dir.as_str()]).await?;

        if built_wheel.file_name().ends_with("none-any.whl") {
            return Err(BuildError::NonPlatformWheel {
                wheel: built_wheel.file_name().to_string(),
            });
        }

        let host_tmp = self.layout.host_tmp_in_container();
        cross
            .call(["cp", "-r", self.layout.temp_dir().as_str(), host_tmp.as_str()])
            .await?;
        cross
            .call(["cp", self.layout.repair_script().as_str(), host_tmp.as_str()])
            .await?;

        let mut native = self
            .backend
            .open(ctx.native_image, platform_tag.ends_with("i686"), &paths.project)
            .await?;
        let repaired = self
            .repair_and_test(
                &mut native,
                config,
                &built_wheel,
                &repaired_wheel_dir,
                constraints_file.as_deref(),
                &constraint_flags,
                paths,
            )
            .await;
        let closed = native.close().await;
        let repaired_wheels = repaired?;
        closed?;

        cross.call(["mkdir", "-p", paths.output.as_str()]).await?;
        let mut mv = vec!["mv".to_string()];
        mv.extend(repaired_wheels.iter().map(ToString::to_string));
        mv.push(paths.output.to_string());
        cross.call(mv).await?;

        let names: Vec<String> =
            repaired_wheels.iter().map(|w| w.file_name().to_string()).collect();
        self.logger.build_end(&names);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn repair_and_test(
        &self,
        native: &mut B::Channel,
        config: &PythonConfiguration,
        built_wheel: &ContainerPath,
        repaired_wheel_dir: &ContainerPath,
        constraints_file: Option<&Path>,
        constraint_flags: &[String],
        paths: &RunPaths,
    ) -> Result<Vec<ContainerPath>> {
        match &self.options.repair_command {
            Some(repair_command) => {
                self.logger.step("Repairing wheel...");
                let prepared = prepare_command(
                    repair_command,
                    &[("wheel", built_wheel.as_str()), ("dest_dir", repaired_wheel_dir.as_str())],
                );
                native
                    .call([
                        self.layout.repair_script_in_container().as_str(),
                        self.layout.host_deps_in_container().as_str(),
                        prepared.as_str(),
                    ])
                    .await?;
            }
            None => {
                native
                    .call(["mv", built_wheel.as_str(), repaired_wheel_dir.as_str()])
                    .await?;
            }
        }

        let repaired_wheels = native.glob(repaired_wheel_dir, "*.whl").await?;
        let Some(wheel_to_test) = repaired_wheels.first() else {
            return Err(BuildError::NoWheelProduced {
                dir: repaired_wheel_dir.to_string(),
            });
        };

        if let Some(test_command) = &self.options.test_command
            && self.options.test_selector.matches(&config.identifier)
        {
            self.logger.step("Testing wheel...");
            native.copy_in(&self.options.project_dir, &paths.project).await?;
            if let Some(file) = constraints_file {
                native.copy_in(file, &paths.constraints).await?;
            }
            self.test_wheel(native, config, wheel_to_test, test_command, constraint_flags, paths)
                .await?;
        }

        Ok(repaired_wheels)
    }

    async fn test_wheel(
        &self,
        native: &mut B::Channel,
        config: &PythonConfiguration,
        wheel: &ContainerPath,
        test_command: &str,
        constraint_flags: &[String],
        paths: &RunPaths,
    ) -> Result<()> {
        let mut env = native.environment().await?;
        env.prepend_path(config.native_bin_dir().as_str());

        let mut install_virtualenv =
            vec!["pip".to_string(), "install".to_string(), "virtualenv".to_string()];
        install_virtualenv.extend_from_slice(constraint_flags);
        native.exec(CommandInvocation::new(install_virtualenv).env(&env)).await?;

        let venv_dir =
            ContainerPath::new(native.capture_in(["mktemp", "-d"], None).await?).join("venv");
        let outcome = self
            .run_in_virtualenv(native, &env, &venv_dir, wheel, test_command, paths)
            .await;

        // the virtualenv goes even when the tests failed
        let cleanup = native.call(["rm", "-rf", venv_dir.as_str()]).await;
        outcome?;
        cleanup?;
        Ok(())
    }

    async fn run_in_virtualenv(
        &self,
        native: &mut B::Channel,
        env: &Environment,
        venv_dir: &ContainerPath,
        wheel: &ContainerPath,
        test_command: &str,
        paths: &RunPaths,
    ) -> Result<()> {
        let create_venv = ["python", "-m", "virtualenv", "--no-download", venv_dir.as_str()];
        native.exec(CommandInvocation::new(create_venv).env(env)).await?;

        let mut venv_env = env.clone();
        venv_env.prepend_path(venv_dir.join("bin").as_str());

        if let Some(before_test) = &self.options.before_test {
            let prepared = self.prepare_user_command(before_test, paths);
            native
                .exec(CommandInvocation::new(["sh", "-c", prepared.as_str()]).env(&venv_env))
                .await?;
        }

        // repair may emit one equivalent wheel per manylinux policy; test the first
        let requirement = format!("{wheel}{}", self.options.test_extras);
        native
            .exec(CommandInvocation::new(["pip", "install", requirement.as_str()]).env(&venv_env))
            .await?;

        if !self.options.test_requires.is_empty() {
            let mut install = vec!["pip".to_string(), "install".to_string()];
            install.extend(self.options.test_requires.iter().cloned());
            native.exec(CommandInvocation::new(install).env(&venv_env)).await?;
        }

        let prepared = self.prepare_user_command(test_command, paths);
        native
            .exec(
                CommandInvocation::new(["sh", "-c", prepared.as_str()])
                    .env(&venv_env)
                    .cwd(&ContainerPath::new("/root")),
            )
            .await?;
        Ok(())
    }

    fn prepare_user_command(&self, command: &str, paths: &RunPaths) -> String {
        prepare_command(
            command,
            &[("project", paths.project.as_str()), ("package", paths.package.as_str())],
        )
    }
}

/// Fail unless `tool` resolves to `expected_dir/tool` under `env`
async fn verify_on_path<C: ShellChannel>(
    channel: &mut C,
    env: &Environment,
    tool: &str,
    expected_dir: &ContainerPath,
) -> Result<()> {
    let found = channel.capture_in(["which", tool], Some(env)).await?;
    let expected = expected_dir.join(tool);
    if found != expected.as_str() {
        return Err(BuildError::PathIntegrity {
            tool: tool.to_string(),
            expected: expected.to_string(),
            found,
        });
    }
    Ok(())
}
