//! # cibuildwheel
//!
//! Builds CPython wheels for aarch64 Linux on any Linux host.
//!
//! Each wheel is compiled in a manylinux cross-build container, then repaired
//! and tested in a container of the target architecture. Containers are
//! driven through a persistent interactive shell per container.
//!
//! ## Features
//!
//! - **Cross builds**: one cross-build container per platform builds every selected interpreter
//! - **Native repair and test**: auditwheel and the test suite run on the target architecture
//! - **Restricted setup steps**: before-all/before-build accept `yum`, `pip` and `python` commands
//! - **Docker or Podman**: either engine drives the containers
//!
//! ## Usage
//!
//! ```bash
//! cibuildwheel --archs aarch64                     # Build every interpreter
//! cibuildwheel --archs aarch64 --build 'cp39-*'    # Build one interpreter
//! cibuildwheel --print-build-identifiers           # List what would be built
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Core modules
pub mod architecture;
pub mod cli;
pub mod container;
pub mod error;
pub mod logger;
pub mod pipeline;

// Re-export main types for public API
pub use architecture::{Architecture, Host, PlatformName};
pub use cli::Args;
pub use container::{
    CommandInvocation, ContainerBackend, ContainerPath, EngineBackend, Environment, RemoteShell,
    ShellChannel,
};
pub use error::{BuildError, ChannelError, ConfigurationError, Result};
pub use logger::BuildLogger;
pub use pipeline::{BuildOptions, BuildPipeline};
