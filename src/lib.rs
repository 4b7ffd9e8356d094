//! runtests: build a Python package, install it into a throwaway prefix and
//! run its tests against the installed copy, optionally under MPI.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Invocation**: command line and `runtests.toml` merged into an
//!   immutable [`InvocationSpec`]
//! - **Build**: `setup.py build install` into a fresh [`install::InstallRoot`]
//! - **Environment**: the import path that points tests at the install root
//! - **Invoker / Fan-out**: plain pytest, a single MPI rank, or one pytest per
//!   rank under a launcher
//! - **Bench**: per-rank benchmark timings merged into JSON reports
//! - **Comm**: communicator-size parametrization for distributed tests
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use runtests::config::load_config_or_default;
//! use runtests::fanout::SystemProbe;
//! use runtests::invocation::{InvocationSpec, RunArgs};
//! use runtests::orchestrator::Orchestrator;
//! use runtests::process::LocalRunner;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let root = Path::new(".");
//!     let config = load_config_or_default(&root.join("runtests.toml"))?;
//!     let args = RunArgs {
//!         package: Some("mypkg".into()),
//!         ..Default::default()
//!     };
//!     let spec = InvocationSpec::resolve(&args, &config, root)?;
//!
//!     let runner = LocalRunner::new();
//!     let probe = SystemProbe::new(&runner);
//!     let result = Orchestrator::new(&runner, &probe).run(&spec).await?;
//!     std::process::exit(result.exit_code);
//! }
//! ```

pub mod bench;
pub mod build;
pub mod bundled;
pub mod comm;
pub mod config;
pub mod environment;
pub mod fanout;
pub mod install;
pub mod invocation;
pub mod invoker;
pub mod orchestrator;
pub mod process;

// Re-export commonly used types
pub use comm::{CommCache, Communicator, LocalWorld, MpiTest, MpiTestTable};
pub use config::{Config, load_config};
pub use invocation::{ConfigError, InvocationSpec, RunArgs};
pub use invoker::RunResult;
pub use orchestrator::{Orchestrator, RunError};
