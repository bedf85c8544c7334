//! Native Python environment discovery.
//!
//! A [`NativeLocator`] runs one probe search per call to
//! [`NativeLocator::iter_envs`] and turns the probe's reports into
//! [`DiscoveredEnvironment`] records. Tool binaries the probe finds along
//! the way are registered in the [`tools`] slots.

pub mod error;
pub mod finder;
pub mod locator;
pub mod mapping;
pub mod process;
pub mod tools;

pub use error::DiscoveryError;
pub use finder::{FinderEvent, NativeEnvInfo, NativeEnvManagerInfo, PythonFinder};
pub use locator::{EnvironmentStream, NativeLocator};
pub use mapping::{category_to_kind, DiscoveredEnvironment};
pub use process::{ConfigureParams, ProcessFinder};
pub use tools::KnownTool;
