use lswatch_lsp::LspError;
use thiserror::Error;

/// Errors that can occur while running the discovery probe.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The probe could not be spawned or the connection failed.
    #[error("Discovery probe failed: {0}")]
    Probe(#[from] LspError),

    /// The probe rejected the `configure` request.
    #[error("Discovery probe rejected its configuration: {0}")]
    Configure(String),

    /// Discovery is turned off in the configuration.
    #[error("Native discovery is disabled")]
    Disabled,
}
