use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::{BridgeError, Result};

/// Installs the global subscriber. Logs go to stderr so stdout stays free for
/// command-line answers. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|err| BridgeError::Config(format!("invalid log filter `{default_filter}`: {err}")))?;
    let registry = Registry::default().with(filter);

    let installed = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    installed.map_err(|err| {
        BridgeError::Config(format!("failed to install tracing subscriber: {err}"))
    })
}
