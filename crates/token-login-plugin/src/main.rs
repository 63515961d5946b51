//! `nuget-token-credential-provider` - NuGet credential provider plugin that
//! exchanges a CI runtime token for a package registry token.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use token_login_core::prelude::*;
use token_login_plugin::{
    ConnectionOptions, HandlerRegistry, PluginHost, ResponseTiming, validate_activation,
};
use token_login_telemetry::{LogConfig, setup_logging};
use tokio_util::sync::CancellationToken;

fn main() -> anyhow::Result<ExitCode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(usage) = validate_activation(&args) {
        eprintln!("{usage}");
        return Ok(ExitCode::FAILURE);
    }

    if let Some(config) = LogConfig::from_env().context("invalid diagnostics settings")? {
        setup_logging(&config).context("failed to set up diagnostics")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let result = runtime.block_on(run());
    // stdin reads run on a blocking thread that may never return.
    runtime.shutdown_timeout(Duration::from_millis(100));

    result?;
    Ok(ExitCode::SUCCESS)
}

async fn run() -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let logger = PluginLogger::new(&Settings::from_env(), &shutdown);

    let fetcher = ReqwestTokenFetcher::new().context("failed to build the HTTP client")?;
    let registry = ResolverRegistry::new().with(Arc::new(GitHubActionsResolver::new(
        logger.clone(),
        Arc::new(fetcher),
    )));
    let resolution = Arc::new(CredentialResolution::new(
        logger.clone(),
        registry,
        Arc::new(ProcessEnv),
    ));
    let handlers = HandlerRegistry::standard(&logger, resolution, ResponseTiming::default());

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let host = PluginHost::new(
        logger,
        handlers,
        ConnectionOptions::from_env(&ProcessEnv),
        shutdown,
    );
    host.run(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("plugin session failed")?;
    Ok(())
}
