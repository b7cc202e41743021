//! tinytoken command line
//!
//! Prints (or exports) a valid OpenID Connect token set, signing in through
//! the browser only when cached tokens cannot be reused or refreshed.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tinytoken::cache::default_base_dir;
use tinytoken::session::{DEFAULT_CALLBACK_TIMEOUT, DEFAULT_REDIRECT_URI};
use tinytoken::{
    CommandUserAgent, OutputFormat, Profile, ProfileStore, Session, SessionOptions,
    TinytokenError, TokenCache, output,
};
use tracing_subscriber::EnvFilter;

/// OpenID Connect client
#[derive(Debug, Parser)]
#[command(name = "tinytoken", version, about)]
struct Args {
    /// Saved profile name
    #[arg(short, long, value_name = "NAME")]
    profile: Option<String>,

    /// OIDC client id
    #[arg(short, long, value_name = "ID")]
    client_id: Option<String>,

    /// OIDC discovery uri
    #[arg(long, value_name = "URI")]
    discovery_uri: Option<String>,

    /// Web browser or any other utility that is able to handle URLs
    #[arg(long, value_name = "PATH")]
    user_agent: Option<String>,

    /// User-agent redirect destination. Should be on the loopback interface [default: http://localhost:9999/]
    #[arg(long, value_name = "URI")]
    redirect_uri: Option<String>,

    /// Output format [default: json]
    #[arg(long, value_enum)]
    output: Option<OutputFormat>,

    /// Skip reading tokens from the cache
    #[arg(long)]
    skip_cache: bool,

    /// Seconds to wait for the browser callback [default: 30]
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Do not compare the callback state with the request state (unsafe)
    #[arg(long)]
    insecure_skip_state_check: bool,

    /// Output verbosity level. Can be specified multiple times
    #[arg(short, action = clap::ArgAction::Count)]
    v: u8,
}

/// Settings after merging flags, profile and built-in defaults
#[derive(Debug)]
struct Resolved {
    options: SessionOptions,
    user_agent: Option<String>,
    output: OutputFormat,
}

impl Args {
    fn resolve(&self, profile: Profile) -> Result<Resolved, TinytokenError> {
        let (Some(client_id), Some(discovery_url)) = (
            self.client_id.clone().or(profile.client_id),
            self.discovery_uri.clone().or(profile.discovery_uri),
        ) else {
            return Err(TinytokenError::invalid_config(
                "the following arguments are required: --client-id/-c, --discovery-uri",
            ));
        };

        let output = match (self.output, profile.output.as_deref()) {
            (Some(output), _) => output,
            (None, Some(name)) => OutputFormat::parse(name)?,
            (None, None) => OutputFormat::default(),
        };

        if output == OutputFormat::Config && self.profile.is_none() {
            return Err(TinytokenError::invalid_config(
                "a profile must be provided if output destination is set to \"config\"",
            ));
        }

        let callback_timeout = self
            .timeout
            .or(profile.callback_timeout)
            .map_or(DEFAULT_CALLBACK_TIMEOUT, Duration::from_secs);

        let options = SessionOptions::builder()
            .client_id(client_id)
            .discovery_url(discovery_url)
            .redirect_uri(
                self.redirect_uri
                    .clone()
                    .or(profile.redirect_uri)
                    .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            )
            .skip_cache(self.skip_cache || profile.skip_cache.unwrap_or(false))
            .callback_timeout(callback_timeout)
            .verify_state(!self.insecure_skip_state_check)
            .build();

        Ok(Resolved {
            options,
            user_agent: self.user_agent.clone().or(profile.user_agent),
            output,
        })
    }
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tinytoken={default_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let base_dir = default_base_dir()?;
    let cache = TokenCache::open(&base_dir)
        .with_context(|| format!("creating {}", base_dir.display()))?;
    let profiles = ProfileStore::new(&base_dir);

    let profile = match &args.profile {
        Some(name) => profiles.profile(name)?,
        None => Profile::default(),
    };
    let resolved = args.resolve(profile)?;

    let user_agent = match &resolved.user_agent {
        Some(command) => CommandUserAgent::new(command)?,
        None => CommandUserAgent::system_default()?,
    };

    let session = Session::new(resolved.options, cache, user_agent)?;
    let acquired = session.acquire().await?;
    tracing::info!(source = ?acquired.source, persisted = acquired.persisted, "Tokens ready");

    output::emit(
        resolved.output,
        &acquired.tokens,
        args.profile.as_deref(),
        &profiles,
    )?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.v);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
