//! Presenting acquired tokens

use crate::auth::TokenSet;
use crate::error::{Result, TinytokenError};
use crate::profile::ProfileStore;
use clap::ValueEnum;

/// Where and how tokens are emitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON document on stdout
    #[default]
    Json,
    /// `export` statements for a POSIX shell
    Shell,
    /// Written into the profile's section of the credentials file
    Config,
}

impl OutputFormat {
    /// Parse a format name as written in a profile (case-insensitive)
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(name, true)
            .map_err(|_| TinytokenError::invalid_config(format!("unknown output format {name:?}")))
    }
}

/// Render `tokens` for stdout (`json` and `shell` formats)
///
/// # Errors
///
/// Returns `InvalidConfig` for [`OutputFormat::Config`], which writes a file
/// instead; use [`emit`].
pub fn render(format: OutputFormat, tokens: &TokenSet) -> Result<String> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(tokens)
            .map_err(|e| TinytokenError::invalid_config(format!("unable to encode tokens: {e}"))),
        OutputFormat::Shell => Ok(format!(
            "export ACCESS_TOKEN={}\nexport ID_TOKEN={}",
            shell_quote(&tokens.access_token),
            shell_quote(&tokens.id_token)
        )),
        OutputFormat::Config => Err(TinytokenError::invalid_config(
            "config output is written to the credentials file, not rendered",
        )),
    }
}

/// Emit `tokens` in `format`: print them, or save them under `profile`
///
/// # Errors
///
/// Returns `InvalidConfig` if `format` is `config` and no profile was given,
/// or any error from writing the credentials file.
pub fn emit(
    format: OutputFormat,
    tokens: &TokenSet,
    profile: Option<&str>,
    store: &ProfileStore,
) -> Result<()> {
    match format {
        OutputFormat::Config => {
            let name = profile.ok_or_else(|| {
                TinytokenError::invalid_config(
                    "a profile must be provided if output destination is set to \"config\"",
                )
            })?;
            store.save_credentials(name, tokens)
        }
        _ => {
            println!("{}", render(format, tokens)?);
            Ok(())
        }
    }
}

/// Single-quote `value` unless it only holds characters that are safe unquoted
fn shell_quote(value: &str) -> String {
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '=' | '+'));
    if safe && !value.is_empty() {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}
