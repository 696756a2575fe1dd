//! Operator configuration loading.

use std::path::Path;

use deploy_core::crypto::parse_ignore_patterns;
use deploy_core::AppConf;
use glob::Pattern;

use crate::Error;

/// Ignore file looked up at the root of the application code directory,
/// one glob per line, `#` comments allowed.
pub const IGNORE_FILE: &str = ".deployignore";

/// Parse and validate the operator's TOML configuration.
pub fn load_app_conf(path: &Path) -> Result<AppConf, Error> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    let conf: AppConf = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("invalid configuration {}: {e}", path.display())))?;
    conf.validate()?;
    Ok(conf)
}

/// Load ignore patterns from the code directory, if an ignore file exists.
pub fn load_ignore_patterns(code_path: &Path) -> Result<Vec<Pattern>, Error> {
    let ignore_file = code_path.join(IGNORE_FILE);
    if !ignore_file.is_file() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&ignore_file)?;
    Ok(parse_ignore_patterns(&content)?)
}
