pub mod run;
pub mod serve;
pub mod validate;

use anyhow::{bail, Context, Result};
use std::path::Path;

use sqlgrade::config::Config;
use sqlgrade::verify::Verifier;

/// Open the configured database pool behind a verifier
pub fn open_verifier(config: &Config) -> Result<Verifier> {
    let pool = config.database.open_pool()?;
    Ok(Verifier::new(pool, config.verify_options()))
}

/// SQL text given inline or read from a file (`-` reads stdin)
pub fn read_sql(inline: Option<String>, file: Option<&Path>, what: &str) -> Result<String> {
    match (inline, file) {
        (Some(sql), None) => Ok(sql),
        (None, Some(path)) if path == Path::new("-") => {
            let mut sql = String::new();
            std::io::Read::read_to_string(&mut std::io::stdin(), &mut sql)
                .with_context(|| format!("Failed to read {} from stdin", what))?;
            Ok(sql)
        }
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} from {}", what, path.display())),
        (Some(_), Some(_)) => bail!("Give the {} inline or as a file, not both", what),
        (None, None) => bail!("No {} given", what),
    }
}
