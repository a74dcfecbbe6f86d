use anyhow::Context;
use clap::Args;

use crate::config::{CONFIG_TOML, Config};
use crate::error::ExitError;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Write a commented default `.fanout.toml` at the repository root.
    pub fn execute(&self) -> anyhow::Result<()> {
        let repo = super::run::find_repo_root()?;
        let path = repo.join(CONFIG_TOML);

        if path.exists() && !self.force {
            return Err(ExitError::Input(format!(
                "{CONFIG_TOML} already exists (use --force to overwrite)"
            ))
            .into());
        }

        let toml = Config::default().to_toml()?;
        std::fs::write(&path, toml).with_context(|| format!("writing {}", path.display()))?;
        println!("✓ wrote {}", path.display());
        Ok(())
    }
}
