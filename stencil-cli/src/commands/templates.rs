//! Templates command - list template directories in the catalog

use clap::Args;
use stencil_core::{Config, Secrets};

/// List templates in the local catalog
#[derive(Args, Debug)]
pub struct TemplatesArgs {
    /// Print only the count
    #[arg(short, long)]
    count: bool,
}

impl TemplatesArgs {
    /// Execute the templates command
    pub fn execute(&self, config: &Config, secrets: &Secrets) -> anyhow::Result<()> {
        let mirror = config.mirror(secrets)?;

        if self.count {
            println!("{}", mirror.template_count()?);
            return Ok(());
        }

        let templates = mirror.list_templates()?;
        if templates.is_empty() {
            println!("No templates in {}", mirror.catalog_path().display());
        } else {
            for template in templates {
                println!("{}", template);
            }
        }
        Ok(())
    }
}
