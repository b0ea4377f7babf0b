use anyhow::Result;

use super::ServeArgs;
use crate::core::config::{self, API_KEY_ENV};
use crate::core::prompts;
use crate::core::store::Storage;
use crate::core::terminal::{print_info, print_status, print_success};

/// Creates the workspace, database, and default prompt templates. Safe to
/// run repeatedly; existing files are left alone.
pub async fn run_init(args: ServeArgs) -> Result<()> {
    let workspace = args.workspace.unwrap_or_else(config::default_workspace);
    std::fs::create_dir_all(&workspace)?;

    let prompts_dir = workspace.join("prompts");
    prompts::seed_default_templates(&prompts_dir)?;
    Storage::open(workspace.join("adjutant.db")).await?;

    print_success("Workspace ready.");
    print_status("Workspace", &workspace.display().to_string());
    print_status("Prompts", &prompts_dir.display().to_string());
    print_status("Database", &workspace.join("adjutant.db").display().to_string());
    print_info(&format!(
        "Set {} (or provider.api_key in adjutant.toml), then run 'adjutant serve'.",
        API_KEY_ENV
    ));
    Ok(())
}
