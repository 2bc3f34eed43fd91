use std::io;

use crate::core::WorkspaceManager;
use crate::models::Config;

/// List shared codebases and their metadata
pub fn list_codebases(config: &Config) -> io::Result<()> {
    let manager = WorkspaceManager::new(config);
    let codebases = manager.list_codebases()?;

    if codebases.is_empty() {
        println!("No codebases under {}", manager.workspaces_root().display());
        return Ok(());
    }

    println!("{:<24} {:<12} {:<26} {:<26}", "ID", "OWNER", "CREATED", "LAST USED");
    for codebase in codebases {
        match codebase.meta {
            Some(meta) => println!(
                "{:<24} {:<12} {:<26} {:<26}",
                codebase.id,
                meta.owner,
                meta.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                meta.last_used_at.format("%Y-%m-%d %H:%M:%S UTC"),
            ),
            None => println!("{:<24} (invalid metadata)", codebase.id),
        }
    }
    Ok(())
}
