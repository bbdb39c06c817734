use anyhow::Result;
use clap::Subcommand;

use crate::context::LedgerContext;
use crate::examples::ExampleGroup;
use crate::output::{EntriesView, EntryView, OutputManager};

pub const LOG_EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Inspect the ledger",
    commands: &[
        "changeledger log                        # Every recorded change entry",
        "changeledger log --executed             # Only entries that count as executed",
        "changeledger --output json log          # Machine-readable listing",
    ],
}];

pub const SHOW_EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Inspect one change",
    commands: &[
        "changeledger show create-users          # Full entry for one change",
        "changeledger show create-users --author alice --check",
    ],
}];

#[derive(Subcommand)]
pub enum EntryCommands {
    /// List recorded change entries
    Log {
        /// Only entries whose state counts as executed
        #[arg(long)]
        executed: bool,
    },

    /// Show one change entry
    Show {
        change_id: String,

        /// Author to match with --check
        #[arg(long, requires = "check")]
        author: Option<String>,

        /// Exit non-zero unless the change already executed for --author
        #[arg(long, requires = "author")]
        check: bool,
    },
}

pub async fn handle_entry_commands(command: EntryCommands, ctx: &LedgerContext, output: &OutputManager) -> Result<()> {
    let repository = ctx.ready_repository().await?;

    match command {
        EntryCommands::Log { executed } => {
            output.progress("Scanning change entries");
            let entries = if executed {
                repository.get_executed_entries().await
            } else {
                repository.get_entries_log().await
            };
            output.clear_line();
            let entries = entries?;
            output.verbose(&format!("{} entries in '{}'", entries.len(), ctx.table()));
            output.display(&EntriesView::new(entries))?;
        }
        EntryCommands::Show {
            change_id,
            author,
            check,
        } => {
            if check && let Some(author) = author {
                if repository.is_already_executed(&change_id, &author).await? {
                    output.success(&format!("'{change_id}' by {author} already executed"));
                    return Ok(());
                }
                output.warning(&format!("'{change_id}' by {author} has not executed"));
                anyhow::bail!("change '{change_id}' is pending");
            }

            match repository.find_entry(&change_id).await? {
                Some(entry) => output.display(&EntryView(entry))?,
                None => {
                    output.warning(&format!("No entry recorded for '{change_id}'"));
                    anyhow::bail!("change '{change_id}' not found");
                }
            }
        }
    }
    Ok(())
}
