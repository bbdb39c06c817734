use anyhow::Result;
use clap::Subcommand;

use crate::context::LedgerContext;
use crate::examples::ExampleGroup;
use crate::output::{LockView, OutputManager};

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Inspect or clear the migration lock",
    commands: &[
        "changeledger lock status                # Who holds the lock and until when",
        "changeledger lock release --owner ci-7f3a-Xq2   # Free a lock left by a crashed run",
    ],
}];

#[derive(Subcommand)]
pub enum LockCommands {
    /// Show the current holder of the migration lock
    Status,

    /// Release the lock on behalf of its recorded owner
    Release {
        /// Owner recorded on the lock (see `lock status`)
        #[arg(long)]
        owner: String,
    },
}

pub async fn handle_lock_commands(command: LockCommands, ctx: &LedgerContext, output: &OutputManager) -> Result<()> {
    let locks = ctx.ready_lock_repository(ctx.connect().await?).await?;
    let key = &ctx.config.lock.key;

    match command {
        LockCommands::Status => match locks.find_by_key(key).await? {
            Some(entry) => output.display(&LockView::new(entry))?,
            None => output.info(&format!("Lock '{key}' has never been taken")),
        },
        LockCommands::Release { owner } => {
            if locks.remove_by_key_and_owner(key, &owner).await? {
                output.success(&format!("Released lock '{key}' held by '{owner}'"));
            } else {
                output.warning(&format!("Lock '{key}' is not held by '{owner}'"));
                anyhow::bail!("lock '{key}' not held by '{owner}'");
            }
        }
    }
    Ok(())
}
