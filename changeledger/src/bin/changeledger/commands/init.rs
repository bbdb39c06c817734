use anyhow::Result;
use clap::Args;

use crate::context::LedgerContext;
use crate::examples::ExampleGroup;
use crate::output::OutputManager;

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Provision the change entry and lock tables",
    commands: &[
        "changeledger init                       # Create the configured tables if missing",
        "changeledger init --no-create           # Only verify the table exists",
        "changeledger --table audit.log init     # Use a different table",
    ],
}];

#[derive(Args)]
pub struct InitArgs {
    /// Fail instead of creating the table when it is missing
    #[arg(long)]
    pub no_create: bool,
}

pub async fn handle_init(args: InitArgs, ctx: &LedgerContext, output: &OutputManager) -> Result<()> {
    let allow_create = ctx.config.ledger.allow_create && !args.no_create;
    output.verbose(&format!("config: {}", ctx.config_path.display()));

    let store = ctx.connect().await?;
    let repository = ctx.repository_on(store.clone())?;
    let locks = ctx.lock_repository_on(store)?;

    output.progress(&format!("Checking table '{}'", ctx.table()));
    let result = repository.initialize(allow_create).await;
    let result = match result {
        Ok(()) => {
            output.clear_line();
            output.success(&format!("Change entry table '{}' is ready", ctx.table()));
            output.progress(&format!("Checking lock table '{}'", ctx.lock_table()));
            let locked = locks.initialize(allow_create).await;
            output.clear_line();
            if locked.is_ok() {
                output.success(&format!("Lock table '{}' is ready", ctx.lock_table()));
            }
            locked
        }
        Err(err) => {
            output.clear_line();
            Err(err)
        }
    };

    if let Err(err) = result {
        output.error(&err.to_string());
        if !allow_create {
            output.info("Re-run without --no-create (and with ledger.allow_create = true) to create it.");
        }
        return Err(err.into());
    }
    Ok(())
}
