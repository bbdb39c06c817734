use anyhow::{Context, Result};
use changeledger::{ChangeEntry, ChangeState, LockManager, generate_execution_id, id::execution_hostname};
use clap::{Args, ValueEnum};

use crate::context::LedgerContext;
use crate::examples::ExampleGroup;
use crate::output::OutputManager;

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Record an execution by hand",
    commands: &[
        "changeledger record create-users --author alice --change-log db.UsersChangeLog",
        "changeledger record create-users --author alice --change-log db.UsersChangeLog --state rolled-back",
    ],
}];

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StateArg {
    Executed,
    Failed,
    RolledBack,
    RollbackFailed,
    Ignored,
}

impl From<StateArg> for ChangeState {
    fn from(value: StateArg) -> Self {
        match value {
            StateArg::Executed => ChangeState::Executed,
            StateArg::Failed => ChangeState::Failed,
            StateArg::RolledBack => ChangeState::RolledBack,
            StateArg::RollbackFailed => ChangeState::RollbackFailed,
            StateArg::Ignored => ChangeState::Ignored,
        }
    }
}

#[derive(Args)]
pub struct RecordArgs {
    /// Change identifier (the ledger key)
    pub change_id: String,

    #[arg(long)]
    pub author: String,

    /// Change log the change belongs to
    #[arg(long = "change-log")]
    pub change_log_class: String,

    #[arg(long = "method", default_value = "")]
    pub change_set_method: String,

    #[arg(long, value_enum, default_value = "executed")]
    pub state: StateArg,

    /// Execution id; generated when omitted
    #[arg(long)]
    pub execution_id: Option<String>,

    #[arg(long, default_value_t = 0)]
    pub execution_millis: u64,
}

impl RecordArgs {
    fn into_entry(self) -> ChangeEntry {
        let execution_id = self.execution_id.unwrap_or_else(generate_execution_id);
        let mut entry = ChangeEntry::new(execution_id, self.change_id, self.author, self.change_log_class)
            .with_change_set_method(self.change_set_method)
            .with_state(Some(self.state.into()))
            .with_execution_millis(self.execution_millis);
        entry.execution_hostname = execution_hostname();
        entry
    }
}

pub async fn handle_record(args: RecordArgs, ctx: &LedgerContext, output: &OutputManager) -> Result<()> {
    let store = ctx.connect().await?;
    let locks = ctx.ready_lock_repository(store.clone()).await?;
    let repository = ctx.repository_on(store)?;
    repository
        .initialize(false)
        .await
        .with_context(|| format!("Change entry table '{}' is not usable; run 'changeledger init'", ctx.table()))?;

    let entry = args.into_entry();
    let change_id = entry.change_id.clone();
    output.verbose(&format!("execution id {}", entry.execution_id));

    let lock = LockManager::new(locks, ctx.config.lock_options()).with_key(&ctx.config.lock.key);
    output.verbose(&format!("lock owner {}", lock.owner()));
    output.progress(&format!("Waiting for lock '{}'", lock.key()));
    let acquired = lock.acquire().await;
    output.clear_line();
    acquired.context("Another run holds the migration lock")?;

    let saved = repository.save_or_update(entry).await;
    lock.release().await;
    saved?;
    output.success(&format!("Recorded '{change_id}' in '{}'", ctx.table()));
    Ok(())
}
