//! One reconciliation run: facts, plan, execution, report

use crate::error::Result;
use crate::executor::Executor;
use crate::facts::FactSnapshot;
use crate::iocage::Runner;
use crate::planner::{DesiredState, plan};
use crate::report::Report;
use tracing::info;

/// Bring iocage to `desired`
///
/// `host_release` is only consulted when a release is needed and none was
/// given.
pub fn reconcile(
    runner: &dyn Runner,
    desired: DesiredState,
    host_release: impl FnOnce() -> Result<String>,
) -> Result<Report> {
    let facts = FactSnapshot::query(runner)?;
    let desired = desired.with_default_release(host_release)?;

    let plan = plan(&desired, &facts)?;
    info!(
        state = %desired.state,
        jail = desired.name.as_deref().unwrap_or("-"),
        steps = plan.actions.len(),
        noop = plan.is_noop(),
        dry_run = desired.dry_run,
        "reconciling"
    );

    let outcome = Executor::new(runner, desired.dry_run).execute(&plan, facts)?;
    Ok(outcome.into())
}
