//! Workflow engine
//!
//! A workflow is a fixed list of tagged steps. Steps run strictly in order in
//! one linear pass; the run is not resumable. Before each step the
//! cancellation token is checked. When a step fails (or the run is
//! cancelled) the compensations of the steps that already completed run in
//! reverse order. Compensation failures are logged and never replace the
//! original error, which is returned wrapped in [`Error::Workflow`] naming
//! the failing step.

mod context;
mod create;
mod delete;
mod upgrade;

use std::fmt;

use async_trait::async_trait;
use tracing::{error, info, warn};

use strata_common::{Error, Result};

pub use context::{Dependencies, TaskContext};
pub use create::{Create, CreateOptions, CreateStep};
pub use delete::{Delete, DeleteOptions, DeleteStep};
pub use upgrade::{Upgrade, UpgradeStep};

/// What the engine does after a step succeeds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Run the next step
    Continue,
    /// Nothing left to do; finish successfully
    Done,
}

/// A sequence of steps with compensations
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Step tag
    type Step: Copy + fmt::Debug + fmt::Display + Send + Sync;

    /// Name used in logs and errors (create, upgrade, delete)
    const NAME: &'static str;

    /// Steps of this run, computed once before the first one executes
    fn steps(&self, ctx: &TaskContext) -> Vec<Self::Step>;

    /// Execute one step
    async fn run_step(&self, step: Self::Step, ctx: &mut TaskContext) -> Result<StepOutcome>;

    /// Undo a completed step after a later failure
    async fn compensate(&self, _step: Self::Step, _ctx: &mut TaskContext) -> Result<()> {
        Ok(())
    }
}

/// Run a workflow to completion or failure
pub async fn run<W: Workflow>(workflow: &W, ctx: &mut TaskContext) -> Result<()> {
    let steps = workflow.steps(ctx);
    let total = steps.len();
    let cluster = ctx.spec.name().to_string();
    let mut completed: Vec<W::Step> = Vec::with_capacity(total);

    for (index, step) in steps.into_iter().enumerate() {
        let failure = if ctx.cancel.is_cancelled() {
            Error::cancelled(step.to_string())
        } else {
            info!(workflow = W::NAME, cluster = %cluster, "[Phase {}/{}] {}", index + 1, total, step);
            match workflow.run_step(step, ctx).await {
                Ok(StepOutcome::Continue) => {
                    completed.push(step);
                    continue;
                }
                Ok(StepOutcome::Done) => {
                    info!(workflow = W::NAME, cluster = %cluster, step = %step, "workflow finished early");
                    return Ok(());
                }
                Err(e) => e,
            }
        };

        error!(workflow = W::NAME, cluster = %cluster, step = %step, error = %failure, "step failed");
        compensate_completed(workflow, completed, ctx).await;
        return Err(Error::workflow(W::NAME, step.to_string(), cluster, failure));
    }

    info!(workflow = W::NAME, cluster = %cluster, "workflow complete");
    Ok(())
}

async fn compensate_completed<W: Workflow>(
    workflow: &W,
    completed: Vec<W::Step>,
    ctx: &mut TaskContext,
) {
    for step in completed.into_iter().rev() {
        if let Err(e) = workflow.compensate(step, ctx).await {
            warn!(workflow = W::NAME, step = %step, error = %e, "compensation failed");
        }
    }
}
