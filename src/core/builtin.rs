//! Built-in daemons started by `init_view`.
//!
//! - `sleep_check` (critical): checks for suspend/resume.
//! - `maintain_memory`: runs housekeeping on every registered cache.
//! - `maintain_storage` (big job): interruptable storage maintenance pass.
//!
//! Daemons hold a `Weak` controller handle; a cycle that finds the controller
//! gone ends quietly.

use std::sync::Weak;

use crate::daemons::{DaemonContext, DaemonFn, DaemonSpec};
use crate::error::TaskError;
use crate::storage::StorageEngine;

use super::Config;
use super::controller::Controller;

pub(crate) fn builtin_daemons<E: StorageEngine>(
    cfg: &Config,
    controller: &Weak<Controller<E>>,
) -> Vec<DaemonSpec> {
    vec![
        sleep_check(cfg),
        maintain_memory(cfg, controller.clone()),
        maintain_storage(cfg, controller.clone()),
    ]
}

fn sleep_check(cfg: &Config) -> DaemonSpec {
    let daemon = DaemonFn::arc("sleep_check", |ctx: DaemonContext| {
        async move {
            ctx.signals().sleep_check();
            Ok::<_, TaskError>(())
        }
    });
    DaemonSpec::periodic(daemon, cfg.sleep_check_period).critical()
}

fn maintain_memory<E: StorageEngine>(cfg: &Config, controller: Weak<Controller<E>>) -> DaemonSpec {
    let daemon = DaemonFn::arc("maintain_memory", move |_ctx: DaemonContext| {
        let controller = controller.upgrade();
        async move {
            if let Some(controller) = controller {
                controller.maintain_memory();
            }
            Ok::<_, TaskError>(())
        }
    });
    DaemonSpec::periodic(daemon, cfg.maintain_memory_period)
}

fn maintain_storage<E: StorageEngine>(cfg: &Config, controller: Weak<Controller<E>>) -> DaemonSpec {
    let daemon = DaemonFn::arc("maintain_storage", move |ctx: DaemonContext| {
        let controller = controller.upgrade();
        async move {
            let Some(controller) = controller else {
                return Ok(());
            };
            ctx.checkpoint()?;
            controller
                .maintain_storage_with(ctx.deadline(), ctx.token().clone())
                .await
                .map_err(TaskError::from)
        }
    });
    DaemonSpec::big_job(daemon, cfg.maintain_storage_period)
}
