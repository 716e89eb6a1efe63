use crate::artifacts::dry_run_echo;
use crate::error::OpsResult;
use crate::executor::ssh;
use crate::outcome::OpOutcome;
use crate::OpsContext;
use serde_json::{json, Value};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodStatusArgs {
    pub host: Option<String>,
}

/// Fleet listing plus a `/mnt` probe on the host; both must succeed.
pub fn status(args: &PodStatusArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    let host = ctx.settings.host(args.host.as_deref());
    let fleet = ctx.executor.execute(&["lium".to_string(), "ps".to_string()]);
    let mnt = ctx.executor.execute(&ssh(&host, "ls /mnt"));
    let ok = fleet.success() && mnt.success();
    let dry_run = ctx.executor.dry_run();
    let payload = json!({
        "ok": ok,
        "host": host,
        "lium_ps": if dry_run { Value::Null } else { Value::String(fleet.stdout.clone()) },
        "mnt_ok": mnt.success(),
        "mnt_error": if mnt.success() { Value::Null } else { Value::String(mnt.error_text()) },
        "commands": if dry_run {
            json!([dry_run_echo(ctx, &fleet.stdout), dry_run_echo(ctx, &mnt.stdout)])
        } else {
            Value::Null
        },
    });
    Ok(OpOutcome::reported(payload, ok))
}
