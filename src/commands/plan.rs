//! `gangway plan` command.

use crate::config::Config;
use crate::context::ServiceContext;
use crate::orchestrator::Orchestrator;
use crate::partition::WorkAssignment;

/// Execute the `plan` command.
///
/// Loads the job and applies discovery without writing to the store, then
/// prints one line per execution unit (or the assignments as JSON).
///
/// # Errors
///
/// Returns an error string if the job cannot be loaded.
pub async fn run(ctx: &ServiceContext, config: &Config, json: bool) -> Result<(), String> {
    let scratch = config.work_root.join(format!("gangway-plan-{}", ctx.id_gen.run_id()));
    let job = Orchestrator::new(ctx, config, &scratch).prepare(false).await;
    let _ = tokio::fs::remove_dir_all(&scratch).await;
    let job = job.map_err(|e| e.to_string())?;

    let plan = WorkAssignment::plan(&job.spec, &config.arch);
    if json {
        let text = serde_json::to_string_pretty(&plan)
            .map_err(|e| format!("Failed to encode plan: {e}"))?;
        println!("{text}");
        return Ok(());
    }
    print!("{}", render_plan(&plan));
    Ok(())
}

fn render_plan(plan: &[WorkAssignment]) -> String {
    if plan.is_empty() {
        return "No stages defined.\n".to_string();
    }
    plan.iter()
        .map(|a| format!("unit {}: {}\n", a.index, a.stage_ids.join(", ")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::JobSpec;

    #[test]
    fn renders_one_line_per_unit() {
        let spec = JobSpec::from_yaml(
            "stages:\n  - {id: a, commands: [x]}\n  - {id: b, commands: [x]}\n  - {id: c, own_pod: true, commands: [x]}\n",
        )
        .unwrap();
        let plan = WorkAssignment::plan(&spec, "x86_64");
        assert_eq!(render_plan(&plan), "unit 0: a, b\nunit 1: c\n");
    }

    #[test]
    fn empty_plan_says_so() {
        assert_eq!(render_plan(&[]), "No stages defined.\n");
    }
}
