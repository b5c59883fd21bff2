//! Stages command - Print the workflow transition table.

use anyhow::Result;
use bus_core::WorkflowStage;
use clap::Args;
use serde_json::{json, Value};

#[derive(Args)]
pub struct StagesArgs {
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

pub fn execute(args: StagesArgs) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(&stage_table())?);
        return Ok(());
    }

    println!(
        "{:<20} {:<15} {:<17} {:<10} {}",
        "STAGE", "AGENT", "ARTIFACT", "FLAGS", "NEXT"
    );
    for stage in WorkflowStage::all() {
        let next: Vec<&str> = stage.transitions().iter().map(|s| s.as_str()).collect();
        println!(
            "{:<20} {:<15} {:<17} {:<10} {}",
            stage.as_str(),
            stage.agent_role().map(|r| r.as_str()).unwrap_or("-"),
            stage.artifact_kind().map(|k| k.as_str()).unwrap_or("-"),
            flags(stage).join(","),
            if next.is_empty() { "-".to_string() } else { next.join(", ") }
        );
    }
    println!();
    println!("Any non-terminal stage may also move to failed or cancelled.");
    Ok(())
}

fn flags(stage: WorkflowStage) -> Vec<&'static str> {
    let mut flags = Vec::new();
    if stage.is_parallel() {
        flags.push("parallel");
    }
    if stage.is_optional() {
        flags.push("optional");
    }
    if stage.is_terminal() {
        flags.push("terminal");
    }
    flags
}

fn stage_table() -> Value {
    let stages: Vec<Value> = WorkflowStage::all()
        .into_iter()
        .map(|stage| {
            json!({
                "stage": stage.as_str(),
                "agent": stage.agent_role().map(|r| r.as_str()),
                "artifact": stage.artifact_kind().map(|k| k.as_str()),
                "flags": flags(stage),
                "next": stage.transitions().iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            })
        })
        .collect();
    Value::Array(stages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_table() {
        let table = stage_table();
        let rows = table.as_array().unwrap();
        assert_eq!(rows.len(), WorkflowStage::all().len());

        let development = rows.iter().find(|r| r["stage"] == "development").unwrap();
        assert_eq!(development["next"].as_array().unwrap().len(), 4);
        assert_eq!(development["agent"], "developer");

        let completed = rows.iter().find(|r| r["stage"] == "completed").unwrap();
        assert!(completed["agent"].is_null());
        assert_eq!(completed["flags"], json!(["terminal"]));
    }

    #[test]
    fn test_flags() {
        assert_eq!(flags(WorkflowStage::SupportDocs), vec!["parallel", "optional"]);
        assert_eq!(flags(WorkflowStage::UiUxDesign), vec!["optional"]);
        assert!(flags(WorkflowStage::Planning).is_empty());
    }
}
