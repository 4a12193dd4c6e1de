use vms_core::entities::RunReport;

use crate::cli::GlobalFlags;

/// Handle `vms schema`: print the JSON schema of the run report.
pub fn handle(flags: &GlobalFlags) -> anyhow::Result<()> {
    let schema = schemars::schema_for!(RunReport);
    let rendered = if flags.format == crate::cli::OutputFormat::Raw {
        serde_json::to_string(&schema)?
    } else {
        serde_json::to_string_pretty(&schema)?
    };
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use vms_core::entities::RunReport;

    #[test]
    fn schema_describes_run_and_summary() {
        let schema = serde_json::to_value(schemars::schema_for!(RunReport)).unwrap();
        let properties = &schema["properties"];
        assert!(properties.get("run").is_some(), "{schema}");
        assert!(properties.get("summary").is_some(), "{schema}");
    }
}
