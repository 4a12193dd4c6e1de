use serde::Serialize;
use vms_core::entities::{RunReport, ScopedUser};
use vms_core::scope::UserScope;

use crate::cli::OutputFormat;
use crate::ui;

pub mod table;

/// Something that can be shown as aligned tables for `--format table`.
pub trait Tabular {
    fn to_table(&self, max_width: Option<usize>) -> String;
}

/// Render a response to a string in the requested format.
pub fn render<T: Serialize + Tabular>(value: &T, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Table => Ok(value.to_table(ui::prefs().term_width)),
        OutputFormat::Raw => Ok(serde_json::to_string(value)?),
    }
}

/// Print a response in the requested format.
pub fn output<T: Serialize + Tabular>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    let rendered = render(value, format)?;
    println!("{rendered}");
    Ok(())
}

impl Tabular for RunReport {
    fn to_table(&self, max_width: Option<usize>) -> String {
        let run = &self.run;
        let status = run.status.map_or("running", |s| s.as_str());
        let mut out = format!(
            "run {} ({}){}: {status}\n",
            run.id,
            run.scope,
            if run.dry_run { ", dry run" } else { "" }
        );
        if let Some(fatal) = &run.fatal_error {
            out.push_str(&format!("fatal: {fatal}\n"));
        }
        out.push('\n');

        let kind_rows: Vec<Vec<String>> = run
            .outcomes
            .iter()
            .map(|o| {
                let c = &o.counts;
                vec![
                    o.kind.to_string(),
                    o.status.to_string(),
                    c.fetched.to_string(),
                    c.created.to_string(),
                    c.updated.to_string(),
                    c.unchanged.to_string(),
                    c.skipped.to_string(),
                    c.conflicted.to_string(),
                    c.out_of_scope.to_string(),
                    o.error.clone().unwrap_or_default(),
                ]
            })
            .collect();
        out.push_str(&table::render_table(
            &[
                "kind", "status", "fetched", "created", "updated", "unchanged", "skipped",
                "conflict", "out_of_scope", "error",
            ],
            &kind_rows,
            max_width,
        ));

        out.push_str(&format!(
            "\n\n{} error(s), {} warning(s)",
            self.summary.errors, self.summary.warnings
        ));
        if !run.findings.is_empty() {
            let finding_rows: Vec<Vec<String>> = run
                .findings
                .iter()
                .map(|f| {
                    vec![
                        f.severity.to_string(),
                        f.rule_id.clone(),
                        f.record.kind.to_string(),
                        f.record.external_id.clone(),
                        f.record.district.clone().unwrap_or_else(|| "-".into()),
                        f.message.clone(),
                    ]
                })
                .collect();
            out.push_str("\n\n");
            out.push_str(&table::render_table(
                &["severity", "rule", "kind", "external_id", "district", "message"],
                &finding_rows,
                max_width,
            ));
        }
        out
    }
}

impl Tabular for ScopedUser {
    fn to_table(&self, max_width: Option<usize>) -> String {
        table::render_table(&USER_HEADERS, &[user_row(self)], max_width)
    }
}

impl Tabular for Vec<ScopedUser> {
    fn to_table(&self, max_width: Option<usize>) -> String {
        if self.is_empty() {
            return String::from("(no users)");
        }
        let rows: Vec<Vec<String>> = self.iter().map(user_row).collect();
        table::render_table(&USER_HEADERS, &rows, max_width)
    }
}

const USER_HEADERS: [&str; 4] = ["username", "scope", "external_id", "updated_at"];

fn user_row(user: &ScopedUser) -> Vec<String> {
    vec![
        user.username.clone(),
        describe_scope(&user.scope),
        user.external_id.clone().unwrap_or_else(|| "-".into()),
        user.updated_at.format("%Y-%m-%d %H:%M").to_string(),
    ]
}

/// `global` or `district:a,b`, the same syntax `--scope` accepts.
#[must_use]
pub fn describe_scope(scope: &UserScope) -> String {
    match scope {
        UserScope::Global => "global".to_string(),
        UserScope::District(names) => {
            format!("district:{}", names.iter().cloned().collect::<Vec<_>>().join(","))
        }
    }
}
