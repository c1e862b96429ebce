use anyhow::Result;

use crate::commands::{self, CommandReport};
use crate::stats::config::{Collector, load_config};

fn render(report: &CommandReport) -> String {
    let mut out = format!(
        "{}: {}\n",
        report.command,
        if report.ok { "ok" } else { "failed" }
    );
    for detail in &report.details {
        out.push_str(&format!("  {detail}\n"));
    }
    for issue in &report.issues {
        out.push_str(&format!("  issue: {issue}\n"));
    }
    out
}

pub fn run() -> Result<()> {
    let cfg = load_config()?;
    tracing::info!(
        guild = %cfg.guild_id,
        collector = cfg.collector.label(),
        mode = cfg.mode().label(),
        output = %cfg.output_file.display(),
        "starting collection"
    );

    let report = match cfg.collector {
        Collector::Direct => commands::collect::run(&cfg)?,
        Collector::Remote => commands::relay::run(&cfg)?,
    };

    print!("{}", render(&report));
    if !report.ok {
        anyhow::bail!(
            "{} finished with {} issue(s)",
            report.command,
            report.issues.len()
        );
    }
    Ok(())
}
