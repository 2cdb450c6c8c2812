use anyhow::{Context as _, Result};
use converge::{RemovalRule, parse_removal_rule};

use crate::cli::PortProbe;
use crate::ui;

fn port(value: Option<i64>) -> String {
    value.map_or_else(|| "(absent)".to_string(), |port| port.to_string())
}

/// Parse `text` and report whether `probe` would be pruned by it
pub fn run(text: &str, probe: Option<PortProbe>) -> Result<()> {
    let rule: RemovalRule = parse_removal_rule(text).context("Invalid removal rule")?;

    ui::header(&rule.to_string());
    let RemovalRule::Port(ports) = rule;
    ui::kv("from_port", &ports.from_port.to_string());
    ui::kv("to_port", &ports.to_port.to_string());

    if let Some(probe) = probe {
        println!();
        let range = format!("{}..{}", port(probe.from_port), port(probe.to_port));
        if rule.matches(&probe) {
            ui::warn(&format!("{range} matches: a permission with this range is pruned"));
        } else {
            ui::success(&format!("{range} does not match"));
        }
    }
    Ok(())
}
