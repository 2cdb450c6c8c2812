use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cloudup")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge a mock cloud to a declared network manifest", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Mock cloud state file
    #[arg(long, global = true, env = "CLOUDUP_STATE")]
    pub state: Option<PathBuf>,

    /// Settings file
    #[arg(long, global = true, env = "CLOUDUP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(ManifestArgs),

    /// Make the cloud match the manifest
    Apply(ApplyArgs),

    /// Fail if the cloud does not already match the manifest
    Check(ManifestArgs),

    /// Revoke ingress permissions selected by removal rules
    Prune(PruneArgs),

    /// Parse a removal rule and optionally test it against a port range
    Rule(RuleArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct ManifestArgs {
    /// Network manifest (TOML)
    pub manifest: PathBuf,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Network manifest (TOML)
    pub manifest: PathBuf,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of tasks to run in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Stop starting new tasks after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct PruneArgs {
    /// Network manifest (TOML)
    pub manifest: PathBuf,

    /// Show what would be revoked without revoking
    #[arg(short, long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct RuleArgs {
    /// Removal rule, e.g. `port=22` or `port=8000:8080`
    #[arg(allow_hyphen_values = true)]
    pub rule: String,

    /// Port range to test, `FROM:TO`; leave a side empty for an absent port
    #[arg(short, long, value_parser = parse_permission, allow_hyphen_values = true)]
    pub permission: Option<PortProbe>,
}

/// A port range given on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortProbe {
    pub from_port: Option<i64>,
    pub to_port: Option<i64>,
}

impl converge::PortRange for PortProbe {
    fn from_port(&self) -> Option<i64> {
        self.from_port
    }

    fn to_port(&self) -> Option<i64> {
        self.to_port
    }
}

fn parse_permission(text: &str) -> Result<PortProbe, String> {
    let (from, to) = text
        .split_once(':')
        .ok_or_else(|| format!("expected FROM:TO, got {text:?}"))?;
    let side = |value: &str| -> Result<Option<i64>, String> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(None);
        }
        value
            .parse()
            .map(Some)
            .map_err(|_| format!("invalid port {value:?}"))
    };
    Ok(PortProbe {
        from_port: side(from)?,
        to_port: side(to)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_permission() {
        assert_eq!(
            parse_permission("22:23"),
            Ok(PortProbe {
                from_port: Some(22),
                to_port: Some(23),
            })
        );
        assert_eq!(
            parse_permission(":0"),
            Ok(PortProbe {
                from_port: None,
                to_port: Some(0),
            })
        );
        assert_eq!(
            parse_permission("-1:-1"),
            Ok(PortProbe {
                from_port: Some(-1),
                to_port: Some(-1),
            })
        );
        assert!(parse_permission("22").is_err());
        assert!(parse_permission("a:22").is_err());
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "cloudup", "-vv", "apply", "net.toml", "--yes", "--jobs", "8", "--timeout", "30",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Apply(args) => {
                assert!(args.yes);
                assert_eq!(args.jobs, Some(8));
                assert_eq!(args.timeout, Some(30));
                assert_eq!(args.manifest, PathBuf::from("net.toml"));
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn test_rule_accepts_negative_ports() {
        let cli = Cli::try_parse_from(["cloudup", "rule", "port=-1", "--permission", "-1:-1"])
            .unwrap();
        match cli.command {
            Command::Rule(args) => {
                assert_eq!(args.rule, "port=-1");
                assert_eq!(args.permission.and_then(|p| p.from_port), Some(-1));
            }
            _ => panic!("expected rule"),
        }
    }
}
