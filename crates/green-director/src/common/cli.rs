use std::path::PathBuf;

use clap::Parser;

use crate::director::output::Outputs;

#[derive(clap::ValueEnum, Clone)]
pub enum ColorPolicy {
    /// Use colors if the stdout is detected to be a terminal.
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Path to the director configuration file (TOML)
    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        global = true,
        env = "GREEN_DIRECTOR_CONFIG",
        help_heading("GLOBAL OPTIONS")
    )]
    pub config: Option<PathBuf>,

    /// Path to the site catalog file (TOML)
    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        global = true,
        env = "GREEN_DIRECTOR_CATALOG",
        help_heading("GLOBAL OPTIONS")
    )]
    pub catalog: Option<PathBuf>,

    /// Sets console color policy
    #[arg(
        long,
        default_value_t = ColorPolicy::Auto,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub colors: ColorPolicy,

    /// Sets output formatting
    #[arg(
        long,
        env = "GREEN_DIRECTOR_OUTPUT_MODE",
        default_value_t = Outputs::CLI,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub output_mode: Outputs,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "GREEN_DIRECTOR_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::DIRECTOR_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Run a single ranking cycle and print the queue order
    Rank,
    /// Run ranking cycles periodically
    Run(RunOpts),
    /// List resolved sites, CEs and queues together with their live status
    Queues,
}

#[derive(Parser)]
pub struct RunOpts {
    /// Stop after this many cycles (runs until interrupted by default)
    #[arg(long)]
    pub cycles: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::{RootOptions, SubCommand};
    use crate::director::output::Outputs;
    use clap::Parser;

    #[test]
    fn parse_run_with_cycle_limit() {
        let opts = RootOptions::try_parse_from([
            "green-director",
            "--catalog",
            "sites.toml",
            "run",
            "--cycles",
            "3",
        ])
        .unwrap();
        assert_eq!(
            opts.common.catalog.as_deref(),
            Some(std::path::Path::new("sites.toml"))
        );
        match opts.subcmd {
            SubCommand::Run(run) => assert_eq!(run.cycles, Some(3)),
            _ => panic!("Expected the run command"),
        }
    }

    #[test]
    fn parse_global_options_after_subcommand() {
        let opts = RootOptions::try_parse_from([
            "green-director",
            "rank",
            "--output-mode",
            "json",
            "--debug",
        ])
        .unwrap();
        assert!(opts.common.debug);
        assert!(matches!(opts.common.output_mode, Outputs::JSON));
        assert!(matches!(opts.subcmd, SubCommand::Rank));
    }
}
