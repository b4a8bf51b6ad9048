use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::Parser;
use cli_table::ColorChoice;

use green_director::common::cli::{ColorPolicy, CommonOpts, RootOptions, RunOpts, SubCommand};
use green_director::common::config::{DirectorConfig, EnvCommunityResolver};
use green_director::common::setup::setup_logging;
use green_director::director::catalog::FileCatalog;
use green_director::director::metrics::StaticMetrics;
use green_director::director::output::{Output, create_output};
use green_director::director::placement::PilotPlacementLog;
use green_director::director::simulated::SimulatedCeFactory;
use green_director::director::{Collaborators, Director};

struct GlobalSettings {
    config_path: Option<PathBuf>,
    catalog_path: Option<PathBuf>,
    printer: Box<dyn Output>,
}

impl GlobalSettings {
    fn printer(&self) -> &dyn Output {
        self.printer.as_ref()
    }

    fn load_config(&self) -> anyhow::Result<DirectorConfig> {
        match &self.config_path {
            Some(path) => Ok(DirectorConfig::load(path)?),
            None => Ok(DirectorConfig::default()),
        }
    }

    fn catalog_path(&self) -> anyhow::Result<&Path> {
        self.catalog_path.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "No site catalog was specified, use --catalog or GREEN_DIRECTOR_CATALOG"
            )
        })
    }

    fn create_director(&self) -> anyhow::Result<Director> {
        let config = self.load_config()?;
        let collaborators = Collaborators {
            catalog: Box::new(FileCatalog::new(self.catalog_path()?.to_path_buf())),
            ce_factory: Box::new(SimulatedCeFactory::default()),
            metrics_source: Box::new(StaticMetrics::new(config.metrics.clone())),
            consumer: Box::new(PilotPlacementLog::new(config.max_pilot_queues)),
            community_resolver: Box::new(EnvCommunityResolver),
        };
        Ok(Director::from_config(config, collaborators)?)
    }
}

// Commands

async fn command_rank(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    let mut director = gsettings.create_director()?;
    let report = director.run_cycle().await?;
    gsettings.printer().print_cycle_report(&report);
    Ok(())
}

async fn command_run(gsettings: &GlobalSettings, opts: RunOpts) -> anyhow::Result<()> {
    let mut director = gsettings.create_director()?;
    log::info!(
        "Green director {} started for community {}",
        green_director::DIRECTOR_VERSION,
        director.community()
    );
    director.run(opts.cycles).await;
    Ok(())
}

async fn command_queues(gsettings: &GlobalSettings) -> anyhow::Result<()> {
    let mut director = gsettings.create_director()?;
    let listing = director.list_queues().await?;
    gsettings.printer().print_queue_listing(&listing);
    Ok(())
}

fn make_global_settings(opts: CommonOpts) -> GlobalSettings {
    let color_policy = match opts.colors {
        ColorPolicy::Always => ColorChoice::AlwaysAnsi,
        ColorPolicy::Auto => {
            if std::io::stdout().is_terminal() {
                ColorChoice::Auto
            } else {
                ColorChoice::Never
            }
        }
        ColorPolicy::Never => ColorChoice::Never,
    };

    GlobalSettings {
        config_path: opts.config,
        catalog_path: opts.catalog,
        printer: create_output(&opts.output_mode, color_policy),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> green_director::Result<()> {
    let top_opts = RootOptions::parse();

    setup_logging(top_opts.common.debug);

    let gsettings = make_global_settings(top_opts.common);

    let result = match top_opts.subcmd {
        SubCommand::Rank => command_rank(&gsettings).await,
        SubCommand::Run(opts) => command_run(&gsettings, opts).await,
        SubCommand::Queues => command_queues(&gsettings).await,
    };

    if let Err(e) = result {
        gsettings.printer().print_error(e);
        std::process::exit(1);
    }

    Ok(())
}
