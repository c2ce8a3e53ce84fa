use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use outcheck::adapters::{FittedModel, TableQuery};
use outcheck::ledger::finalise::{ManifestFormat, TerminalPrompt};
use outcheck::{AggFunc, Dataset, GroupSpec, Policy, Session};

#[derive(Parser)]
#[command(name = "outcheck")]
#[command(about = "Disclosure-checked tabulation for secure research outputs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the policy file
    #[arg(long, default_value = ".outcheck/policy.yml")]
    policy: PathBuf,

    /// Redact unsafe cells instead of only annotating them
    #[arg(long)]
    suppress: bool,

    /// Release directory; when set, results are finalised into it
    #[arg(long)]
    release: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Cross-tabulate a JSON dataset and check the result
    Crosstab {
        /// Dataset file: a JSON array of row objects
        #[arg(long)]
        data: PathBuf,

        /// Row grouping columns
        #[arg(long, value_delimiter = ',')]
        index: Vec<String>,

        /// Column grouping columns
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Values column; omit for a frequency table
        #[arg(long)]
        values: Option<String>,

        /// Aggregation functions (count, sum, mean, median, std)
        #[arg(long, value_delimiter = ',')]
        funcs: Vec<String>,

        /// Add margin totals
        #[arg(long)]
        margins: bool,
    },

    /// Check a fitted model's residual degrees of freedom
    CheckModel {
        /// Model file: JSON with method, nobs, params, summary
        #[arg(long)]
        model: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("outcheck=info".parse()?))
        .init();

    let cli = Cli::parse();
    let policy = Policy::load(&cli.policy)?;
    let mut session = Session::new(policy, cli.suppress);

    match cli.command {
        Commands::Crosstab {
            data,
            index,
            columns,
            values,
            funcs,
            margins,
        } => {
            let content = fs::read_to_string(&data)
                .with_context(|| format!("reading dataset {}", data.display()))?;
            let dataset = Dataset::from_json(&content)?;

            let mut query = match values {
                Some(values) => {
                    let funcs = funcs
                        .iter()
                        .map(|f| f.parse::<AggFunc>())
                        .collect::<Result<Vec<_>, _>>()?;
                    TableQuery::aggregated(
                        GroupSpec::from_columns(&index),
                        GroupSpec::from_columns(&columns),
                        values,
                        funcs,
                    )
                }
                None => TableQuery::frequency(
                    GroupSpec::from_columns(&index),
                    GroupSpec::from_columns(&columns),
                ),
            };
            if margins {
                query = query.with_margins();
            }

            let (uid, table) = session.crosstab(&dataset, &query)?;
            let record = session.ledger().get(&uid)?;
            println!("{}: {}", uid, record.summary);
            print!("{}", table.to_csv());
        }

        Commands::CheckModel { model } => {
            let content = fs::read_to_string(&model)
                .with_context(|| format!("reading model {}", model.display()))?;
            let fitted: FittedModel =
                serde_json::from_str(&content).context("model file must describe a fitted model")?;
            let uid = session.check_model(&fitted, &format!("check-model {}", model.display()))?;
            println!("{}: {}", uid, session.ledger().get(&uid)?.summary);
        }
    }

    if let Some(release) = cli.release {
        let report = session.finalise(&release, ManifestFormat::Json, &TerminalPrompt)?;
        info!(target = %release.display(), written = report.written.len(), "release written");
        for uid in &report.blocked {
            println!("withheld: {}", uid);
        }
    }

    Ok(())
}
