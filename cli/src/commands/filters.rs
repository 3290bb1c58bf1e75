//! `glscope filters`: list the built-in filter-sets

use anyhow::Result;
use clap::Args;
use glscope_core::pipeline::FilterSetStatus;
use serde::Serialize;

use crate::output;

#[derive(Args)]
pub struct FiltersArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,

    /// Include each set's variables
    #[arg(short = 'a', long)]
    pub all: bool,
}

#[derive(Serialize)]
struct VariableListing {
    name: String,
    kind: String,
    help: String,
}

#[derive(Serialize)]
struct FilterSetListing {
    name: String,
    description: String,
    variables: Vec<VariableListing>,
}

impl From<FilterSetStatus> for FilterSetListing {
    fn from(status: FilterSetStatus) -> Self {
        Self {
            name: status.name,
            description: status.description,
            variables: status
                .variables
                .into_iter()
                .map(|v| VariableListing {
                    name: v.name,
                    kind: v.kind.to_string(),
                    help: v.help,
                })
                .collect(),
        }
    }
}

pub fn run(args: FiltersArgs) -> Result<()> {
    let interceptor = super::offline_interceptor()?;
    let listings: Vec<FilterSetListing> = interceptor
        .filter_sets()
        .into_iter()
        .map(FilterSetListing::from)
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    output::heading("Filter-sets:");
    for set in &listings {
        println!("  {:<16} {}", set.name, set.description);
        if args.all {
            for v in &set.variables {
                println!("      {:<12} {:<12} {}", v.name, v.kind, v.help);
            }
        }
    }
    Ok(())
}
