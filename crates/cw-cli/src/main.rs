//! CloakWork CLI
//!
//! Developer harness for the selector poller: runs scenario files against
//! the in-memory DOM on a virtual clock, classifies elements, and exports
//! the TypeScript definitions of the JS-boundary types.

use clap::{Parser, Subcommand};
use ts_rs::TS;

use cw_core::config::{PollerConfig, StyleSelector};
use cw_core::dom::Dom;
use cw_core::engine::{SelectorQuery, SelectorRequest, SelectorResponse};
use cw_core::party::{classify, shows_significant_text, TextSignificance};

mod scenario;
mod sim;

use scenario::Scenario;

#[derive(Parser)]
#[command(name = "cw-cli")]
#[command(about = "CloakWork selector-poller simulator and tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file through the simulator
    Simulate {
        /// Scenario JSON file
        #[arg(short, long)]
        scenario: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Virtual time budget for settling outstanding timers
        #[arg(long, default_value_t = 30_000)]
        settle_ms: u64,
    },

    /// Classify one element of a scenario page
    Classify {
        /// Scenario JSON file (only the page is used)
        #[arg(short, long)]
        scenario: String,

        /// Selector for the element to classify
        #[arg(short, long)]
        element: String,
    },

    /// Export TypeScript definitions for the JS-boundary types
    Bindings {
        /// Output directory
        #[arg(short, long, default_value = "bindings")]
        out_dir: String,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate {
            scenario,
            json,
            settle_ms,
        } => cmd_simulate(&scenario, json, settle_ms),
        Commands::Classify { scenario, element } => cmd_classify(&scenario, &element),
        Commands::Bindings { out_dir } => cmd_bindings(&out_dir),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_simulate(path: &str, json: bool, settle_ms: u64) -> Result<(), String> {
    let scenario = Scenario::load(path).map_err(|e| e.to_string())?;
    let report = sim::run_scenario(scenario, settle_ms).map_err(|e| e.to_string())?;

    if json {
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("Failed to encode report: {e}"))?;
        println!("{text}");
        return Ok(());
    }

    println!("Settled at {}ms after {} engine calls", report.settled_at_ms, report.engine_calls);
    println!("  Queried:  {} ids, {} classes", report.queried_ids.len(), report.queried_classes.len());
    println!("  Hidden:   {}", join_or_dash(&report.hidden));
    println!("  Unhidden: {}", join_or_dash(&report.unhidden));
    if !report.mode_log.is_empty() {
        println!("  Modes:    {}", report.mode_log.join(", "));
    }
    println!("  Sheet:    {}", report.stylesheet);
    Ok(())
}

fn cmd_classify(path: &str, element: &str) -> Result<(), String> {
    let scenario = Scenario::load(path).map_err(|e| e.to_string())?;
    let dom = scenario.build_dom();
    let node = dom
        .query_all(element)
        .into_iter()
        .next()
        .ok_or_else(|| format!("No element matches '{element}'"))?;

    let party = classify(&dom, &node);
    let significant = shows_significant_text(&dom, &node, TextSignificance::default());

    println!("Element:          {element}");
    println!("Party:            {party:?}");
    println!("Significant text: {significant}");
    Ok(())
}

fn cmd_bindings(out_dir: &str) -> Result<(), String> {
    PollerConfig::export_all_to(out_dir)
        .and_then(|_| StyleSelector::export_all_to(out_dir))
        .and_then(|_| SelectorQuery::export_all_to(out_dir))
        .and_then(|_| SelectorRequest::export_all_to(out_dir))
        .and_then(|_| SelectorResponse::export_all_to(out_dir))
        .map_err(|e| format!("Failed to export bindings: {e}"))?;

    println!("Exported TypeScript bindings to '{out_dir}'");
    Ok(())
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}
