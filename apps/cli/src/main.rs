#![deny(warnings)]

//! Headless CLI that runs a crop scenario and prints a season summary.

use anyhow::{Context, Result};
use crop_organs::OrganStage;
use crop_runtime::{run_scenario, summaries_to_json, DaySummary, Scenario};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const DEFAULT_SCENARIO: &str = "assets/scenarios/wheat.yaml";

struct Args {
    scenario: Option<String>,
    days: Option<u32>,
    json: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        scenario: None,
        days: None,
        json: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--scenario" => args.scenario = it.next(),
            "--days" => args.days = it.next().and_then(|s| s.parse().ok()),
            "--json" => args.json = true,
            _ => {}
        }
    }
    args
}

fn print_summary(name: &str, summaries: &[DaySummary]) {
    let Some(last) = summaries.last() else {
        println!("{name} | no days run");
        return;
    };
    let peak = summaries
        .iter()
        .max_by(|a, b| a.canopy_cover.total_cmp(&b.canopy_cover))
        .map(|s| (s.date, s.canopy_cover))
        .unwrap_or((last.date, 0.0));
    let fixed: f64 = summaries.iter().map(|s| s.dm_fixed).sum();
    let uptake: f64 = summaries.iter().map(|s| s.n_uptake).sum();
    let n_fixed: f64 = summaries.iter().map(|s| s.n_fixed).sum();
    let worst_n = summaries
        .iter()
        .map(|s| s.n_balance_error.abs())
        .fold(0.0, f64::max);

    println!(
        "Season {} | {} to {} | {} days",
        name,
        summaries[0].date,
        last.date,
        summaries.len()
    );
    println!(
        "Canopy | peak cover: {:.2} on {} | DM fixed: {:.1} g/m2",
        peak.1, peak.0, fixed
    );
    println!(
        "Nitrogen | uptake: {:.2} g/m2 | fixed: {:.2} g/m2 | worst daily imbalance: {:.2e}",
        uptake, n_fixed, worst_n
    );
    println!(
        "Final | live: {:.1} g/m2 | dead: {:.1} g/m2 | residue: {:.1} g/m2",
        last.live.wt(),
        last.dead.wt(),
        last.residue.dry_matter_wt
    );
    for organ in &last.organs {
        let stage = match organ.stage {
            OrganStage::Uninitialised => "uninitialised",
            OrganStage::Sown => "sown",
            OrganStage::Growing => "growing",
            OrganStage::Ended => "ended",
        };
        println!(
            "  {:<8} {:<13} live {:>8.2} g/m2 | N {:>6.3} g/m2 | dead {:>8.2} g/m2",
            organ.name,
            stage,
            organ.live.wt(),
            organ.live.n(),
            organ.dead.wt()
        );
    }
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    let path = args.scenario.unwrap_or_else(|| DEFAULT_SCENARIO.to_string());
    info!(
        scenario = %path,
        days = ?args.days,
        git_sha = env!("GIT_SHA"),
        build_date = env!("BUILD_DATE"),
        "starting CLI"
    );

    let scenario = Scenario::load(&path).with_context(|| format!("loading scenario {path}"))?;
    let summaries = run_scenario(&scenario, args.days)?;

    if args.json {
        println!("{}", summaries_to_json(&summaries)?);
    } else {
        print_summary(&scenario.name, &summaries);
    }
    Ok(())
}
