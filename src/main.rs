//! Microgrid twin entry point: CLI wiring and config-driven simulation start.

use std::path::Path;
use std::process;

use microgrid_twin::config::ScenarioConfig;
use microgrid_twin::error::SimError;
use microgrid_twin::io::export::export_csv;
use microgrid_twin::runner::{RunReport, Simulation};

/// Parsed CLI arguments.
struct CliArgs {
    scenario_path: Option<String>,
    preset: Option<String>,
    seed_override: Option<u64>,
    ticks_override: Option<u64>,
    telemetry_out: Option<String>,
    #[cfg(feature = "api")]
    serve: bool,
    #[cfg(feature = "api")]
    port: u16,
}

fn print_help() {
    eprintln!("microgrid-twin: microgrid digital twin with plan/react balancing");
    eprintln!();
    eprintln!("Usage: microgrid-twin [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>        Load scenario from TOML config file");
    eprintln!(
        "  --preset <name>          Use a built-in preset ({})",
        ScenarioConfig::PRESETS.join(", ")
    );
    eprintln!("  --seed <u64>             Override random seed");
    eprintln!("  --ticks <u64>            Override number of ticks to simulate");
    eprintln!("  --telemetry-out <path>   Export tick summaries to CSV");
    #[cfg(feature = "api")]
    {
        eprintln!("  --serve                  Serve the REST API while the simulation runs");
        eprintln!("  --port <u16>             API server port (default: 3000)");
    }
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --scenario or --preset is given, the campus preset is used.");
    eprintln!("Log verbosity follows RUST_LOG (default: info).");
}

fn value_of(args: &[String], i: usize, flag: &str, what: &str) -> String {
    match args.get(i) {
        Some(v) => v.clone(),
        None => {
            eprintln!("error: {flag} requires {what} argument");
            process::exit(1);
        }
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str, what: &str) -> T {
    value.parse::<T>().unwrap_or_else(|_| {
        eprintln!("error: {flag} value \"{value}\" is not a valid {what}");
        process::exit(1);
    })
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        scenario_path: None,
        preset: None,
        seed_override: None,
        ticks_override: None,
        telemetry_out: None,
        #[cfg(feature = "api")]
        serve: false,
        #[cfg(feature = "api")]
        port: 3000,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--scenario" => {
                i += 1;
                cli.scenario_path = Some(value_of(&args, i, "--scenario", "a path"));
            }
            "--preset" => {
                i += 1;
                cli.preset = Some(value_of(&args, i, "--preset", "a name"));
            }
            "--seed" => {
                i += 1;
                let v = value_of(&args, i, "--seed", "a u64");
                cli.seed_override = Some(parse_number(&v, "--seed", "u64"));
            }
            "--ticks" => {
                i += 1;
                let v = value_of(&args, i, "--ticks", "a u64");
                cli.ticks_override = Some(parse_number(&v, "--ticks", "u64"));
            }
            "--telemetry-out" => {
                i += 1;
                cli.telemetry_out = Some(value_of(&args, i, "--telemetry-out", "a path"));
            }
            #[cfg(feature = "api")]
            "--serve" => {
                cli.serve = true;
            }
            #[cfg(feature = "api")]
            "--port" => {
                i += 1;
                let v = value_of(&args, i, "--port", "a u16");
                cli.port = parse_number(&v, "--port", "u16");
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

/// Runs the simulation, printing each tick as it completes.
async fn run_simulation(scenario: &ScenarioConfig, cli: &CliArgs) -> Result<RunReport, SimError> {
    let mut sim = Simulation::start(scenario)?;

    #[cfg(feature = "api")]
    let server = if cli.serve {
        use std::net::SocketAddr;
        use std::sync::Arc;

        let state = Arc::new(microgrid_twin::api::AppState::from_simulation(&sim));
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
        Some(tokio::spawn(microgrid_twin::api::serve(state, addr)))
    } else {
        None
    };
    #[cfg(not(feature = "api"))]
    let _ = cli;

    let target = scenario.simulation.ticks as usize;
    while sim.telemetry().len() < target {
        match sim.next_summary().await {
            Some(summary) => println!("{summary}"),
            None => return Err(SimError::Closed),
        }
    }
    let report = sim.report();

    #[cfg(feature = "api")]
    if let Some(server) = server {
        println!("\n{}", report.kpi);
        eprintln!("Simulation finished; API still serving (Ctrl-C to exit)");
        match server.await {
            Ok(Err(e)) => eprintln!("error: API server failed: {e}"),
            Err(e) => eprintln!("error: API server task failed: {e}"),
            Ok(Ok(())) => {}
        }
        drop(sim);
        return Ok(report);
    }

    drop(sim);
    println!("\n{}", report.kpi);
    Ok(report)
}

fn main() {
    let cli = parse_args();
    microgrid_twin::init_tracing();

    // Load config: --scenario takes priority, then --preset, then campus default
    let mut scenario = if let Some(ref path) = cli.scenario_path {
        match ScenarioConfig::from_toml_file(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else if let Some(ref name) = cli.preset {
        match ScenarioConfig::from_preset(name) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        }
    } else {
        ScenarioConfig::campus()
    };

    if let Some(seed) = cli.seed_override {
        scenario.simulation.seed = seed;
    }
    if let Some(ticks) = cli.ticks_override {
        scenario.simulation.ticks = ticks;
    }

    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("error: failed to create tokio runtime: {e}");
        process::exit(1);
    });
    let report = match rt.block_on(run_simulation(&scenario, &cli)) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    if let Some(ref path) = cli.telemetry_out {
        if let Err(e) = export_csv(&report.summaries, Path::new(path)) {
            eprintln!("error: failed to write CSV: {e}");
            process::exit(1);
        }
        eprintln!("Telemetry written to {path}");
    }
}
