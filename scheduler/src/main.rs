use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use gsched::diag::{line_col, Diagnostic};
use gsched::pipeline::{compute_provenance, run_pipeline, CompilationState, RunOptions};
use gsched::schedule::{GenContext, ScheduleOptions, SchedulePolicy};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    /// Scheduled kernels in listing syntax.
    Listing,
    /// Scheduled kernels plus per-block traces.
    Json,
    /// Dependency DAGs of the input kernels (Graphviz DOT).
    Dag,
    /// Simulated post-allocation timing (Mermaid Gantt).
    Timing,
    /// Source and schedule hashes.
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "gsched",
    version,
    about = "gsched — schedules the instructions of Gen selection listings (.gasm)"
)]
struct Cli {
    source: PathBuf,

    /// Write output here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = EmitStage::Listing)]
    emit: EmitStage,

    /// Skip the pre-allocation (register pressure) pass.
    #[arg(long)]
    no_pre_alloc: bool,

    /// Skip the post-allocation (latency) pass.
    #[arg(long)]
    no_post_alloc: bool,

    /// Check every pass with the schedule certificate.
    #[arg(long)]
    verify: bool,

    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_target(false)
        .init();

    if cli.verbose {
        eprintln!("gsched: source = {}", cli.source.display());
        eprintln!("gsched: emit   = {:?}", cli.emit);
    }

    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("gsched: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let env = ScheduleOptions::from_env();
    let options = RunOptions {
        schedule: ScheduleOptions {
            pre_alloc: env.pre_alloc && !cli.no_pre_alloc,
            post_alloc: env.post_alloc && !cli.no_post_alloc,
        },
        verify: cli.verify,
    };

    let state = run_pipeline(&source, &options, |_, diags| {
        for diag in diags {
            report(&cli.source, &source, diag);
        }
    });
    if state.has_error {
        std::process::exit(1);
    }

    if cli.verbose {
        eprintln!(
            "gsched: scheduled {} kernels, {} instructions",
            state.scheduled.len(),
            state
                .scheduled
                .iter()
                .map(|k| k.kernel.selection.insn_count())
                .sum::<usize>()
        );
    }

    let text = match emit(&cli.emit, &source, &state) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("gsched: error: {}", e);
            std::process::exit(2);
        }
    };

    let written = match &cli.output {
        Some(path) => std::fs::write(path, text.as_bytes()).map_err(|e| (path.display().to_string(), e)),
        None => std::io::stdout()
            .write_all(text.as_bytes())
            .map_err(|e| ("<stdout>".to_string(), e)),
    };
    if let Err((target, e)) = written {
        eprintln!("gsched: error: {}: {}", target, e);
        std::process::exit(2);
    }
}

fn emit(stage: &EmitStage, source: &str, state: &CompilationState) -> Result<String, String> {
    match stage {
        EmitStage::Listing => Ok(state.listing()),
        EmitStage::Json => state.to_json().map(|s| s + "\n").map_err(|e| e.to_string()),
        EmitStage::Dag => Ok(state
            .resolved
            .iter()
            .map(|k| {
                let ctx = GenContext::new(k.simd_width);
                gsched::dot::emit_dot(k, &ctx, SchedulePolicy::PreAlloc)
            })
            .collect::<Vec<_>>()
            .join("\n")),
        EmitStage::Timing => {
            let reports: Vec<(&str, &gsched::schedule::ScheduleReport)> = state
                .scheduled
                .iter()
                .filter_map(|k| k.post_alloc.as_ref().map(|r| (k.kernel.name.as_str(), r)))
                .collect();
            Ok(gsched::timing::emit_timing_chart(&reports))
        }
        EmitStage::BuildInfo => Ok(compute_provenance(source, &state.listing()).to_json()),
    }
}

fn report(path: &std::path::Path, source: &str, diag: &Diagnostic) {
    if diag.span.end > 0 {
        let (line, col) = line_col(source, diag.span.start);
        eprintln!("gsched: {}:{}:{}: {}", path.display(), line, col, diag);
    } else {
        eprintln!("gsched: {}", diag);
    }
}
