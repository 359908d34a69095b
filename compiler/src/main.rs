use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::exit;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vxc::config::CompileSettings;
use vxc::manifest::GraphManifest;
use vxc::pass::PassId;
use vxc::pipeline::{compute_provenance, run_pipeline, CompilationState, PipelineOptions};
use vxc::registry::Registry;
use vxc::rule::RuleSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Optimized graph, one line per node
    Graph,
    /// Optimized graph as Graphviz DOT
    Dot,
    /// The validated rule set as JSON
    Rules,
    /// Per-module pattern depths of the rule set
    Depths,
    /// Provenance hashes as JSON
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "vxc",
    version,
    about = "Voice/effect graph compiler: builds a lowered program graph and rewrites it to a fixpoint"
)]
struct Cli {
    /// Graph description (.json); not needed for --emit rules/depths
    graph: Option<PathBuf>,

    /// Native module manifest (repeatable)
    #[arg(short, long = "modules", required = true)]
    modules: Vec<PathBuf>,

    /// Optimization rule set (.json)
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Compile settings (.json); flags below override individual fields
    #[arg(long)]
    settings: Option<PathBuf>,

    #[arg(long)]
    sample_rate: Option<u32>,

    #[arg(long)]
    input_channels: Option<u32>,

    #[arg(long)]
    output_channels: Option<u32>,

    #[arg(long)]
    max_rewrites: Option<usize>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Graph)]
    emit: EmitStage,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip the rewrite driver
    #[arg(long)]
    no_optimize: bool,

    /// Log passes, rewrites and timing to stderr
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("vxc: error: {}", message);
    exit(2);
}

fn load_settings(cli: &Cli) -> CompileSettings {
    let mut settings = match &cli.settings {
        Some(path) => CompileSettings::load(path).unwrap_or_else(|e| fail(e)),
        None => CompileSettings::default(),
    };
    if let Some(v) = cli.sample_rate {
        settings.sample_rate = v;
    }
    if let Some(v) = cli.input_channels {
        settings.input_channel_count = v;
    }
    if let Some(v) = cli.output_channels {
        settings.output_channel_count = v;
    }
    if let Some(v) = cli.max_rewrites {
        settings.max_rewrites = v;
    }
    if let Err(e) = settings.validate() {
        fail(e);
    }
    settings
}

fn write_output(path: Option<&Path>, text: &str) {
    match path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                fail(format_args!("{}: {}", path.display(), e));
            }
        }
        None => print!("{}", text),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // ── Load inputs ──
    let settings = load_settings(&cli);

    let mut registry = Registry::new();
    for path in &cli.modules {
        match registry.load_manifest(path) {
            Ok(n) => tracing::info!(path = %path.display(), modules = n, "loaded module manifest"),
            Err(e) => fail(e),
        }
    }

    let rules = match &cli.rules {
        Some(path) => RuleSet::load(&registry, path).unwrap_or_else(|e| fail(e)),
        None => RuleSet::default(),
    };

    match cli.emit {
        EmitStage::Rules => {
            write_output(cli.output.as_deref(), &format!("{}\n", rules.to_json()));
            return;
        }
        EmitStage::Depths => {
            let mut text = String::new();
            for (module, depth) in rules.depths().iter() {
                let name = registry.lookup(module).map_or_else(|| module.to_string(), |s| s.name.clone());
                text.push_str(&format!("{} {}\n", name, depth));
            }
            write_output(cli.output.as_deref(), &text);
            return;
        }
        EmitStage::Graph | EmitStage::Dot | EmitStage::BuildInfo => {}
    }

    let Some(graph_path) = &cli.graph else {
        fail("a graph description is required for this --emit stage");
    };
    let source = std::fs::read_to_string(graph_path)
        .unwrap_or_else(|e| fail(format_args!("{}: {}", graph_path.display(), e)));
    let manifest =
        GraphManifest::from_json(&source, &graph_path.display().to_string()).unwrap_or_else(|e| fail(e));

    let provenance = compute_provenance(&source, &registry, &rules);
    if cli.emit == EmitStage::BuildInfo {
        write_output(cli.output.as_deref(), &provenance.to_json());
        return;
    }

    // ── Compile ──
    let mut state = CompilationState::new(registry, rules, settings, manifest);
    state.provenance = Some(provenance);
    let options = PipelineOptions {
        optimize: !cli.no_optimize,
    };
    let result = run_pipeline(&mut state, PassId::Latency, &options, |_, diags| {
        for d in diags {
            eprintln!("vxc: {}", d);
        }
    });
    if let Err(e) = result {
        eprintln!("vxc: {}", e);
        exit(1);
    }

    if let Some(report) = &state.report {
        tracing::info!(%report, "rewrite summary");
    }
    let Some(graph) = &state.graph else {
        eprintln!("vxc: pipeline produced no graph");
        exit(1);
    };
    let text = match cli.emit {
        EmitStage::Dot => vxc::dot::emit_dot(graph),
        _ => graph.to_string(),
    };
    write_output(cli.output.as_deref(), &text);
}
