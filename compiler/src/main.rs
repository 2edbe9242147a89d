use clap::Parser;
use std::path::PathBuf;

use dpc::ir::ExprKind;
use dpc::pass::PassId;
use dpc::pipeline::{compute_provenance, run_pipeline, CompilationState};
use dpc::scope::{CompilationConfig, Target};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Ast,
    Module,
    Planned,
    Scopes,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "dpc",
    version,
    about = "Device Placement Compiler — plans execution scopes for .tir tensor IR modules"
)]
struct Cli {
    /// Input .tir source file
    source: PathBuf,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Planned)]
    emit: EmitStage,

    /// Compilation config JSON file ({"targets": [...], "host": ..., "default": ...})
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target as device=backend (repeatable; default: cpu=llvm and gpu=cuda)
    #[arg(long = "target", value_name = "DEVICE=BACKEND")]
    target: Vec<String>,

    /// Host device for shape computations
    #[arg(long, default_value = "cpu")]
    host: String,

    /// Default device for otherwise-unconstrained sub-expressions
    #[arg(long = "default-scope", default_value = "cpu", value_name = "DEVICE")]
    default_scope: String,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn build_config(cli: &Cli) -> Result<CompilationConfig, String> {
    if let Some(path) = &cli.config {
        if !cli.target.is_empty() {
            return Err("--config and --target are mutually exclusive".to_string());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        return CompilationConfig::from_json(&text);
    }
    let targets = if cli.target.is_empty() {
        vec![Target::new("cpu", "llvm"), Target::new("gpu", "cuda")]
    } else {
        let mut targets = Vec::new();
        for spec in &cli.target {
            let Some((device, backend)) = spec.split_once('=') else {
                return Err(format!("invalid --target '{}', expected device=backend", spec));
            };
            targets.push(Target::new(device, backend));
        }
        targets
    };
    CompilationConfig::new(targets, cli.host.clone(), cli.default_scope.clone())
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("dpc: source = {}", cli.source.display());
        eprintln!("dpc: emit   = {:?}", cli.emit);
    }

    let source = match std::fs::read_to_string(&cli.source) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("dpc: error: cannot read {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dpc: error: {}", e);
            std::process::exit(2);
        }
    };

    if let EmitStage::BuildInfo = cli.emit {
        print!("{}", compute_provenance(&source, &config).to_json());
        return;
    }

    // ── Parse (outside the pass runner) ──
    let parse_result = dpc::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for error in &parse_result.errors {
            eprintln!("dpc: parse error: {}", error);
        }
        std::process::exit(1);
    }
    let program = parse_result.program.expect("parser produced no program");

    if let EmitStage::Ast = cli.emit {
        println!("{:#?}", program);
        return;
    }

    let terminal = match cli.emit {
        EmitStage::Module => PassId::TypeCheck,
        _ => PassId::Capture,
    };

    let mut state = CompilationState::new(program, config);
    state.provenance = Some(compute_provenance(&source, &state.config));
    let result = run_pipeline(&mut state, terminal, cli.verbose, |_, _| {});

    for diag in &state.diagnostics {
        eprintln!("dpc: {}", diag);
    }
    if result.is_err() || state.has_error {
        std::process::exit(1);
    }

    match cli.emit {
        EmitStage::Module => {
            let module = state.module.as_ref().expect("no module after typecheck");
            print!("{}", dpc::print::print_module(module));
        }
        EmitStage::Planned => {
            let planned = state.planned.as_ref().expect("no planned module");
            print!("{}", dpc::print::print_module(planned));
        }
        EmitStage::Scopes => {
            let planned = state.planned.as_ref().expect("no planned module");
            for (name, def) in &planned.defs {
                let ExprKind::Function { attrs, .. } = planned.arena.kind(*def) else {
                    continue;
                };
                let params: Vec<String> = attrs
                    .param_scopes
                    .as_deref()
                    .unwrap_or(&[])
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                let result_scope = attrs
                    .result_scope
                    .as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!("@{}: params [{}] result {}", name, params.join(", "), result_scope);
            }
        }
        EmitStage::Ast | EmitStage::BuildInfo => unreachable!(),
    }
}
