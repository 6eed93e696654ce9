use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;
use std::sync::Once;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use framevm_core::{
    StdHost, UncaughtException, Val,
    module::ModuleRegistry,
    vm::{CodeObject, Engine, EngineConfig, Program},
};
use framevm_stdlib::register_stdlib_modules;
use tracing::debug;

static TRACING_INIT: Once = Once::new();
const LOG_ENV: &str = "FRAMEVM_LOG";
const DEFAULT_LOG_FILTER: &str = "framevm=warn";
const TRACE_LOG_FILTER: &str = "framevm::vm=trace,framevm=debug";


#[derive(Debug, Parser)]
#[command(
    name = "framevm",
    author,
    version,
    about = "Run serialized FrameVM instruction streams",
    long_about = None
)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute a program, printing its output and a non-None result.
    Run {
        /// Program file (.json, .yaml or .yml)
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Decode and validate a program without running it.
    Check {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
    /// Print the instruction listing of a program.
    Disasm {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
}

#[derive(Debug, Default, Args)]
struct EngineArgs {
    /// TOML file with engine limits; flags below override it
    #[arg(long, value_name = "FILE", value_parser = parse_sanitized_path)]
    config: Option<PathBuf>,
    /// Halt after this many executed instructions
    #[arg(long)]
    max_steps: Option<u64>,
    /// Call depth past which calls raise RecursionError
    #[arg(long)]
    max_frames: Option<usize>,
    /// Log every dispatched instruction
    #[arg(long)]
    trace: bool,
}

impl EngineArgs {
    fn resolve(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = read_file_content(path)?;
                EngineConfig::from_toml_str(&text).with_context(|| format!("in {}", path.display()))?
            }
            None => EngineConfig::default(),
        };
        if let Some(max_steps) = self.max_steps {
            config.max_steps = Some(max_steps);
        }
        if let Some(max_frames) = self.max_frames {
            config.max_frames = max_frames;
        }
        if self.trace {
            config.trace_instructions = true;
        }
        Ok(config)
    }
}

fn read_file_content(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("Failed to read file '{}': {}", path.display(), e))
}

fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(raw);

    for comp in p.components() {
        if matches!(comp, Component::ParentDir) {
            return Err(anyhow::anyhow!(
                "Parent directory components ('..') are not allowed in file paths."
            ));
        }
    }

    Ok(p.to_path_buf())
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}

/// `1`/`true`/`on` select the default filter; anything else is a filter expression.
fn filter_expr_from(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("1")
        || trimmed.eq_ignore_ascii_case("true")
        || trimmed.eq_ignore_ascii_case("on")
    {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn init_tracing(trace: bool) {
    let raw = std::env::var(LOG_ENV).ok();
    if let Some(raw) = &raw
        && !env_toggle_enabled(raw)
    {
        return;
    }
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        use tracing_subscriber::fmt;
        let fallback = if trace { TRACE_LOG_FILTER } else { DEFAULT_LOG_FILTER };
        let filter = raw
            .as_deref()
            .and_then(filter_expr_from)
            .and_then(|expr| EnvFilter::try_new(expr).ok())
            .unwrap_or_else(|| EnvFilter::new(fallback));
        let _ = fmt().with_writer(std::io::stderr).with_env_filter(filter).try_init();
    });
}

fn load_program(path: &Path) -> anyhow::Result<CodeObject> {
    let program = Program::from_file(path)?;
    debug!(target: "framevm::cli", file = %path.display(), "program loaded");
    Ok(program.into_code())
}

fn count_code_objects(code: &CodeObject) -> usize {
    1 + code.nested().map(count_code_objects).sum::<usize>()
}

fn run_file(path: &Path, engine_args: &EngineArgs) -> anyhow::Result<ExitCode> {
    let config = engine_args.resolve()?;
    let code = load_program(path)?;
    let mut registry = ModuleRegistry::new();
    register_stdlib_modules(&mut registry)?;
    let mut engine = Engine::with_config(StdHost::with_registry(registry), config);
    match engine.run(code) {
        Ok(Val::None) => Ok(ExitCode::SUCCESS),
        Ok(value) => {
            println!("{}", value.repr());
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => match err.downcast_ref::<UncaughtException>() {
            Some(exc) => {
                eprintln!("{}", exc.render_traceback());
                Ok(ExitCode::FAILURE)
            }
            None => Err(err),
        },
    }
}

fn check_file(path: &Path) -> anyhow::Result<ExitCode> {
    let code = load_program(path)?;
    println!(
        "{}: ok ({} instructions, {} code objects)",
        path.display(),
        code.instructions.len(),
        count_code_objects(&code)
    );
    Ok(ExitCode::SUCCESS)
}

fn disasm_file(path: &Path) -> anyhow::Result<ExitCode> {
    let code = load_program(path)?;
    print!("{}", code.disassemble());
    Ok(ExitCode::SUCCESS)
}

fn dispatch(args: CliArgs) -> anyhow::Result<ExitCode> {
    match args.command {
        Commands::Run { file, engine } => run_file(&file, &engine),
        Commands::Check { file } => check_file(&file),
        Commands::Disasm { file } => disasm_file(&file),
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();
    let trace = matches!(&args.command, Commands::Run { engine, .. } if engine.trace);
    init_tracing(trace);
    match dispatch(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(2)
        }
    }
}
