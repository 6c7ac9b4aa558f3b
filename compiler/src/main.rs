//! AtomC Compiler CLI
//!
//! Command-line driver: lexes, parses/analyzes, and code-generates an AtomC
//! source file, then (unless `--no-run`) hands the compiled program to the
//! bytecode VM. `--dump-tokens`/`--dump-symbols`/`--trace` enable the three
//! output streams named by the external interface; `--out-dir` redirects
//! them to files instead of stdout.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser as ClapParser, ValueEnum};

#[derive(ClapParser)]
#[command(name = "atomc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "AtomC compiler and VM driver", long_about = None)]
struct Cli {
    /// Path to the .atomc source file
    file: PathBuf,

    /// Print the token stream
    #[arg(long)]
    dump_tokens: bool,

    /// Print the global symbol table
    #[arg(long)]
    dump_symbols: bool,

    /// Print one line per executed VM instruction
    #[arg(long)]
    trace: bool,

    /// Output format for enabled dumps
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Write enabled dumps to files under this directory instead of stdout
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Compile (and produce any requested dumps) but don't execute the VM
    #[arg(long)]
    no_run: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("atomc_compiler=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("{e}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), atomc_compiler::CompileError> {
    use atomc_compiler::CompileError;

    if let Some(dir) = &cli.out_dir {
        fs::create_dir_all(dir).map_err(|e| CompileError::io(format!("cannot create {}: {e}", dir.display())))?;
    }

    let source = fs::read_to_string(&cli.file)
        .map_err(|e| CompileError::io(format!("cannot read {}: {e}", cli.file.display())))?;

    tracing::info!(file = %cli.file.display(), "compiling");

    let tokens = atomc_compiler::tokenize_source(&source)?;
    if cli.dump_tokens {
        emit_dump(cli, "tokens", &atomc_compiler::dump::tokens_text(&tokens), &atomc_compiler::dump::tokens_json(&tokens))?;
    }

    let unit = atomc_compiler::compile(tokens)?;
    if cli.dump_symbols {
        let domain = unit.symtab.global_domain();
        let text = atomc_compiler::dump::symbols_text(&unit.symtab, domain);
        let json = atomc_compiler::dump::symbols_json(&unit.symtab, domain);
        emit_dump(cli, "symbols", &text, &json)?;
    }

    if cli.no_run {
        return Ok(());
    }

    tracing::info!("running");
    let mut vm = atomc_compiler::vm_for(&unit);

    let trace_buf = if cli.trace {
        Some(std::sync::Arc::new(std::sync::Mutex::new(Vec::<u8>::new())))
    } else {
        None
    };
    if let Some(buf) = &trace_buf {
        vm.set_trace(Box::new(SharedBuf(buf.clone())));
    }

    vm.run().map_err(CompileError::from)?;

    if let Some(buf) = trace_buf {
        let text = String::from_utf8_lossy(&buf.lock().unwrap()).into_owned();
        let json = atomc_compiler::dump::trace_text_to_json(&text);
        emit_dump(cli, "trace", &text, &json)?;
    }

    Ok(())
}

/// Write a dump stream to `DIR/<name>.{txt,json}` if `--out-dir` was given,
/// else to stdout, in the format `--format` selected.
fn emit_dump(cli: &Cli, name: &str, text: &str, json: &str) -> Result<(), atomc_compiler::CompileError> {
    use atomc_compiler::CompileError;

    let body = match cli.format {
        Format::Text => text,
        Format::Json => json,
    };

    match &cli.out_dir {
        Some(dir) => {
            let ext = match cli.format {
                Format::Text => "txt",
                Format::Json => "json",
            };
            let path: PathBuf = dir_file(dir, name, ext);
            fs::write(&path, body).map_err(|e| CompileError::io(format!("cannot write {}: {e}", path.display())))?;
        }
        None => {
            println!("{body}");
        }
    }
    Ok(())
}

fn dir_file(dir: &Path, name: &str, ext: &str) -> PathBuf {
    dir.join(format!("{name}.{ext}"))
}

#[derive(Clone)]
struct SharedBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::Write::write(&mut *self.0.lock().unwrap(), buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
