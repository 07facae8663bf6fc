use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use composable_namespace::{
    AutoloadMap, DefinitionFile, Dependency, DependencyGraph, FileLoader, LoadFailurePolicy,
    ModuleDefinition, Namespace, resolver,
};
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "namespace")]
#[command(about = "Resolve and inspect module namespaces declared in definition files")]
struct Cli {
    #[command(flatten)]
    mode: ModeArgs,

    /// Map a namespace prefix to a directory of definition files
    #[arg(long = "autoload", value_name = "PREFIX=PATH", value_parser = parse_autoload)]
    autoload: Vec<(String, PathBuf)>,

    /// What happens to dependents when autoloading fails
    #[arg(long, value_enum, default_value_t = LoadFailurePolicy::Warn)]
    on_load_failure: LoadFailurePolicy,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Module definition files (.toml or .json)
    #[arg(required = true)]
    definitions: Vec<PathBuf>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ModeArgs {
    /// Print the static dependency graph without constructing anything
    #[arg(long, short)]
    dry_run: bool,

    /// Export the dependency graph to a DOT file (graph.dot)
    #[arg(long, short)]
    export: bool,

    /// Resolve the namespace and report what was bound
    #[arg(long, short)]
    run: bool,

    /// Resolve the namespace, then start an interactive session
    #[arg(long, short)]
    interactive: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List bound modules
    List,
    /// Show a module, optionally a property inside it
    Get {
        /// The module reference, e.g., app.Config#db.host
        target: String,
    },
    /// Show entries still waiting on dependencies
    Pending,
    /// Explain why pending entries cannot progress
    Diagnose,
}

fn parse_autoload(arg: &str) -> Result<(String, PathBuf), String> {
    let (prefix, path) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected PREFIX=PATH, got '{arg}'"))?;
    Ok((prefix.to_string(), PathBuf::from(path)))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    println!("Loading definitions from: {:?}...", cli.definitions);
    let files = cli
        .definitions
        .iter()
        .map(|path| DefinitionFile::read(path))
        .collect::<Result<Vec<_>>>()?;

    if cli.mode.dry_run {
        let graph = build_graph(&files)?;
        println!("--- Module Dependency Graph (Dry Run) ---");
        println!("{graph:#?}");
        println!("Build order: {}", graph.build_order().join(", "));
        println!("-----------------------------------------");
    } else if cli.mode.export {
        let graph = build_graph(&files)?;
        let filename = "graph.dot";
        graph.write_dot_file(filename)?;
        println!("Graph exported to {filename}");
    } else {
        let (namespace, failed) = resolve(&cli, &files)?;
        if cli.mode.interactive {
            run_interactive_session(&namespace)?;
        } else {
            for name in namespace.names() {
                let value = namespace.get(&name)?;
                println!("- {name} = {}", serde_json::to_string(&value.to_json())?);
            }
            namespace.check()?;
            if failed > 0 {
                anyhow::bail!("{failed} modules failed to load or construct");
            }
        }
    }

    Ok(())
}

fn build_graph(files: &[DefinitionFile]) -> Result<DependencyGraph> {
    let definitions: Vec<ModuleDefinition> = files
        .iter()
        .flat_map(|file| file.modules.iter().cloned())
        .collect();
    DependencyGraph::build(&definitions)
}

/// Apply every definition file, fire the ready signal and report failures.
fn resolve(cli: &Cli, files: &[DefinitionFile]) -> Result<(Namespace, usize)> {
    let namespace = Namespace::builder()
        .with_loader(FileLoader::new())
        .with_autoload_map(cli.autoload.iter().cloned().collect::<AutoloadMap>())
        .with_load_failure(cli.on_load_failure)
        .build();
    for file in files {
        file.apply(&namespace)?;
    }
    namespace.ready();

    let failures = namespace.take_failures();
    for failure in &failures {
        eprintln!("Error: {}", failure.error);
    }
    println!(
        "Resolved {} modules ({} failed, {} pending).",
        namespace.names().len(),
        failures.len(),
        namespace.pending().len()
    );
    Ok((namespace, failures.len()))
}

fn run_interactive_session(namespace: &Namespace) -> Result<()> {
    println!("Starting interactive session. Type 'help' for commands.");
    let mut rl = Editor::<(), DefaultHistory>::new()?;
    loop {
        let readline = rl.readline("> ");
        match readline {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                if handle_command(line, namespace).is_err() {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err:?}");
                break;
            }
        }
    }

    Ok(())
}

fn handle_command(line: String, namespace: &Namespace) -> Result<(), ()> {
    let parts = parse_quoted_args(&line);

    let Some(command_str) = parts.first() else {
        return Ok(());
    };
    let command = match command_str.as_str() {
        "list" => Some(Commands::List),
        "get" => parts.get(1).map_or_else(
            || {
                eprintln!("Usage: get <module>[#property]");
                None
            },
            |target| {
                Some(Commands::Get {
                    target: target.to_string(),
                })
            },
        ),
        "pending" => Some(Commands::Pending),
        "diagnose" => Some(Commands::Diagnose),
        "help" => {
            println!("Available commands:");
            println!("  list                            - List bound modules");
            println!("  get <module>[#property]         - Show a module or one of its properties");
            println!("  pending                         - Show entries waiting on dependencies");
            println!("  diagnose                        - Explain unresolvable dependencies");
            println!("  help                            - Show this help message");
            println!("  exit, quit                      - Exit the interactive session");
            None
        }
        "exit" | "quit" => return Err(()),
        _ => {
            eprintln!("Unknown command. Type 'help' for a list of commands.");
            None
        }
    };

    match command {
        Some(Commands::List) => {
            for name in namespace.names() {
                println!("- {name}");
            }
        }
        Some(Commands::Get { target }) => {
            let reference = Dependency::parse(&target);
            let value = namespace.get(&reference.name).and_then(|value| match &reference.property {
                Some(path) => resolver::property(&reference.name, &value, path),
                None => Ok(value),
            });
            match value.map(|value| serde_json::to_string_pretty(&value.to_json())) {
                Ok(Ok(rendered)) => println!("{rendered}"),
                Ok(Err(e)) => eprintln!("Error: {e}"),
                Err(e) => eprintln!("Error: {e}"),
            }
        }
        Some(Commands::Pending) => {
            let pending = namespace.pending();
            if pending.is_empty() {
                println!("Nothing pending.");
            }
            for entry in pending {
                println!("- {} waits on {}", entry.owner, entry.waiting_on.join(", "));
            }
        }
        Some(Commands::Diagnose) => {
            let diagnosis = namespace.diagnose();
            if diagnosis.is_clean() {
                println!("No unresolvable dependencies.");
            } else {
                print!("{diagnosis}");
            }
        }
        None => {}
    }
    Ok(())
}

fn parse_quoted_args(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote_char: Option<char> = None;

    for ch in line.trim().chars() {
        match (ch, quote_char) {
            ('"', None) | ('\'', None) => quote_char = Some(ch),
            (ch, Some(open_char)) if ch == open_char => quote_char = None,
            (' ', None) => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            (ch, _) => current.push(ch),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
