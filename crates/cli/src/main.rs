//! CodeScope CLI — search, refactor, and workspace maintenance from the
//! terminal. Calls `codescope-core` directly; `serve` hands off to the
//! `codescope-mcp` transport layer.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use codescope_core::types::QueryMode;
use codescope_core::{git, init, open_or_index, planner, refactor};

#[derive(Parser)]
#[command(name = "cs", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server (stdio transport) for this workspace. Default
    /// when no subcommand is given.
    Serve {
        #[arg(long)]
        root: Option<PathBuf>,
        /// Serve over streamable HTTP on this port instead of stdio
        #[arg(long)]
        port: Option<u16>,
    },
    /// Search the workspace (auto-routes to exact/fuzzy/regex/symbol tiers)
    Search {
        query: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long, value_enum)]
        mode: Option<CliQueryMode>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Read a file's contents
    Read {
        path: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        start: Option<usize>,
        #[arg(long)]
        end: Option<usize>,
    },
    /// Rebuild the full workspace index (store, symbol DB, code graph)
    Index {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Auto-detect the project ecosystem and write `.codescope.toml` / `.mcp.json`
    Init {
        path: Option<PathBuf>,
        /// Pre-build the semantic (tier 3) index during init
        #[arg(long)]
        semantic: bool,
    },
    /// Diagnose configuration and scan-reachability issues
    Doctor {
        path: Option<PathBuf>,
    },
    /// Rename a symbol across the workspace
    Rename {
        old_name: String,
        new_name: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        apply: bool,
    },
    /// Show blame for a file, optionally restricted to a line range
    Blame {
        path: String,
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        start: Option<usize>,
        #[arg(long)]
        end: Option<usize>,
    },
    /// Generate shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliQueryMode {
    Auto,
    Exact,
    Fuzzy,
    Regex,
    Symbol,
    Semantic,
}

impl From<CliQueryMode> for QueryMode {
    fn from(m: CliQueryMode) -> Self {
        match m {
            CliQueryMode::Auto => QueryMode::Auto,
            CliQueryMode::Exact => QueryMode::Exact,
            CliQueryMode::Fuzzy => QueryMode::Fuzzy,
            CliQueryMode::Regex => QueryMode::Regex,
            CliQueryMode::Symbol => QueryMode::Symbol,
            CliQueryMode::Semantic => QueryMode::Semantic,
        }
    }
}

fn resolve_root(root: Option<PathBuf>) -> PathBuf {
    root.unwrap_or_else(|| std::env::current_dir().expect("could not determine current directory"))
        .canonicalize()
        .expect("path not found")
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("codescope=warn".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve { root: None, port: None });

    match command {
        Commands::Serve { root, port } => {
            let root = resolve_root(root);
            if let Err(e) = codescope_mcp::serve(&root, port) {
                eprintln!("server error: {e}");
                std::process::exit(1);
            }
        }
        Commands::Search { query, root, mode, limit } => run_search(query, root, mode, limit, cli.json),
        Commands::Read { path, root, start, end } => run_read(path, root, start, end, cli.json),
        Commands::Index { root } => {
            let root = resolve_root(root);
            match open_or_index(&root) {
                Ok(_) => eprintln!("Indexed {}", root.display()),
                Err(e) => {
                    eprintln!("index failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Init { path, semantic } => {
            let root = path.unwrap_or_else(|| std::env::current_dir().expect("could not determine current directory"));
            std::process::exit(init::run_init(&root, semantic));
        }
        Commands::Doctor { path } => {
            let root = path.unwrap_or_else(|| std::env::current_dir().expect("could not determine current directory"));
            std::process::exit(init::run_doctor(&root));
        }
        Commands::Rename { old_name, new_name, root, apply } => run_rename(old_name, new_name, root, apply, cli.json),
        Commands::Blame { path, root, start, end } => run_blame(path, root, start, end, cli.json),
        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "cs", &mut std::io::stdout());
        }
    }
}

fn run_search(query: String, root: Option<PathBuf>, mode: Option<CliQueryMode>, limit: usize, json: bool) {
    let root = resolve_root(root);
    let handle = open_or_index(&root).unwrap_or_else(|e| {
        eprintln!("could not open workspace index: {e}");
        std::process::exit(1);
    });

    let mode: QueryMode = mode.map(Into::into).unwrap_or(QueryMode::Auto);
    let result = match planner::execute(&handle, mode, &query, limit, true) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("search failed: {e}");
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result).unwrap());
        return;
    }

    if result.hits.is_empty() {
        eprintln!("No results for '{query}'");
        std::process::exit(1);
    }
    for hit in &result.hits {
        println!("{:<60} {:>6.1}  {}:{}", hit.path, hit.score, hit.start_line, hit.end_line);
        if let Some(snippet) = &hit.snippet {
            println!("    {snippet}");
        }
    }
    eprintln!("\n{} results ({}ms)", result.hits.len(), result.elapsed_ms);
}

fn run_read(path: String, root: Option<PathBuf>, start: Option<usize>, end: Option<usize>, json: bool) {
    let root = resolve_root(root);
    let read = codescope_core::fileedit::read_with_encoding(&root, &path).unwrap_or_else(|e| {
        eprintln!("could not read {path}: {e}");
        std::process::exit(1);
    });

    let start = start.unwrap_or(1).max(1) - 1;
    let end = end.unwrap_or(read.lines.len()).min(read.lines.len());

    if json {
        let output = serde_json::json!({
            "path": path,
            "start_line": start + 1,
            "end_line": end,
            "total_lines": read.lines.len(),
            "content": read.lines[start..end].join("\n"),
        });
        println!("{}", serde_json::to_string_pretty(&output).unwrap());
    } else {
        for (i, line) in read.lines[start..end].iter().enumerate() {
            println!("{:>5} | {}", start + i + 1, line);
        }
    }
}

fn run_rename(old_name: String, new_name: String, root: Option<PathBuf>, apply: bool, json: bool) {
    let root = resolve_root(root);
    let handle = open_or_index(&root).unwrap_or_else(|e| {
        eprintln!("could not open workspace index: {e}");
        std::process::exit(1);
    });

    let result = refactor::rename_symbol(&handle, &root, &old_name, &new_name, !apply, None).unwrap_or_else(|e| {
        eprintln!("rename failed: {e}");
        std::process::exit(1);
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&result).unwrap());
        return;
    }

    if result.dry_run {
        eprintln!("dry run -- {} file(s) would change (pass --apply to write)", result.plan.files.len());
    } else {
        let ok = result.applied.iter().filter(|a| a.applied).count();
        eprintln!("applied to {ok}/{} file(s)", result.applied.len());
    }
    for file in &result.plan.files {
        println!("{:<60} {} edit(s)", file.path, file.edits.len());
    }
    for warning in &result.plan.warnings {
        eprintln!("warning: {warning}");
    }
}

fn run_blame(path: String, root: Option<PathBuf>, start: Option<usize>, end: Option<usize>, json: bool) {
    let root = resolve_root(root);
    let lines = git::blame(&root, &path, start, end).unwrap_or_else(|e| {
        eprintln!("blame failed: {e}");
        std::process::exit(1);
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&lines).unwrap());
        return;
    }
    for line in &lines {
        println!("{:>5} {} {} | {}", line.line, &line.commit, line.author, line.content);
    }
}
