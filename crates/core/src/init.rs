//! `init` and `doctor` — ecosystem auto-detection and setup diagnostics,
//! the ambient onboarding flow the `cli` crate's subcommands drive.
//!
//! `init` auto-detects 8+ project ecosystems (Rust, Node.js, Go, Python, C/C++,
//! .NET, Unreal Engine, pnpm/uv workspaces) and generates `.codescope.toml`
//! and `.mcp.json` config files. `doctor` diagnoses setup issues.

use crate::config::WorkspaceConfig;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Ecosystem detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Ecosystem {
    Rust,
    Node,
    Pnpm,
    Go,
    Python,
    CppProject,
    DotNet,
    Unreal,
}

impl Ecosystem {
    fn label(self) -> &'static str {
        match self {
            Self::Rust => "Rust",
            Self::Node => "Node.js",
            Self::Pnpm => "pnpm",
            Self::Go => "Go",
            Self::Python => "Python",
            Self::CppProject => "C/C++",
            Self::DotNet => ".NET",
            Self::Unreal => "Unreal Engine",
        }
    }

    fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["rs", "toml"],
            Self::Node | Self::Pnpm => &["ts", "tsx", "js", "jsx", "json"],
            Self::Go => &["go"],
            Self::Python => &["py", "pyi"],
            Self::CppProject => &["h", "hpp", "cpp", "c", "cc"],
            Self::DotNet => &["cs", "csproj", "sln"],
            Self::Unreal => &["h", "hpp", "cpp", "c", "cc", "cs"],
        }
    }
}

struct DetectedProject {
    ecosystems: Vec<Ecosystem>,
    scan_dirs: Vec<String>,
    extensions: HashSet<String>,
    skip_dirs: Vec<String>,
    workspace_info: Option<String>,
}

// ---------------------------------------------------------------------------
// Workspace member resolvers
// ---------------------------------------------------------------------------

/// "temporal-runtime/temporal-ecs" -> "temporal-runtime"; "packages/*" -> "packages"
fn top_level_dir(pattern: &str) -> Option<&str> {
    let clean = pattern.trim_end_matches("/*").trim_end_matches("/**").trim_end_matches('/');
    let top = clean.split('/').next()?;
    if top.is_empty() || top == "." { None } else { Some(top) }
}

fn resolve_rust_workspace(root: &Path) -> (Vec<String>, Option<String>) {
    let cargo_path = root.join("Cargo.toml");
    let content = match std::fs::read_to_string(&cargo_path) {
        Ok(c) => c,
        Err(_) => return (fallback_dirs(root, &["src", "crates"]), None),
    };
    let table: toml::Table = match content.parse() {
        Ok(t) => t,
        Err(_) => return (fallback_dirs(root, &["src", "crates"]), None),
    };

    if let Some(workspace) = table.get("workspace").and_then(|v| v.as_table()) {
        if let Some(members) = workspace.get("members").and_then(|v| v.as_array()) {
            let mut dirs = BTreeSet::new();
            let mut member_count = 0;
            for member in members {
                if let Some(m) = member.as_str() {
                    member_count += 1;
                    if let Some(top) = top_level_dir(m) {
                        if root.join(top).is_dir() {
                            dirs.insert(top.to_string());
                        }
                    }
                }
            }
            if root.join("src").is_dir() {
                dirs.insert("src".to_string());
            }
            if !dirs.is_empty() {
                let info = format!("{member_count} members across {} directories", dirs.len());
                return (dirs.into_iter().collect(), Some(info));
            }
        }
    }
    (fallback_dirs(root, &["src", "crates"]), None)
}

fn resolve_node_workspace(root: &Path) -> (Vec<String>, Option<String>) {
    let pkg_path = root.join("package.json");
    let content = match std::fs::read_to_string(&pkg_path) {
        Ok(c) => c,
        Err(_) => return (fallback_dirs(root, &["src", "lib", "app"]), None),
    };
    let data: serde_json::Value = match serde_json::from_str(&content) {
        Ok(d) => d,
        Err(_) => return (fallback_dirs(root, &["src", "lib", "app"]), None),
    };

    let workspace_patterns: Vec<&str> = if let Some(arr) = data.get("workspaces").and_then(|v| v.as_array()) {
        arr.iter().filter_map(|v| v.as_str()).collect()
    } else if let Some(arr) = data.get("workspaces").and_then(|v| v.get("packages")).and_then(|v| v.as_array()) {
        arr.iter().filter_map(|v| v.as_str()).collect()
    } else {
        return (fallback_dirs(root, &["src", "lib", "app"]), None);
    };
    if workspace_patterns.is_empty() {
        return (fallback_dirs(root, &["src", "lib", "app"]), None);
    }

    let mut dirs = BTreeSet::new();
    let mut member_count = 0;
    for pattern in &workspace_patterns {
        if let Some(top) = top_level_dir(pattern) {
            if root.join(top).is_dir() {
                dirs.insert(top.to_string());
                if pattern.ends_with("/*") || pattern.ends_with("/**") {
                    if let Ok(entries) = std::fs::read_dir(root.join(top)) {
                        member_count += entries.flatten().filter(|e| e.path().is_dir()).count();
                    }
                } else {
                    member_count += 1;
                }
            }
        }
    }
    if root.join("src").is_dir() {
        dirs.insert("src".to_string());
    }
    if !dirs.is_empty() {
        let info = format!("{member_count} packages across {} directories", dirs.len());
        return (dirs.into_iter().collect(), Some(info));
    }
    (fallback_dirs(root, &["src", "lib", "app"]), None)
}

fn resolve_pnpm_workspace(root: &Path) -> (Vec<String>, Option<String>) {
    let yaml_path = root.join("pnpm-workspace.yaml");
    let content = match std::fs::read_to_string(&yaml_path) {
        Ok(c) => c,
        Err(_) => return resolve_node_workspace(root),
    };

    let mut dirs = BTreeSet::new();
    let mut member_count = 0;
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(pattern) = trimmed.strip_prefix("- ") {
            let pattern = pattern.trim().trim_matches('\'').trim_matches('"');
            if let Some(top) = top_level_dir(pattern) {
                if root.join(top).is_dir() {
                    dirs.insert(top.to_string());
                    if pattern.ends_with("/*") || pattern.ends_with("/**") {
                        if let Ok(entries) = std::fs::read_dir(root.join(top)) {
                            member_count += entries.flatten().filter(|e| e.path().is_dir()).count();
                        }
                    } else {
                        member_count += 1;
                    }
                }
            }
        }
    }
    if root.join("src").is_dir() {
        dirs.insert("src".to_string());
    }
    if !dirs.is_empty() {
        let info = format!("{member_count} packages across {} directories", dirs.len());
        return (dirs.into_iter().collect(), Some(info));
    }
    resolve_node_workspace(root)
}

fn resolve_go_workspace(root: &Path) -> (Vec<String>, Option<String>) {
    let work_path = root.join("go.work");
    if let Ok(content) = std::fs::read_to_string(&work_path) {
        let mut dirs = BTreeSet::new();
        let mut in_use_block = false;
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed == "use (" {
                in_use_block = true;
                continue;
            }
            if trimmed == ")" {
                in_use_block = false;
                continue;
            }
            if let Some(path) = trimmed.strip_prefix("use ") {
                let path = path.trim().trim_start_matches("./");
                if let Some(top) = top_level_dir(path) {
                    if root.join(top).is_dir() {
                        dirs.insert(top.to_string());
                    }
                }
            }
            if in_use_block {
                let path = trimmed.trim_start_matches("./");
                if let Some(top) = top_level_dir(path) {
                    if root.join(top).is_dir() {
                        dirs.insert(top.to_string());
                    }
                }
            }
        }
        if !dirs.is_empty() {
            let info = format!("Go workspace with {} modules", dirs.len());
            return (dirs.into_iter().collect(), Some(info));
        }
    }
    (fallback_dirs(root, &["cmd", "pkg", "internal", "api", "src"]), None)
}

fn resolve_python_workspace(root: &Path) -> (Vec<String>, Option<String>) {
    let pyproject_path = root.join("pyproject.toml");
    if let Ok(content) = std::fs::read_to_string(&pyproject_path) {
        if let Ok(table) = content.parse::<toml::Table>() {
            if let Some(members) = table
                .get("tool")
                .and_then(|v| v.get("uv"))
                .and_then(|v| v.get("workspace"))
                .and_then(|v| v.get("members"))
                .and_then(|v| v.as_array())
            {
                let mut dirs = BTreeSet::new();
                let mut member_count = 0;
                for member in members {
                    if let Some(m) = member.as_str() {
                        member_count += 1;
                        if let Some(top) = top_level_dir(m) {
                            if root.join(top).is_dir() {
                                dirs.insert(top.to_string());
                            }
                        }
                    }
                }
                if !dirs.is_empty() {
                    let info = format!("{member_count} packages across {} directories", dirs.len());
                    return (dirs.into_iter().collect(), Some(info));
                }
            }
        }
    }
    (fallback_dirs(root, &["src", "lib", "app"]), None)
}

fn resolve_dotnet_dirs(root: &Path) -> (Vec<String>, Option<String>) {
    let mut dirs = BTreeSet::new();
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Ok(sub_entries) = std::fs::read_dir(&path) {
                for sub in sub_entries.flatten() {
                    let name = sub.file_name();
                    let name = name.to_string_lossy();
                    if name.ends_with(".csproj") || name.ends_with(".fsproj") {
                        if let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) {
                            dirs.insert(dir_name.to_string());
                        }
                        break;
                    }
                }
            }
        }
    }
    let info = if !dirs.is_empty() { Some(format!("{} projects", dirs.len())) } else { None };
    (dirs.into_iter().collect(), info)
}

fn resolve_unreal_dirs(root: &Path) -> (Vec<String>, Option<String>) {
    let dirs: Vec<String> =
        ["Source", "Plugins", "Content"].iter().filter(|d| root.join(d).is_dir()).map(|d| d.to_string()).collect();
    (dirs, Some("Unreal Engine project".to_string()))
}

fn fallback_dirs(root: &Path, candidates: &[&str]) -> Vec<String> {
    candidates.iter().filter(|d| root.join(d).is_dir()).map(|d| d.to_string()).collect()
}

fn detect_skip_dirs(root: &Path) -> Vec<String> {
    let candidates = [
        "target", "dist", "build", "out", ".next", ".nuxt", ".output", "node_modules", "vendor", ".venv", "venv",
        "__pycache__", "generated", "gen", ".generated",
    ];
    candidates.iter().filter(|d| root.join(d).is_dir()).map(|d| d.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Main detection
// ---------------------------------------------------------------------------

fn detect_project(root: &Path) -> DetectedProject {
    let mut ecosystems = Vec::new();
    let mut scan_dirs = BTreeSet::new();
    let mut extensions = HashSet::new();
    let mut workspace_info = None;

    macro_rules! add_ecosystem {
        ($eco:expr, $dirs:expr, $info:expr) => {
            ecosystems.push($eco);
            for d in $dirs {
                scan_dirs.insert(d);
            }
            if workspace_info.is_none() {
                workspace_info = $info;
            }
            for ext in $eco.extensions() {
                extensions.insert(ext.to_string());
            }
        };
    }

    if root.join("Cargo.toml").exists() {
        let (dirs, info) = resolve_rust_workspace(root);
        add_ecosystem!(Ecosystem::Rust, dirs, info);
    }

    if root.join("package.json").exists() {
        if root.join("pnpm-workspace.yaml").exists() {
            let (dirs, info) = resolve_pnpm_workspace(root);
            add_ecosystem!(Ecosystem::Pnpm, dirs, info);
        } else {
            let (dirs, info) = resolve_node_workspace(root);
            add_ecosystem!(Ecosystem::Node, dirs, info);
        }
    }

    if root.join("go.mod").exists() || root.join("go.work").exists() {
        let (dirs, info) = resolve_go_workspace(root);
        add_ecosystem!(Ecosystem::Go, dirs, info);
    }

    if root.join("pyproject.toml").exists() || root.join("setup.py").exists() || root.join("setup.cfg").exists() {
        let (dirs, info) = resolve_python_workspace(root);
        add_ecosystem!(Ecosystem::Python, dirs, info);
    }

    if root.join("CMakeLists.txt").exists() || root.join("Makefile").exists() {
        let dirs = fallback_dirs(root, &["src", "include", "lib"]);
        add_ecosystem!(Ecosystem::CppProject, dirs, None);
    }

    let has_sln = std::fs::read_dir(root)
        .ok()
        .map(|entries| entries.flatten().any(|e| e.file_name().to_string_lossy().ends_with(".sln")))
        .unwrap_or(false);
    if has_sln {
        let (dirs, info) = resolve_dotnet_dirs(root);
        add_ecosystem!(Ecosystem::DotNet, dirs, info);
    }

    let has_uproject = std::fs::read_dir(root)
        .ok()
        .map(|entries| entries.flatten().any(|e| e.file_name().to_string_lossy().ends_with(".uproject")))
        .unwrap_or(false);
    if has_uproject {
        let (dirs, info) = resolve_unreal_dirs(root);
        add_ecosystem!(Ecosystem::Unreal, dirs, info);
    }

    scan_nested_ecosystems(root, &mut ecosystems, &mut scan_dirs, &mut extensions);

    if scan_dirs.is_empty() && !ecosystems.is_empty() {
        for d in &["src", "lib", "app", "pkg", "cmd", "internal"] {
            if root.join(d).is_dir() {
                scan_dirs.insert(d.to_string());
            }
        }
    }

    let skip_dirs = detect_skip_dirs(root);
    DetectedProject { ecosystems, scan_dirs: scan_dirs.into_iter().collect(), extensions, skip_dirs, workspace_info }
}

/// Subdirectories not already covered at the root that carry their own
/// ecosystem marker — e.g. root has `package.json` *and* `server/Cargo.toml`.
fn scan_nested_ecosystems(
    root: &Path,
    ecosystems: &mut Vec<Ecosystem>,
    scan_dirs: &mut BTreeSet<String>,
    extensions: &mut HashSet<String>,
) {
    let skip_set: HashSet<&str> = [
        "node_modules", "target", "dist", "build", ".git", "__pycache__", "vendor", ".venv", "venv", ".next",
        ".nuxt", "out", ".output", ".idea", ".vscode", ".vs",
    ]
    .iter()
    .copied()
    .collect();

    let Ok(entries) = std::fs::read_dir(root) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(dir_name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else { continue };
        if dir_name.starts_with('.') || skip_set.contains(dir_name.as_str()) || scan_dirs.contains(&dir_name) {
            continue;
        }

        let markers: &[(&str, Ecosystem)] = &[
            ("Cargo.toml", Ecosystem::Rust),
            ("package.json", Ecosystem::Node),
            ("go.mod", Ecosystem::Go),
            ("go.work", Ecosystem::Go),
            ("pyproject.toml", Ecosystem::Python),
            ("setup.py", Ecosystem::Python),
            ("CMakeLists.txt", Ecosystem::CppProject),
        ];
        for (marker, eco) in markers {
            if path.join(marker).exists() {
                if !ecosystems.contains(eco) {
                    ecosystems.push(*eco);
                }
                scan_dirs.insert(dir_name.clone());
                for ext in eco.extensions() {
                    extensions.insert(ext.to_string());
                }
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Validation — quick scan to count files
// ---------------------------------------------------------------------------

fn validate_scan(root: &Path, scan_dirs: &[String], extensions: &HashSet<String>) -> usize {
    let dirs_to_scan: Vec<String> = if scan_dirs.is_empty() { vec![".".to_string()] } else { scan_dirs.to_vec() };
    let default_skip: HashSet<&str> = [
        "node_modules", "target", "dist", "build", ".git", "__pycache__", "vendor", ".venv", "venv", ".next",
        ".nuxt", "out", ".output",
    ]
    .iter()
    .copied()
    .collect();

    let mut count = 0usize;
    let limit = 10_000;
    for dir_name in &dirs_to_scan {
        let dir = if dir_name == "." { root.to_path_buf() } else { root.join(dir_name) };
        if !dir.exists() {
            continue;
        }
        let walker = ignore::WalkBuilder::new(&dir).hidden(true).git_ignore(true).build();
        for entry in walker.flatten() {
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            let skip = path.components().any(|c| {
                matches!(c, std::path::Component::Normal(name) if default_skip.contains(name.to_string_lossy().as_ref()))
            });
            if skip {
                continue;
            }
            if !extensions.is_empty() {
                match path.extension().and_then(|e| e.to_str()) {
                    Some(ext) if extensions.contains(ext) => {}
                    _ => continue,
                }
            }
            count += 1;
            if count >= limit {
                return count;
            }
        }
    }
    count
}

// ---------------------------------------------------------------------------
// .codescope.toml generation
// ---------------------------------------------------------------------------

fn generate_codescope_toml(detection: &DetectedProject) -> String {
    let mut out = String::new();
    out.push_str("# Generated by `cs init`\n");

    let labels: Vec<&str> = detection.ecosystems.iter().map(|e| e.label()).collect();
    if labels.is_empty() {
        out.push_str("# Project type: Unknown\n\n");
    } else {
        out.push_str(&format!("# Project type: {}\n\n", labels.join(" + ")));
    }

    if !detection.scan_dirs.is_empty() {
        let quoted: Vec<String> = detection.scan_dirs.iter().map(|d| format!("\"{d}\"")).collect();
        out.push_str(&format!("scan_dirs = [{}]\n", quoted.join(", ")));
    }
    if !detection.extensions.is_empty() {
        let mut exts: Vec<&String> = detection.extensions.iter().collect();
        exts.sort();
        let quoted: Vec<String> = exts.iter().map(|e| format!("\"{e}\"")).collect();
        out.push_str(&format!("extensions = [{}]\n", quoted.join(", ")));
    }
    if !detection.skip_dirs.is_empty() {
        let quoted: Vec<String> = detection.skip_dirs.iter().map(|d| format!("\"{d}\"")).collect();
        out.push_str(&format!("skip_dirs = [{}]\n", quoted.join(", ")));
    }
    out
}

// ---------------------------------------------------------------------------
// .mcp.json generation / merge
// ---------------------------------------------------------------------------

fn codescope_mcp_entry(root: &Path) -> serde_json::Value {
    serde_json::json!({
        "type": "stdio",
        "command": "codescope-mcp",
        "args": ["--root", root.to_string_lossy()]
    })
}

fn write_or_merge_mcp_json(root: &Path) -> Result<(), String> {
    let mcp_path = root.join(".mcp.json");
    let entry = codescope_mcp_entry(root);

    if mcp_path.exists() {
        let content =
            std::fs::read_to_string(&mcp_path).map_err(|e| format!("failed to read {}: {e}", mcp_path.display()))?;
        let mut data: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| format!("failed to parse {}: {e}", mcp_path.display()))?;

        if let Some(servers) = data.get("mcpServers").and_then(|v| v.as_object()) {
            if servers.contains_key("codescope") {
                eprintln!("  codescope already configured in .mcp.json");
                return Ok(());
            }
        }

        let servers = data
            .as_object_mut()
            .ok_or("invalid .mcp.json: not an object")?
            .entry("mcpServers")
            .or_insert_with(|| serde_json::json!({}));
        servers
            .as_object_mut()
            .ok_or("invalid .mcp.json: mcpServers is not an object")?
            .insert("codescope".to_string(), entry);

        let output = serde_json::to_string_pretty(&data).map_err(|e| format!("failed to serialize .mcp.json: {e}"))?;
        std::fs::write(&mcp_path, format!("{output}\n")).map_err(|e| format!("failed to write {}: {e}", mcp_path.display()))?;
        eprintln!("  Added codescope to existing .mcp.json");
    } else {
        let data = serde_json::json!({ "mcpServers": { "codescope": entry } });
        let output = serde_json::to_string_pretty(&data).map_err(|e| format!("failed to serialize .mcp.json: {e}"))?;
        std::fs::write(&mcp_path, format!("{output}\n")).map_err(|e| format!("failed to write {}: {e}", mcp_path.display()))?;
        eprintln!("  Created .mcp.json");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// `cs init`
// ---------------------------------------------------------------------------

/// Auto-detect project ecosystem and generate `.codescope.toml` + `.mcp.json`.
/// Returns a process exit code, matching the CLI's `std::process::exit` convention.
pub fn run_init(root: &Path, build_semantic: bool) -> i32 {
    let root = match root.canonicalize() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: path '{}' not found: {e}", root.display());
            return 1;
        }
    };

    eprintln!("codescope init");
    eprintln!("  Project root: {}", root.display());

    let detection = detect_project(&root);
    if detection.ecosystems.is_empty() {
        eprintln!("  Detected: no recognized project type");
        eprintln!("  Will scan all files from project root");
    } else {
        let labels: Vec<&str> = detection.ecosystems.iter().map(|e| e.label()).collect();
        let type_str = labels.join(" + ");
        match &detection.workspace_info {
            Some(info) => eprintln!("  Detected: {type_str} ({info})"),
            None => eprintln!("  Detected: {type_str} project"),
        }
    }
    if !detection.scan_dirs.is_empty() {
        eprintln!("  Scan dirs: {:?}", detection.scan_dirs);
    }

    let config_path = root.join(".codescope.toml");
    if config_path.exists() {
        eprintln!("  .codescope.toml already exists, skipping");
    } else {
        let toml_content = generate_codescope_toml(&detection);
        if let Err(e) = std::fs::write(&config_path, &toml_content) {
            eprintln!("Error: failed to write .codescope.toml: {e}");
            return 1;
        }
        eprintln!("  Created .codescope.toml");
    }

    if let Err(e) = write_or_merge_mcp_json(&root) {
        eprintln!("Error: {e}");
        return 1;
    }

    let file_count = validate_scan(&root, &detection.scan_dirs, &detection.extensions);
    if file_count > 0 {
        if file_count >= 10_000 {
            eprintln!("  Validated: 10,000+ source files found");
        } else {
            eprintln!("  Validated: {file_count} source files found");
        }
    } else {
        eprintln!("  [WARN] No source files found with current settings.");
        eprintln!("         Try removing scan_dirs from .codescope.toml to scan everything.");
    }

    if build_semantic {
        eprintln!("  Building semantic index...");
        let config = WorkspaceConfig::load(&root);
        let files = crate::scan::scan_files(&root, &config);
        let store_dir = WorkspaceConfig::store_dir(&root);
        if let Err(e) = std::fs::create_dir_all(&store_dir) {
            eprintln!("  [WARN] could not create store dir: {e}");
        } else {
            let start = std::time::Instant::now();
            match crate::semantic::build_index(
                &store_dir.join("embeddings.db"),
                &files,
                config.semantic_model.as_deref(),
            ) {
                Ok(chunks) => {
                    eprintln!("  Semantic index built: {chunks} chunks in {:.1}s", start.elapsed().as_secs_f64());
                }
                Err(e) => eprintln!("  [WARN] semantic index build failed (non-fatal): {e}"),
            }
        }
    }

    eprintln!();
    eprintln!("  Open your MCP client in {} -- CodeScope tools are now available.", root.display());
    0
}

// ---------------------------------------------------------------------------
// `cs doctor`
// ---------------------------------------------------------------------------

/// Diagnose setup issues: config files, scan reachability, nested-repo roots.
pub fn run_doctor(root: &Path) -> i32 {
    let root = match root.canonicalize() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: path '{}' not found: {e}", root.display());
            return 1;
        }
    };

    let version = env!("CARGO_PKG_VERSION");
    let mut has_warn = false;
    let mut has_fail = false;

    eprintln!("codescope doctor");
    eprintln!();
    eprintln!("  [PASS] codescope v{version}");

    let config_path = root.join(".codescope.toml");
    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path).unwrap_or_default();
        match content.parse::<toml::Table>() {
            Ok(_) => eprintln!("  [PASS] .codescope.toml exists and is valid TOML"),
            Err(e) => {
                eprintln!("  [FAIL] .codescope.toml exists but is invalid: {e}");
                has_fail = true;
            }
        }
    } else {
        eprintln!("  [WARN] .codescope.toml not found (will use defaults)");
        has_warn = true;
    }

    let mcp_path = root.join(".mcp.json");
    if mcp_path.exists() {
        let content = std::fs::read_to_string(&mcp_path).unwrap_or_default();
        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(data) => {
                if data.get("mcpServers").and_then(|v| v.get("codescope")).is_some() {
                    eprintln!("  [PASS] .mcp.json has codescope entry");
                } else {
                    eprintln!("  [WARN] .mcp.json exists but missing codescope entry");
                    has_warn = true;
                }
            }
            Err(e) => {
                eprintln!("  [FAIL] .mcp.json exists but is invalid JSON: {e}");
                has_fail = true;
            }
        }
    } else {
        eprintln!("  [FAIL] .mcp.json not found (run: cs init)");
        has_fail = true;
    }

    let config = WorkspaceConfig::load(&root);
    let scan_dirs: Vec<String> = if config.scan_dirs.is_empty() { vec![".".to_string()] } else { config.scan_dirs.clone() };
    let skip_dirs = config.skip_dirs_set();
    let extensions = config.extensions_set();

    let start = std::time::Instant::now();
    let mut file_count = 0usize;
    let mut estimated_total = 0usize;
    let scan_limit = 100;

    for dir_name in &scan_dirs {
        let scan_root = if dir_name == "." { root.clone() } else { root.join(dir_name) };
        if !scan_root.exists() {
            continue;
        }
        let walker = ignore::WalkBuilder::new(&scan_root).hidden(true).git_ignore(true).build();
        for entry in walker.flatten() {
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            let skip = path.components().any(|c| {
                matches!(c, std::path::Component::Normal(name) if skip_dirs.contains(name.to_string_lossy().as_ref()))
            });
            if skip {
                continue;
            }
            if !extensions.is_empty() {
                match path.extension().and_then(|e| e.to_str()) {
                    Some(ext) if extensions.contains(ext) => {}
                    _ => continue,
                }
            }
            estimated_total += 1;
            if file_count < scan_limit {
                file_count += 1;
            }
        }
    }
    let elapsed = start.elapsed();

    if file_count > 0 {
        eprintln!("  [PASS] Test scan: found {file_count} files in {elapsed:.0?}");
    } else {
        eprintln!("  [WARN] Test scan: no files found");
        has_warn = true;
    }
    eprintln!("  [INFO] Estimated total files: {estimated_total}");

    let mut git_dirs = 0;
    if let Ok(entries) = std::fs::read_dir(&root) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && path.join(".git").exists() {
                git_dirs += 1;
            }
        }
    }
    if git_dirs > 1 {
        eprintln!("  [WARN] Found {git_dirs} subdirectories with .git -- root may be too broad");
        has_warn = true;
    }

    eprintln!();
    if has_fail {
        eprintln!("  Result: FAIL -- fix the issues above");
        1
    } else if has_warn {
        eprintln!("  Result: PASS with warnings");
        0
    } else {
        eprintln!("  Result: ALL PASS");
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rust_workspace_from_cargo_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Cargo.toml"),
            "[workspace]\nmembers = [\"crates/core\"]\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("crates/core")).unwrap();

        let detection = detect_project(dir.path());
        assert!(detection.ecosystems.contains(&Ecosystem::Rust));
        assert!(detection.scan_dirs.contains(&"crates".to_string()));
    }

    #[test]
    fn run_init_creates_config_and_mcp_json() {
        let dir = tempfile::tempdir().unwrap();
        let code = run_init(dir.path(), false);
        assert_eq!(code, 0);
        assert!(dir.path().join(".codescope.toml").exists());
        assert!(dir.path().join(".mcp.json").exists());
    }

    #[test]
    fn run_init_is_idempotent_on_existing_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".codescope.toml"), "# hand-written\n").unwrap();
        let code = run_init(dir.path(), false);
        assert_eq!(code, 0);
        let content = std::fs::read_to_string(dir.path().join(".codescope.toml")).unwrap();
        assert_eq!(content, "# hand-written\n");
    }

    #[test]
    fn doctor_fails_without_mcp_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".codescope.toml"), "").unwrap();
        let code = run_doctor(dir.path());
        assert_eq!(code, 1);
    }
}
