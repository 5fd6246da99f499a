//! Repository tech stack detection.
//!
//! Walks a repository (bounded depth, skipping vendored and build output
//! directories) looking for well-known marker files, then reads the
//! shallowest language marker to infer language, framework, runtime,
//! package manager, test framework and build tool. Deployment target comes
//! from platform config files.

pub mod workflow;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::errors::StackError;

/// How deep below the repository root marker files are looked for.
pub const DEFAULT_MAX_DEPTH: usize = 2;

const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    ".git",
    "dist",
    "build",
    "vendor",
    ".venv",
    "venv",
    "__pycache__",
];

/// Language markers in priority order (earlier wins at equal depth).
const LANGUAGE_MARKERS: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "setup.py",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
];

const DEPLOY_MARKERS: &[(&str, &str)] = &[
    ("vercel.json", "Vercel"),
    ("netlify.toml", "Netlify"),
    ("fly.toml", "Fly.io"),
    ("Dockerfile", "Docker"),
];

/// What a repository is built with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechStack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_target: Option<String>,
}

impl TechStack {
    /// Framework, else language, else "Unknown".
    pub fn display_name(&self) -> &str {
        self.framework
            .as_deref()
            .or(self.language.as_deref())
            .unwrap_or("Unknown")
    }

    /// Pipeline features worth enabling for this stack.
    pub fn recommended_features(&self) -> Vec<String> {
        let mut features = Vec::new();
        if let Some(test) = &self.test_framework {
            features.push(format!("Automated testing with {}", test));
        }
        if let Some(build) = &self.build_tool {
            features.push(format!("Build optimization with {}", build));
        }
        if let Some(target) = &self.deployment_target {
            features.push(format!("Deployment to {}", target));
        }
        features.push("Code quality checks and linting".to_string());
        features.push("Security vulnerability scanning".to_string());
        features
    }

    pub fn is_empty(&self) -> bool {
        *self == TechStack::default()
    }
}

/// Detect the tech stack of the repository at `root`.
pub fn detect(root: &Path) -> Result<TechStack, StackError> {
    detect_with_depth(root, DEFAULT_MAX_DEPTH)
}

/// Detect with an explicit search depth (1 = root directory only).
pub fn detect_with_depth(root: &Path, max_depth: usize) -> Result<TechStack, StackError> {
    if !root.exists() {
        return Err(StackError::PathNotFound {
            path: root.to_path_buf(),
        });
    }
    if !root.is_dir() {
        return Err(StackError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let markers = find_markers(root, max_depth);
    let mut stack = TechStack::default();

    let primary = markers
        .iter()
        .filter_map(|(depth, path)| {
            let priority = LANGUAGE_MARKERS
                .iter()
                .position(|m| Some(*m) == file_name(path))?;
            Some(((*depth, priority), path))
        })
        .min_by_key(|(key, _)| *key)
        .map(|(_, path)| path);

    if let Some(path) = primary {
        tracing::debug!(marker = %path.display(), "primary language marker");
        match file_name(path) {
            Some("package.json") => detect_node(path, &mut stack)?,
            Some("Cargo.toml") => detect_rust(path, &mut stack)?,
            Some("pyproject.toml" | "requirements.txt" | "setup.py") => {
                detect_python(path, &mut stack)?
            }
            Some("go.mod") => detect_go(path, &mut stack)?,
            Some("pom.xml" | "build.gradle" | "build.gradle.kts") => detect_jvm(path, &mut stack)?,
            _ => {}
        }
    }

    stack.deployment_target = markers
        .iter()
        .filter_map(|(depth, path)| {
            let (priority, (_, target)) = DEPLOY_MARKERS
                .iter()
                .enumerate()
                .find(|(_, (marker, _))| Some(*marker) == file_name(path))?;
            Some(((*depth, priority), *target))
        })
        .min_by_key(|(key, _)| *key)
        .map(|(_, target)| target.to_string());

    Ok(stack)
}

fn find_markers(root: &Path, max_depth: usize) -> Vec<(usize, PathBuf)> {
    WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !IGNORED_DIRS
                    .iter()
                    .any(|d| *d == e.file_name().to_string_lossy())
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            LANGUAGE_MARKERS.iter().any(|m| *m == name)
                || DEPLOY_MARKERS.iter().any(|(m, _)| *m == name)
        })
        .map(|e| (e.depth(), e.into_path()))
        .collect()
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn read(path: &Path) -> Result<String, StackError> {
    std::fs::read_to_string(path).map_err(|source| StackError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a sibling file if present, lowercased.
fn read_sibling_lower(dir: &Path, name: &str) -> String {
    std::fs::read_to_string(dir.join(name))
        .map(|s| s.to_lowercase())
        .unwrap_or_default()
}

fn first_match(names: &BTreeSet<String>, table: &[(&str, &str)]) -> Option<String> {
    table
        .iter()
        .find(|(dep, _)| names.contains(*dep))
        .map(|(_, label)| label.to_string())
}

fn detect_node(manifest: &Path, stack: &mut TechStack) -> Result<(), StackError> {
    let dir = manifest.parent().unwrap_or(Path::new("."));
    let content = read(manifest)?;
    let parsed: serde_json::Value = serde_json::from_str(&content).unwrap_or_else(|e| {
        tracing::warn!(path = %manifest.display(), error = %e, "package.json is not valid JSON");
        serde_json::Value::Null
    });

    let deps: BTreeSet<String> = ["dependencies", "devDependencies"]
        .iter()
        .filter_map(|key| parsed.get(*key).and_then(|v| v.as_object()))
        .flat_map(|obj| obj.keys().cloned())
        .collect();

    stack.language = Some(
        if dir.join("tsconfig.json").exists() || deps.contains("typescript") {
            "TypeScript"
        } else {
            "JavaScript"
        }
        .to_string(),
    );

    let (runtime, package_manager) = if dir.join("bun.lockb").exists() {
        ("Bun", "bun")
    } else if dir.join("pnpm-lock.yaml").exists() {
        ("Node.js", "pnpm")
    } else if dir.join("yarn.lock").exists() {
        ("Node.js", "yarn")
    } else {
        ("Node.js", "npm")
    };
    stack.runtime = Some(runtime.to_string());
    stack.package_manager = Some(package_manager.to_string());

    stack.framework = first_match(
        &deps,
        &[
            ("next", "Next.js"),
            ("nuxt", "Nuxt"),
            ("@angular/core", "Angular"),
            ("@sveltejs/kit", "SvelteKit"),
            ("svelte", "Svelte"),
            ("vue", "Vue"),
            ("react", "React"),
            ("@nestjs/core", "NestJS"),
            ("express", "Express"),
        ],
    );
    stack.test_framework = first_match(
        &deps,
        &[
            ("vitest", "Vitest"),
            ("jest", "Jest"),
            ("mocha", "Mocha"),
            ("@playwright/test", "Playwright"),
            ("cypress", "Cypress"),
        ],
    );
    stack.build_tool = first_match(
        &deps,
        &[
            ("vite", "Vite"),
            ("next", "Next.js"),
            ("webpack", "webpack"),
            ("rollup", "Rollup"),
            ("esbuild", "esbuild"),
            ("parcel", "Parcel"),
            ("typescript", "tsc"),
        ],
    );
    Ok(())
}

fn detect_rust(manifest: &Path, stack: &mut TechStack) -> Result<(), StackError> {
    let content = read(manifest)?;
    let parsed: toml::Table = toml::from_str(&content).unwrap_or_else(|e| {
        tracing::warn!(path = %manifest.display(), error = %e, "Cargo.toml is not valid TOML");
        toml::Table::new()
    });

    let workspace_deps = parsed
        .get("workspace")
        .and_then(|w| w.get("dependencies"));
    let deps: BTreeSet<String> = [parsed.get("dependencies"), workspace_deps]
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_table())
        .flat_map(|t| t.keys().cloned())
        .collect();

    stack.language = Some("Rust".to_string());
    stack.package_manager = Some("cargo".to_string());
    stack.test_framework = Some("cargo test".to_string());
    stack.build_tool = Some("cargo".to_string());
    stack.framework = first_match(
        &deps,
        &[
            ("axum", "Axum"),
            ("actix-web", "Actix Web"),
            ("rocket", "Rocket"),
            ("warp", "Warp"),
            ("tauri", "Tauri"),
            ("bevy", "Bevy"),
        ],
    );
    Ok(())
}

fn detect_python(marker: &Path, stack: &mut TechStack) -> Result<(), StackError> {
    let dir = marker.parent().unwrap_or(Path::new("."));
    // Confirms the marker itself is readable; siblings are best-effort.
    read(marker)?;
    let pyproject = read_sibling_lower(dir, "pyproject.toml");
    let text = [
        pyproject.as_str(),
        &read_sibling_lower(dir, "requirements.txt"),
        &read_sibling_lower(dir, "setup.py"),
    ]
    .join("\n");

    stack.language = Some("Python".to_string());
    stack.runtime = Some("CPython".to_string());

    let package_manager = if pyproject.contains("[tool.poetry]") {
        "poetry"
    } else if dir.join("uv.lock").exists() {
        "uv"
    } else if dir.join("Pipfile").exists() {
        "pipenv"
    } else {
        "pip"
    };
    stack.package_manager = Some(package_manager.to_string());
    if package_manager == "poetry" {
        stack.build_tool = Some("Poetry".to_string());
    }

    stack.framework = [("django", "Django"), ("fastapi", "FastAPI"), ("flask", "Flask")]
        .iter()
        .find(|(needle, _)| text.contains(needle))
        .map(|(_, label)| label.to_string());
    stack.test_framework = Some(if text.contains("pytest") { "pytest" } else { "unittest" }.to_string());
    Ok(())
}

fn detect_go(manifest: &Path, stack: &mut TechStack) -> Result<(), StackError> {
    let content = read(manifest)?;

    stack.language = Some("Go".to_string());
    stack.runtime = Some("Go".to_string());
    stack.package_manager = Some("go modules".to_string());
    stack.test_framework = Some("go test".to_string());
    stack.build_tool = Some("go build".to_string());
    stack.framework = [
        ("github.com/gin-gonic/gin", "Gin"),
        ("github.com/labstack/echo", "Echo"),
        ("github.com/gofiber/fiber", "Fiber"),
    ]
    .iter()
    .find(|(module, _)| content.contains(module))
    .map(|(_, label)| label.to_string());
    Ok(())
}

fn detect_jvm(manifest: &Path, stack: &mut TechStack) -> Result<(), StackError> {
    let content = read(manifest)?.to_lowercase();
    let name = file_name(manifest).unwrap_or_default();

    stack.language = Some(if name.ends_with(".kts") { "Kotlin" } else { "Java" }.to_string());
    stack.runtime = Some("JVM".to_string());
    let tool = if name == "pom.xml" { "maven" } else { "gradle" };
    stack.package_manager = Some(tool.to_string());
    stack.build_tool = Some(if tool == "maven" { "Maven" } else { "Gradle" }.to_string());
    if content.contains("junit") {
        stack.test_framework = Some("JUnit".to_string());
    }
    if content.contains("spring-boot") {
        stack.framework = Some("Spring Boot".to_string());
    }
    Ok(())
}
