//! GitHub Actions workflow generation from a detected [`TechStack`].
//!
//! The workflow always has three jobs in order: `test`, `build` (needs
//! test, uploads `dist/`) and `deploy` (needs build, main branch only).
//! Toolchain steps depend on the stack's language and package manager;
//! unknown stacks fall back to the Node.js toolchain.

use serde::Serialize;
use serde_yaml::Mapping;

use super::TechStack;

pub const WORKFLOW_PATH: &str = ".github/workflows/ci.yml";

/// Rendered workflow plus the path it belongs at inside a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedPipeline {
    pub filename: String,
    pub yaml: String,
}

#[derive(Debug, Serialize)]
struct Workflow {
    name: String,
    on: Triggers,
    jobs: Mapping,
}

#[derive(Debug, Serialize)]
struct Triggers {
    push: BranchFilter,
    pull_request: BranchFilter,
}

#[derive(Debug, Serialize)]
struct BranchFilter {
    branches: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Job {
    #[serde(rename = "runs-on")]
    runs_on: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    needs: Option<String>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    condition: Option<String>,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize)]
struct Step {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uses: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    with: Option<Mapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run: Option<String>,
}

impl Step {
    fn uses(action: &str) -> Self {
        Self {
            name: None,
            uses: Some(action.to_string()),
            with: None,
            run: None,
        }
    }

    fn setup(name: &str, action: &str, with: &[(&str, &str)]) -> Self {
        let mut mapping = Mapping::new();
        for (key, value) in with {
            mapping.insert((*key).into(), (*value).into());
        }
        Self {
            name: Some(name.to_string()),
            uses: Some(action.to_string()),
            with: Some(mapping),
            run: None,
        }
    }

    fn run(name: &str, command: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            uses: None,
            with: None,
            run: Some(command.to_string()),
        }
    }
}

/// Language-specific pieces of the test and build jobs.
struct Toolchain {
    setup: Step,
    install: Step,
    test: Vec<Step>,
    build: Step,
}

fn toolchain(stack: &TechStack) -> Toolchain {
    let language = stack.language.as_deref().unwrap_or_default();
    let package_manager = stack.package_manager.as_deref().unwrap_or_default();

    match language {
        "Rust" => Toolchain {
            setup: Step::uses("dtolnay/rust-toolchain@stable"),
            install: Step::run("Fetch dependencies", "cargo fetch"),
            test: vec![
                Step::run("Run tests", "cargo test"),
                Step::run("Run linting", "cargo clippy -- -D warnings"),
            ],
            build: Step::run("Build", "cargo build --release"),
        },
        "Python" => {
            let (install, test) = if package_manager == "poetry" {
                ("poetry install", "poetry run pytest")
            } else {
                ("pip install -r requirements.txt", "python -m pytest")
            };
            Toolchain {
                setup: Step::setup(
                    "Setup Python",
                    "actions/setup-python@v5",
                    &[("python-version", "3.12"), ("cache", "pip")],
                ),
                install: Step::run("Install dependencies", install),
                test: vec![Step::run("Run tests", test)],
                build: Step::run("Build", "python -m build"),
            }
        }
        "Go" => Toolchain {
            setup: Step::setup("Setup Go", "actions/setup-go@v5", &[("go-version", "stable")]),
            install: Step::run("Download modules", "go mod download"),
            test: vec![
                Step::run("Run tests", "go test ./..."),
                Step::run("Run linting", "go vet ./..."),
            ],
            build: Step::run("Build", "go build -o dist/ ./..."),
        },
        "Java" | "Kotlin" => {
            let (cache, install, test, build) = if package_manager == "gradle" {
                ("gradle", "./gradlew dependencies", "./gradlew test", "./gradlew build")
            } else {
                ("maven", "mvn -B dependency:resolve", "mvn -B test", "mvn -B package")
            };
            Toolchain {
                setup: Step::setup(
                    "Setup Java",
                    "actions/setup-java@v4",
                    &[("distribution", "temurin"), ("java-version", "21"), ("cache", cache)],
                ),
                install: Step::run("Install dependencies", install),
                test: vec![Step::run("Run tests", test)],
                build: Step::run("Build", build),
            }
        }
        _ => {
            let pm = match package_manager {
                "yarn" | "pnpm" | "bun" => package_manager,
                _ => "npm",
            };
            let install = match pm {
                "yarn" => "yarn install --frozen-lockfile",
                "pnpm" => "pnpm install --frozen-lockfile",
                "bun" => "bun install --frozen-lockfile",
                _ => "npm ci",
            };
            let script = |name: &str| {
                if pm == "npm" {
                    format!("npm run {}", name)
                } else {
                    format!("{} {}", pm, name)
                }
            };
            Toolchain {
                setup: Step::setup(
                    "Setup Node.js",
                    "actions/setup-node@v4",
                    &[("node-version", "18"), ("cache", pm)],
                ),
                install: Step::run("Install dependencies", install),
                test: vec![
                    Step::run("Run tests", &format!("{} test", pm)),
                    Step::run("Run linting", &script("lint")),
                ],
                build: Step::run("Build application", &script("build")),
            }
        }
    }
}

/// Render the CI workflow for `stack`.
pub fn generate(stack: &TechStack) -> Result<GeneratedPipeline, serde_yaml::Error> {
    let tools = toolchain(stack);
    let checkout = Step::uses("actions/checkout@v4");

    let mut test_steps = vec![checkout.clone(), tools.setup.clone(), tools.install.clone()];
    test_steps.extend(tools.test);

    let mut artifact = Mapping::new();
    artifact.insert("name".into(), "build-files".into());
    artifact.insert("path".into(), "dist/".into());
    let build_steps = vec![
        checkout.clone(),
        tools.setup,
        tools.install,
        tools.build,
        Step {
            name: Some("Upload build artifacts".to_string()),
            uses: Some("actions/upload-artifact@v4".to_string()),
            with: Some(artifact),
            run: None,
        },
    ];

    let deploy_steps = vec![
        checkout,
        Step::run("Deploy to production", &deploy_command(stack)),
    ];

    let mut jobs = Mapping::new();
    jobs.insert("test".into(), job(None, None, test_steps)?);
    jobs.insert("build".into(), job(Some("test"), None, build_steps)?);
    jobs.insert(
        "deploy".into(),
        job(
            Some("build"),
            Some("github.ref == 'refs/heads/main'"),
            deploy_steps,
        )?,
    );

    let workflow = Workflow {
        name: "CI/CD Pipeline".to_string(),
        on: Triggers {
            push: BranchFilter {
                branches: vec!["main".to_string(), "develop".to_string()],
            },
            pull_request: BranchFilter {
                branches: vec!["main".to_string()],
            },
        },
        jobs,
    };

    let body = serde_yaml::to_string(&workflow)?;
    Ok(GeneratedPipeline {
        filename: WORKFLOW_PATH.to_string(),
        yaml: format!(
            "# Generated CI/CD Pipeline for {} project\n{}",
            header_name(stack.display_name()),
            body
        ),
    })
}

/// The header is a YAML comment; a line break in the name would end it.
fn header_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

fn job(
    needs: Option<&str>,
    condition: Option<&str>,
    steps: Vec<Step>,
) -> Result<serde_yaml::Value, serde_yaml::Error> {
    serde_yaml::to_value(Job {
        runs_on: "ubuntu-latest".to_string(),
        needs: needs.map(str::to_string),
        condition: condition.map(str::to_string),
        steps,
    })
}

fn deploy_command(stack: &TechStack) -> String {
    match stack.deployment_target.as_deref() {
        Some("Vercel") => "npx vercel deploy --prod".to_string(),
        Some("Netlify") => "npx netlify deploy --prod".to_string(),
        Some("Fly.io") => "flyctl deploy --remote-only".to_string(),
        Some("Docker") => "docker build -t ${{ github.repository }} .".to_string(),
        _ => "echo \"Deploying to production...\"".to_string(),
    }
}
