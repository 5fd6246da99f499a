//! Repository commands: `pipedeck detect` and `pipedeck generate`.

use anyhow::{Context, Result};
use std::path::Path;

use pipedeck::stack::{self, TechStack, workflow};

pub fn cmd_detect(root: &Path, json: bool) -> Result<()> {
    let detected = stack::detect(root)
        .with_context(|| format!("Failed to detect tech stack in {}", root.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detected)?);
        return Ok(());
    }

    println!();
    println!("{}", console::style("Detected Tech Stack").bold().cyan());
    println!("{}", console::style(root.display()).dim());
    println!();

    if detected.is_empty() {
        println!("  {}", console::style("No known project markers found.").yellow());
        println!();
        return Ok(());
    }

    print_stack(&detected);

    println!();
    println!("{}", console::style("Recommended Pipeline Features").bold());
    for feature in detected.recommended_features() {
        println!("  {} {}", console::style("✓").green(), feature);
    }
    println!();
    Ok(())
}

fn print_stack(stack: &TechStack) {
    let rows = [
        ("Language", &stack.language),
        ("Framework", &stack.framework),
        ("Runtime", &stack.runtime),
        ("Package Manager", &stack.package_manager),
        ("Test Framework", &stack.test_framework),
        ("Build Tool", &stack.build_tool),
        ("Deployment", &stack.deployment_target),
    ];
    for (label, value) in rows {
        match value {
            Some(v) => println!("  {:<16} {}", label, console::style(v).bold()),
            None => println!("  {:<16} {}", label, console::style("-").dim()),
        }
    }
}

pub fn cmd_generate(root: &Path, output: Option<&Path>) -> Result<()> {
    let detected = stack::detect(root)
        .with_context(|| format!("Failed to detect tech stack in {}", root.display()))?;
    let pipeline = workflow::generate(&detected).context("Failed to render workflow")?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(path, &pipeline.yaml)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{} {} workflow written to {}",
                console::style("✓").green(),
                detected.display_name(),
                path.display()
            );
            println!(
                "  Commit it as {} to enable it in GitHub Actions.",
                console::style(&pipeline.filename).bold()
            );
        }
        None => print!("{}", pipeline.yaml),
    }
    Ok(())
}
