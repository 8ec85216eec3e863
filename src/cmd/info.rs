//! Tier inspection commands — `forge-codegen select` and `forge-codegen tiers`.

use console::style;
use forge_codegen::config::CodegenConfig;
use forge_codegen::models::Framework;
use forge_codegen::selector::select_model;

pub fn cmd_select(prompt: &str, framework: Option<Framework>) {
    let detected = framework.unwrap_or_else(|| Framework::detect(prompt));
    let tier = select_model(prompt, Some(detected));

    println!("{} {}", style("Tier:").bold(), style(tier).cyan());
    println!("{} {}", style("Framework:").bold(), detected);
    if framework.is_none() {
        println!("{}", style("  (framework detected from the prompt)").dim());
    }
}

pub fn cmd_tiers(config: &CodegenConfig) {
    let table = config.tier_table();
    println!();
    println!("{}", style("Model tiers").bold());
    println!();
    for (tier, spec) in table.iter() {
        println!(
            "  {:<14} {:<32} temperature {}",
            style(tier).cyan(),
            spec.model,
            spec.temperature
        );
    }
    println!();
}
