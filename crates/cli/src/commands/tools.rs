//! `crmpilot tools`: print the tool catalog.

use crmpilot_core::provider::ToolDefinition;

pub fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = crmpilot_tools::builtin_registry().definitions();
    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
    } else {
        print!("{}", render(&catalog));
    }
    Ok(())
}

/// One line per tool: name padded to the longest, then the description.
pub fn render(catalog: &[ToolDefinition]) -> String {
    let width = catalog.iter().map(|t| t.name.len()).max().unwrap_or(0);
    let mut out = format!("{} tools:\n", catalog.len());
    for tool in catalog {
        out.push_str(&format!("  {:width$}  {}\n", tool.name, tool.description));
    }
    out
}
