//! `crmpilot config`: configuration management commands.

use crmpilot_config::AppConfig;

const REDACTED: &str = "********";

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render_redacted(config)?);
    Ok(())
}

/// TOML for `config` with the API key masked.
pub fn render_redacted(mut config: AppConfig) -> Result<String, toml::ser::Error> {
    if config.llm.api_key.is_some() {
        config.llm.api_key = Some(REDACTED.into());
    }
    toml::to_string_pretty(&config)
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

pub fn default() {
    println!("{}", AppConfig::default_toml());
}

pub fn validate() -> Result<(), Box<dyn std::error::Error>> {
    match AppConfig::load() {
        Ok(config) => {
            println!("Config OK");
            println!("   LLM:       {} ({})", config.llm.base_url, config.llm.default_model);
            println!("   Backend:   {}", config.backend.base_url);
            println!(
                "   Compact:   at {:.0}% of {} tokens",
                config.agent.auto_compact_threshold * 100.0,
                config.agent.max_context_tokens
            );
            println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
            if config.llm.api_key.is_none() {
                println!("   warning: no LLM API key set (LLM_API_KEY)");
            }
            if let Err(e) = crmpilot_gateway::check_bind(&config.gateway) {
                println!("   warning: {e}");
            }
            Ok(())
        }
        Err(e) => {
            println!("Config error: {e}");
            Err(e.into())
        }
    }
}
