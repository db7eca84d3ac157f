//! `crmpilot serve`: start the HTTP gateway.

use crmpilot_config::AppConfig;

pub async fn run(port: Option<u16>, host: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port {
        config.gateway.port = port;
    }
    if let Some(host) = host {
        config.gateway.host = host;
    }

    println!("crmpilot gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.llm.default_model);
    println!("   Backend:   {}", config.backend.base_url);

    crmpilot_gateway::start(config).await
}
