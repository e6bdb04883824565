use std::sync::Arc;

use preforkd::config::{display_config, AppConfig, FromYaml};
use preforkd::error::ServerError;
use preforkd::handler::StaticCgiHandler;
use preforkd::signals;
use preforkd::supervisor::Supervisor;

use proxy_log::errors;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let document_root = std::env::args().nth(2).unwrap_or_else(|| "./www".to_string());

    let cfg = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            errors!("{e}");
            return 1;
        }
    };

    display_config(&cfg);

    if let Err(e) = signals::install() {
        errors!("failed to install signal handlers: {e}");
        return 1;
    }

    let handler = Arc::new(StaticCgiHandler::new(document_root));
    let supervisor = match Supervisor::bind(Arc::new(cfg), handler) {
        Ok(s) => s,
        Err(e) => {
            errors!("failed to start supervisor: {e}");
            return 1;
        }
    };

    supervisor.run()
}

fn load_config(path: &str) -> Result<AppConfig, ServerError> {
    let content = std::fs::read_to_string(path)?;
    Ok(AppConfig::from_str(&content)?)
}
