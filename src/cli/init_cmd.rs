use std::path::Path;

use tracing::info;

use super::CliError;
use crate::config::template_toml;

/// Recreates the home directory from scratch and writes a fresh config
/// template into it. Matches the original CLI's "remove then recreate"
/// semantics on re-init: this is destructive to an existing config, by
/// design, not an oversight — see DESIGN.md.
pub fn run(home: &Path) -> Result<(), CliError> {
    if home.exists() {
        std::fs::remove_dir_all(home).map_err(|e| CliError::Io(e.to_string()))?;
    }
    std::fs::create_dir_all(home).map_err(|e| CliError::Io(e.to_string()))?;

    let config_path = home.join("config.toml");
    std::fs::write(&config_path, template_toml()).map_err(|e| CliError::Io(e.to_string()))?;

    info!(home = %home.display(), "wrote config template");
    println!("initialized bridgecli home at {}", home.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_config_template() {
        let dir = std::env::temp_dir().join(format!("bridgecli-test-init-{}", std::process::id()));
        run(&dir).unwrap();
        let contents = std::fs::read_to_string(dir.join("config.toml")).unwrap();
        assert!(contents.contains("in-endpoint"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_init_recreates_existing_home() {
        let dir = std::env::temp_dir().join(format!("bridgecli-test-reinit-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stale-file"), b"leftover").unwrap();

        run(&dir).unwrap();

        assert!(!dir.join("stale-file").exists());
        assert!(dir.join("config.toml").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
