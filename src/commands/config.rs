//! Config command handler.
//!
//! Displays, locates and resets the taskwarden config file.

use std::path::Path;

use super::config_path;
use crate::config::{display_config, load_config_at, write_default_config, Config};
use crate::error::{Result, TaskwardenError};
use crate::output::{BOLD, GRAY, GREEN, RESET, YELLOW};

/// Display the effective configuration as TOML.
///
/// A missing file is reported and the defaults are shown; nothing is
/// created.
pub fn config_show_command(explicit: Option<&Path>) -> Result<()> {
    let path = config_path(explicit)?;
    println!("{BOLD}# taskwarden config{RESET}");
    println!("{GRAY}# {}{RESET}", path.display());
    println!();

    let config = if path.exists() {
        load_config_at(&path)?
    } else {
        println!("{YELLOW}# (file does not exist, using defaults){RESET}");
        println!();
        Config::default()
    };
    print!("{}", display_config(&config)?);
    Ok(())
}

/// Print the config file path.
pub fn config_path_command(explicit: Option<&Path>) -> Result<()> {
    println!("{}", config_path(explicit)?.display());
    Ok(())
}

/// Write the commented default config.
///
/// # Returns
///
/// * `Ok(())` when the file was written
/// * `Err(TaskwardenError::Config)` if it already exists and `force` is not set
pub fn config_init_command(explicit: Option<&Path>, force: bool) -> Result<()> {
    let path = config_path(explicit)?;
    if path.exists() && !force {
        return Err(TaskwardenError::Config(format!(
            "{} already exists. Use --force to overwrite it with the defaults",
            path.display()
        )));
    }
    write_default_config(&path)?;
    println!("{GREEN}Wrote default config to{RESET} {}", path.display());
    Ok(())
}
