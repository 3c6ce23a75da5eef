//! Config command - show or initialize configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::PackResult;
use console::style;

/// Execute the config command
pub async fn execute(args: ConfigArgs, config: &Config, manager: &ConfigManager) -> PackResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> PackResult<()> {
    let mut shown = config.clone();
    for credential in shown.registry.auth.values_mut() {
        *credential = mask(credential);
    }
    println!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

/// Keep the user name of `user:password`, hide everything else
fn mask(credential: &str) -> String {
    match credential.split_once(':') {
        Some((user, _)) => format!("{}:****", user),
        None => "****".to_string(),
    }
}

async fn init_config(manager: &ConfigManager, force: bool) -> PackResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        eprintln!(
            "{} Config already exists at {}",
            style("!").yellow(),
            path.display()
        );
        eprintln!("  {}", style("Use --force to overwrite").dim());
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    println!(
        "{} Configuration initialized at {}",
        style("✓").green(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_hides_passwords() {
        assert_eq!(mask("user:secret"), "user:****");
        assert_eq!(mask("token"), "****");
    }
}
