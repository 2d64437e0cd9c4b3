//! `chatloop config`: Configuration management commands.

use chatloop_config::{AppConfig, GroupMode};

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            // Settings that load fine but probably do not do what was meant
            let mut warnings = Vec::new();

            if config.chat.focus_value == 0.0 {
                warnings.push("chat.focus_value is 0: loops never engage on message volume");
            }

            if config.chat.talk_frequency <= 0.0 {
                warnings.push("chat.talk_frequency <= 0: idle loops never reply");
            }

            if config.energy.engage_threshold <= config.energy.disengage_threshold {
                warnings.push("energy.engage_threshold should be above energy.disengage_threshold");
            }

            if config.proactive.enabled && !config.proactive.in_group && !config.proactive.in_private {
                warnings.push("proactive.enabled is set but both in_group and in_private are off");
            }

            if config.proactive.enabled && config.proactive.interval_secs < 0 {
                warnings.push("proactive.interval_secs is negative; its absolute value is used");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            let group_mode = match config.chat.group_mode {
                GroupMode::Auto => "auto",
                GroupMode::Engaged => "engaged",
                GroupMode::Idle => "idle",
            };

            println!();
            println!("   Focus value:      {}", config.chat.focus_value);
            println!("   Group mode:       {group_mode}");
            println!("   Private focus:    {}", config.chat.force_focus_private);
            println!("   Thinking timeout: {}s", config.chat.thinking_timeout_secs);
            println!(
                "   Proactive:        {} (scope {}, every ~{}s ± {}s)",
                if config.proactive.enabled { "enabled" } else { "disabled" },
                config.proactive.scope,
                config.proactive.interval_secs,
                config.proactive.delta_sigma
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}
