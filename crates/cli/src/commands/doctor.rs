//! `burrow doctor` — Diagnose system health.

use burrow_config::AppConfig;
use burrow_core::store::ConversationStore;
use burrow_storage::SqliteStore;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Burrow Doctor — System Diagnostics");
    println!("=====================================\n");

    let mut issues = 0;

    println!("  ✅ Rust binary running");

    // Check config
    let config_path = AppConfig::config_dir().join("config.toml");
    let config = if config_path.exists() {
        match AppConfig::load() {
            Ok(config) => match config.validate() {
                Ok(()) => {
                    println!("  ✅ Config file valid");
                    Some(config)
                }
                Err(e) => {
                    println!("  ❌ Config invalid: {e}");
                    issues += 1;
                    None
                }
            },
            Err(e) => {
                println!("  ❌ Config file unreadable: {e}");
                issues += 1;
                None
            }
        }
    } else {
        println!("  ❌ No config file — run `burrow onboard`");
        issues += 1;
        None
    };

    if let Some(config) = &config {
        // Check gateway credentials
        if config.has_bot_token() {
            println!("  ✅ Discord bot token configured");
        } else {
            println!("  ⚠️  No bot token — set DISCORD_BOT_TOKEN or discord.bot_token");
            issues += 1;
        }
        if config.discord.bot_user_id.is_empty() {
            println!("  ⚠️  No discord.bot_user_id — mentions will not be detected");
            issues += 1;
        } else {
            println!("  ✅ Bot user id configured");
        }

        // Check model
        if burrow_inference::is_supported_model(&config.model.model) {
            println!("  ✅ Model '{}' is loadable", config.model.model);
        } else {
            println!(
                "  ❌ Unknown model '{}' — use a preset alias or a .gguf path",
                config.model.model
            );
            issues += 1;
        }

        // Check storage
        let db_path = config.db_path();
        match SqliteStore::new(&db_path.to_string_lossy()).await {
            Ok(store) => match store.health_check().await {
                Ok(true) => {
                    println!("  ✅ Storage healthy at {}", db_path.display());
                    if let Ok(conversations) = store.list_conversations().await {
                        println!("     {} conversation(s) on record", conversations.len());
                    }
                }
                Ok(false) | Err(_) => {
                    println!("  ❌ Storage unhealthy at {}", db_path.display());
                    issues += 1;
                }
            },
            Err(e) => {
                println!("  ❌ Cannot open database {}: {e}", db_path.display());
                issues += 1;
            }
        }
    }

    // Summary
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
