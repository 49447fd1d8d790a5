//! `burrow onboard` — First-time setup.

use burrow_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("🐰 Burrow — First-Time Setup");
    println!("============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Set DISCORD_BOT_TOKEN (or discord.bot_token in config.toml)");
        println!("   2. Set discord.bot_user_id to your bot's user id");
        println!("   3. Run: burrow run\n");
    }

    println!("🎉 Setup complete! Run `burrow run` to bring the agent online.\n");

    Ok(())
}
