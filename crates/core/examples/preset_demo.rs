//! Example demonstrating configuration and EQ preset management
//!
//! Run with: cargo run --package tiltlab-core --example preset_demo

use tiltlab_core::domain::config::{PresetManager, TiltlabConfig};
use tiltlab_core::domain::equalizer::{Band, EqProfile};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("tiltlab_core=debug,info")
        .init();

    println!("=== Tiltlab Preset Demo ===\n");

    // 1. Factory default configuration
    println!("1. Creating factory default configuration...");
    let config = TiltlabConfig::factory_default();
    println!(
        "   ✓ {} tilt bands, carver centered at {} Hz",
        config.carver.tilt.num_bands, config.carver.center_frequency
    );

    // 2. Save and reload it
    println!("\n2. Saving configuration to file...");
    let config_path = "demo_config.toml";
    config.save_to_file(config_path).await?;
    let loaded = TiltlabConfig::load_from_file(config_path).await?;
    println!("   ✓ Round trip preserved the configuration: {}", loaded == config);

    // 3. Presets
    println!("\n3. Saving EQ presets...");
    let presets = PresetManager::new("demo_presets".into());
    let smile = EqProfile::new(
        vec![Band::new(80.0, 4.0, 0.7), Band::new(10000.0, 3.0, 0.7)],
        -2.0,
    );
    let vocal = EqProfile::new(vec![Band::new(2500.0, 3.0, 1.2)], 0.0);
    presets.save_preset("smile", &smile).await?;
    presets.save_preset("vocal", &vocal).await?;

    for name in presets.list_presets().await? {
        let profile = presets.load_preset(&name).await?;
        println!("   - {name}: {} bands, volume {} dB", profile.bands.len(), profile.volume_db);
    }

    // 4. Clean up
    println!("\n4. Cleaning up...");
    presets.delete_preset("smile").await?;
    presets.delete_preset("vocal").await?;
    tokio::fs::remove_dir("demo_presets").await?;
    tokio::fs::remove_file(config_path).await?;
    println!("   ✓ Done");

    Ok(())
}
