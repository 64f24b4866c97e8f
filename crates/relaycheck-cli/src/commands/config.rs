use std::path::Path;

use relaycheck_core::CheckConfig;

pub fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    anyhow::ensure!(
        force || !path.exists(),
        "{} already exists (use --force to overwrite)",
        path.display()
    );
    std::fs::write(path, CheckConfig::default().to_toml_string()?)?;
    println!("✓ Generated {}", path.display());
    Ok(())
}
