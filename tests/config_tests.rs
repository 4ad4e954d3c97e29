//! Configuration loading tests: TOML file layering and environment
//! overrides feeding the optimizer and cost model.

use anyhow::Result;
use quarry::{CostConstants, Planner, PlannerConfig};
use std::fs;
use tempfile::TempDir;

fn write_config(contents: &str) -> Result<(TempDir, std::path::PathBuf)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("quarry.toml");
    fs::write(&path, contents)?;
    Ok((dir, path))
}

#[test]
fn file_overrides_defaults() -> Result<()> {
    let (_dir, path) = write_config(
        r#"
[optimizer]
max_number_of_plans = 9
rules = ["-interchange-adjacent-enumerations"]

[cost]
default_list_length = 42
"#,
    )?;
    let config = PlannerConfig::load_from(&path)?;
    assert_eq!(config.optimizer.max_number_of_plans, 9);
    assert_eq!(
        config.optimizer.rules,
        vec!["-interchange-adjacent-enumerations".to_string()]
    );
    assert_eq!(config.cost.default_list_length, 42);
    // Untouched sections keep their defaults
    assert_eq!(
        config.cost.equality_reduction,
        CostConstants::default().equality_reduction
    );
    Ok(())
}

#[test]
fn missing_file_yields_defaults() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = PlannerConfig::load_from(dir.path().join("absent.toml"))?;
    assert_eq!(config, PlannerConfig::default());
    Ok(())
}

#[test]
fn config_template_round_trips() -> Result<()> {
    let rendered = PlannerConfig::default().to_toml()?;
    let (_dir, path) = write_config(&rendered)?;
    let reloaded = PlannerConfig::load_from(&path)?;
    assert_eq!(reloaded, PlannerConfig::default());
    Ok(())
}

#[test]
fn planner_accepts_loaded_config() -> Result<()> {
    let (_dir, path) = write_config("[optimizer]\nmax_number_of_plans = 1\n")?;
    let config = PlannerConfig::load_from(&path)?;
    let planner = Planner::new(config);
    assert_eq!(planner.config().optimizer.max_number_of_plans, 1);
    Ok(())
}
