use std::path::Path;

use anistash_media::{available_space, check_aria2c, check_ffmpeg};
use anistash_storage::AccountConfig;
use anistash_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_disk(&config)?;

    let ffmpeg = check_ffmpeg()?;
    let aria2c = check_aria2c()?;
    println!("worker-selfcheck: ffmpeg={} aria2c={}", ffmpeg.display(), aria2c.display());

    ensure_env_present(&["SUPABASE_URL", "SUPABASE_SERVICE_ROLE_KEY"])?;

    let accounts = AccountConfig::all_from_env();
    if accounts.is_empty() {
        return Err(anyhow::anyhow!("no storage accounts configured"));
    }
    println!("worker-selfcheck: {} storage accounts", accounts.len());

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

fn ensure_disk(config: &WorkerConfig) -> anyhow::Result<()> {
    let available = available_space(&config.work_dir)?;
    if available < config.min_free_disk_bytes {
        return Err(anyhow::anyhow!(
            "only {} MB free in {}, need {} MB",
            available / (1024 * 1024),
            config.work_dir.display(),
            config.min_free_disk_bytes / (1024 * 1024)
        ));
    }
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true) {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
