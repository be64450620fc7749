use std::fs::OpenOptions;
use std::path::PathBuf;

pub(crate) const DEFAULT_SQLITE_DSN: &str = "sqlite://taskgate.db";

/// Sqlite connects fail on a missing file; create it (and its parent
/// directory) up front. Other backends pass through untouched.
pub(crate) fn ensure_sqlite_dsn(dsn: &str) -> anyhow::Result<()> {
    if !dsn.starts_with("sqlite:") {
        return Ok(());
    }

    let mut rest = &dsn["sqlite:".len()..];
    if rest.starts_with("//") {
        rest = &rest[2..];
    }
    if rest.is_empty() || rest.starts_with(":memory:") || rest.starts_with("memory:") {
        return Ok(());
    }

    let path_part = rest.split('?').next().unwrap_or("");
    if path_part.is_empty() {
        return Ok(());
    }

    let path = PathBuf::from(path_part);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if !path.exists() {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
    }

    Ok(())
}
