//! Locations module

/// Locations for the user
pub mod user {
    use camino::Utf8PathBuf;

    pub fn config_dir() -> anyhow::Result<Utf8PathBuf> {
        let dir =
            dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Can't get config directory"))?;
        let dir = Utf8PathBuf::try_from(dir)?;
        Ok(dir.join("drivemirror"))
    }

    pub fn cache_dir() -> anyhow::Result<Utf8PathBuf> {
        let dir = dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("Can't get cache directory"))?;
        let dir = Utf8PathBuf::try_from(dir)?;
        Ok(dir.join("drivemirror"))
    }

    pub fn current_dir() -> anyhow::Result<Utf8PathBuf> {
        Ok(Utf8PathBuf::try_from(std::env::current_dir()?)?)
    }
}

pub fn config_file() -> anyhow::Result<camino::Utf8PathBuf> {
    Ok(user::config_dir()?.join("config.json"))
}

pub fn token_cache_file() -> anyhow::Result<camino::Utf8PathBuf> {
    Ok(user::cache_dir()?.join("token_cache.json"))
}
