use std::path::PathBuf;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub stream_host: String,
    pub stream_port: u16,
    pub backend_url: String,
    pub voice_memo_dir: PathBuf,
    pub username: String,
    pub password: String,
}

impl Config {
    /// Reads the client configuration from the environment (after `.env`).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let stream_host = lookup("M2_STREAM_HOST").unwrap_or_else(|| "127.0.0.1".into());
        let stream_port: u16 = lookup("M2_STREAM_PORT")
            .unwrap_or_else(|| "64433".into())
            .parse()
            .context("M2_STREAM_PORT is not a port number")?;
        let backend_url = lookup("M2_BACKEND_URL").unwrap_or_else(|| "http://localhost/m2".into());
        let voice_memo_dir = lookup("M2_VOICE_MEMO_DIR").unwrap_or_else(|| "./voice_memos".into());
        let username = lookup("M2_USERNAME").context("M2_USERNAME must be set")?;
        let password = lookup("M2_PASSWORD").context("M2_PASSWORD must be set")?;

        Ok(Self {
            stream_host,
            stream_port,
            backend_url,
            voice_memo_dir: PathBuf::from(voice_memo_dir),
            username,
            password,
        })
    }
}
