use crate::config::Config;
use crate::transcode::Transcoder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

async fn init_uploads_dir(uploads_dir: &Path) -> std::io::Result<()> {
    // idempotent, racing creations are fine
    tokio::fs::create_dir_all(uploads_dir).await
}

#[derive(Clone)]
pub struct AppState {
    pub transcoder: Arc<Transcoder>,
    pub transcode_permits: Arc<Semaphore>,

    uploads_dir: PathBuf,
    public_url: String,
}

impl AppState {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let uploads_dir = PathBuf::from(&config.uploads_dir);
        init_uploads_dir(&uploads_dir).await?;
        info!(
            permits = config.permits,
            uploads_dir = %uploads_dir.display(),
            "Uploads directory ready"
        );

        Ok(Self {
            transcoder: Arc::new(Transcoder::new(&config.ffmpeg_bin)),
            transcode_permits: Arc::new(Semaphore::new(config.permits)),
            uploads_dir,
            public_url: config.public_base_url(),
        })
    }

    pub fn uploads_dir(&self) -> &Path {
        self.uploads_dir.as_path()
    }

    /// Absolute URL a stored file is reachable at
    pub fn file_url(&self, filename: &str) -> String {
        format!("{}/uploads/{filename}", self.public_url)
    }
}
