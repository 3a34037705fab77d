use common::{FetchCause, FetchError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Downloads the yearly registration archive.
#[derive(Clone, Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    url_template: String,
    timeout: Option<Duration>,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, url_template: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
            timeout,
        }
    }

    pub fn source_url(&self, year: i32) -> String {
        self.url_template.replace("{year}", &year.to_string())
    }

    /// Streams the archive for `year` to `<dest_dir>/<year>.zip`.
    ///
    /// The body is written to a temporary file in `dest_dir` and renamed into
    /// place only once the whole body has arrived, so a failed, timed out or
    /// cancelled download leaves no archive behind.
    pub async fn fetch(
        &self,
        year: i32,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        let url = self.source_url(year);
        let dest = dest_dir.join(format!("{}.zip", year));
        info!(year, %url, "Fetching registration archive");

        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| FetchError::new(year, e))?;

        let download = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, self.download(&url, dest_dir))
                    .await
                    .unwrap_or(Err(FetchCause::Timeout(limit))),
                None => self.download(&url, dest_dir).await,
            }
        };

        let tmp = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchCause::Cancelled),
            result = download => result,
        }
        .map_err(|cause| FetchError::new(year, cause))?;

        tmp.persist(&dest)
            .map_err(|e| FetchError::new(year, e.error))?;

        info!(year, path = %dest.display(), "Fetched registration archive");
        Ok(dest)
    }

    async fn download(&self, url: &str, dest_dir: &Path) -> Result<NamedTempFile, FetchCause> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchCause::Status(status.as_u16()));
        }

        let tmp = NamedTempFile::new_in(dest_dir)?;
        let mut file = tokio::fs::File::from_std(tmp.reopen()?);
        let mut bytes = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        debug!(url, bytes, "Downloaded archive body");
        Ok(tmp)
    }
}
