// Resolves a gate's stored file reference into the URL a redeemed
// download redirects to.

use crate::config::Config;

/// File URL resolver. Relative keys are joined onto the configured base;
/// absolute URLs pass through untouched so a gate can point at an
/// externally hosted file.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_url: String,
}

impl FileStore {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.file_base_url.trim_end_matches('/').to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn download_url(&self, file_key: &str) -> String {
        if file_key.starts_with("http://") || file_key.starts_with("https://") {
            return file_key.to_string();
        }
        format!("{}/{}", self.base_url, file_key.trim_start_matches('/'))
    }
}
