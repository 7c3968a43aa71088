use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{signing::SignatureAlgorithm, BlobError, BlobResult};

/// Credentials and options for the Cloudinary service
#[derive(Clone, Serialize, Deserialize)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub options: CloudinaryOptions,
}

/// Backend-specific extras; every field has a default
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudinaryOptions {
    /// Scheme and host of the REST API
    pub api_base_url: String,
    /// Resource type used for uploads, lookups and deletes
    pub resource_type: String,
    /// Delivery type (`upload`, `private`, `authenticated`)
    pub delivery_type: String,
    pub signature_algorithm: SignatureAlgorithm,
    /// Seconds a direct upload signature is accepted by the backend
    pub direct_upload_window_secs: u64,
    pub timeout_secs: u64,
    /// Page size when listing resources by prefix
    pub max_results: u32,
}

impl Default for CloudinaryOptions {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.cloudinary.com".to_string(),
            resource_type: "image".to_string(),
            delivery_type: "upload".to_string(),
            signature_algorithm: SignatureAlgorithm::Sha1,
            direct_upload_window_secs: 3600, // the backend rejects older timestamps
            timeout_secs: 60,
            max_results: 500,
        }
    }
}

impl CloudinaryConfig {
    pub fn new<C, K, S>(cloud_name: C, api_key: K, api_secret: S) -> Self
    where
        C: Into<String>,
        K: Into<String>,
        S: Into<String>,
    {
        Self {
            cloud_name: cloud_name.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            options: CloudinaryOptions::default(),
        }
    }

    /// Parse `cloudinary://<api_key>:<api_secret>@<cloud_name>`.
    ///
    /// An `upload_prefix` query parameter overrides the API base URL.
    pub fn from_url(raw: &str) -> BlobResult<Self> {
        let url = Url::parse(raw).map_err(|e| BlobError::config(format!("invalid cloudinary url: {}", e)))?;
        if url.scheme() != "cloudinary" {
            return Err(BlobError::config(format!(
                "expected cloudinary:// url, got {}://",
                url.scheme()
            )));
        }

        let cloud_name = url
            .host_str()
            .ok_or_else(|| BlobError::config("cloudinary url has no cloud name"))?;
        let api_secret = url
            .password()
            .ok_or_else(|| BlobError::config("cloudinary url has no api secret"))?;

        let mut config = Self::new(cloud_name, decode(url.username())?, decode(api_secret)?);
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "upload_prefix" => config.options.api_base_url = value.into_owned(),
                "signature_algorithm" => {
                    config.options.signature_algorithm = match value.as_ref() {
                        "sha256" => SignatureAlgorithm::Sha256,
                        "sha1" => SignatureAlgorithm::Sha1,
                        other => {
                            return Err(BlobError::config(format!(
                                "unknown signature_algorithm {}",
                                other
                            )))
                        }
                    }
                }
                _ => {}
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from `CLOUDINARY_URL`, or from `CLOUDINARY_CLOUD_NAME`,
    /// `CLOUDINARY_API_KEY` and `CLOUDINARY_API_SECRET`.
    pub fn from_env() -> BlobResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> BlobResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CLOUDINARY_URL").filter(|v| !v.is_empty()) {
            return Self::from_url(&url);
        }

        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| BlobError::config(format!("{} is not set", name)))
        };
        let config = Self::new(
            required("CLOUDINARY_CLOUD_NAME")?,
            required("CLOUDINARY_API_KEY")?,
            required("CLOUDINARY_API_SECRET")?,
        );
        config.validate()?;
        Ok(config)
    }

    pub fn with_options(mut self, options: CloudinaryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_api_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.options.api_base_url = url.into();
        self
    }

    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.options.signature_algorithm = algorithm;
        self
    }

    pub fn validate(&self) -> BlobResult<()> {
        if self.cloud_name.is_empty() {
            return Err(BlobError::config("cloud_name is required"));
        }
        if self.api_key.is_empty() {
            return Err(BlobError::config("api_key is required"));
        }
        if self.api_secret.is_empty() {
            return Err(BlobError::config("api_secret is required"));
        }
        if self.options.max_results == 0 {
            return Err(BlobError::config("max_results must be greater than zero"));
        }
        Url::parse(&self.options.api_base_url).map_err(|e| {
            BlobError::config(format!(
                "invalid api_base_url {}: {}",
                self.options.api_base_url, e
            ))
        })?;
        Ok(())
    }

    /// `<api_base_url>/v1_1/<cloud_name>`
    pub(crate) fn api_root(&self) -> String {
        format!(
            "{}/v1_1/{}",
            self.options.api_base_url.trim_end_matches('/'),
            self.cloud_name
        )
    }
}

/// Percent-decode a userinfo component; `+` stays literal
fn decode(component: &str) -> BlobResult<String> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|e| BlobError::config(format!("cloudinary url credentials are not utf-8: {}", e)))
}

impl std::fmt::Debug for CloudinaryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryConfig")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[redacted]")
            .field("options", &self.options)
            .finish()
    }
}
