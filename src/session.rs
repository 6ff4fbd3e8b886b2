use std::{sync::Arc, time::Duration};

use log::{debug, info, warn};
use reqwest::{Client, ClientBuilder, Url, cookie::Jar, header::{CONTENT_DISPOSITION, CONTENT_TYPE}};

use crate::{
    config::PortalConfig,
    cookies::{StoredCookie, find_session_token, load_cookie_file},
    download::{
        DownloadReport, DownloadRequest, filename_from_content_disposition, resolve_destination, with_guessed_extension,
        write_stream,
    },
    error::{DownloadError, SessionError},
    portal::Portal,
    ratelimit::RateLimiter,
};

// Path marker in front of every repository resource.
const REPOSITORY_LINK: &str = "skini/repoz";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP client seeded with the cookies of the last login.
pub struct Session {
    client: Client,
    base_url: Url,
    token: Option<String>,
    rate_limiter: RateLimiter,
}

impl Session {
    /// Rebuilds the session from the cookie file named in `config`.
    ///
    /// An absent, empty or unreadable cookie file is not an error: the
    /// session simply has no token and [`Session::is_authenticated`] is false.
    pub fn load(config: &PortalConfig) -> anyhow::Result<Self> {
        let cookies = match load_cookie_file(&config.cookie_file) {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!("ignoring cookie file: {e:#}");
                vec![]
            }
        };
        Self::from_cookies(config, &cookies)
    }

    pub fn from_cookies(config: &PortalConfig, cookies: &[StoredCookie]) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)?;

        let jar = Arc::new(Jar::default());
        for cookie in cookies {
            match Url::parse(&cookie.origin()) {
                Ok(url) => jar.add_cookie_str(&cookie.to_set_cookie(), &url),
                Err(e) => warn!("skipping cookie {} with bad domain {}: {e}", cookie.name, cookie.domain),
            }
        }

        let token = find_session_token(cookies);
        if token.is_some() {
            info!("session restored from {} cookies", cookies.len());
        } else {
            info!("no session cookie found, not logged in");
        }

        let client = ClientBuilder::new()
            .cookie_provider(jar)
            .timeout(config.request_timeout())
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client,
            base_url,
            token,
            rate_limiter: RateLimiter::new(config.requests_per_second()),
        })
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn require_token(&self) -> Result<&str, SessionError> {
        self.token.as_deref().ok_or(SessionError::NotAuthenticated)
    }

    fn index_url(&self) -> String {
        format!("{}index.php", self.base_url)
    }

    pub fn download_url(&self, resource_path: &str) -> Result<String, SessionError> {
        let token = self.require_token()?;
        Ok(format!(
            "{}?TVZ={token}&link={REPOSITORY_LINK}{resource_path}",
            self.index_url()
        ))
    }
}

impl Portal for Session {
    fn home_url(&self) -> Result<String, SessionError> {
        let token = self.require_token()?;
        Ok(format!("{}?state={token}", self.index_url()))
    }

    fn resolve(&self, link: &str) -> String {
        self.base_url
            .join(link)
            .map(String::from)
            .unwrap_or_else(|_| link.to_string())
    }

    async fn get(&self, url: &str) -> anyhow::Result<String> {
        // Wait (non-blocking) until we're allowed to make a request according
        // to our self-imposed rate-limiting policy.
        self.rate_limiter.wait_until_ready().await;

        debug!("GET {url}");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.text().await?;
        Ok(body)
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> anyhow::Result<String> {
        self.rate_limiter.wait_until_ready().await;

        debug!("POST {url} ({} fields)", form.len());
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(body)
    }

    async fn download(&self, request: &DownloadRequest) -> Result<DownloadReport, DownloadError> {
        let url = self.download_url(&request.resource_path)?;
        self.rate_limiter.wait_until_ready().await;

        let response = self
            .client
            .get(&url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;

        let served_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(filename_from_content_disposition);
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        let suggested_name = with_guessed_extension(&request.suggested_name, content_type);
        let expected = response.content_length();
        let path = resolve_destination(&request.destination, &suggested_name, served_name.as_deref());

        info!("downloading {} to {}", request.suggested_name, path.display());
        let bytes = write_stream(Box::pin(response.bytes_stream()), &path, expected).await?;
        Ok(DownloadReport { path, bytes })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}
