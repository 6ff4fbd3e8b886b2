use std::future::Future;

use crate::{
    download::{DownloadReport, DownloadRequest},
    error::{DownloadError, SessionError},
};

/// Authenticated access to the portal.
///
/// The poller and the reservation workers only ever talk to the portal
/// through this trait, so they can be driven by canned HTML in tests.
/// Implementations must be safe to share between tasks issuing independent
/// requests.
pub trait Portal: Send + Sync + 'static {
    /// Root page of the portal for the current session.
    fn home_url(&self) -> Result<String, SessionError>;

    /// Turns a link or form action found in a page into an absolute URL.
    fn resolve(&self, link: &str) -> String;

    fn get(&self, url: &str) -> impl Future<Output = anyhow::Result<String>> + Send;

    fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> impl Future<Output = anyhow::Result<String>> + Send;

    fn download(
        &self,
        request: &DownloadRequest,
    ) -> impl Future<Output = Result<DownloadReport, DownloadError>> + Send;
}
