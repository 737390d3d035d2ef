//! Shared link normalization.

use url::Url;

/// Host that serves raw file contents for Dropbox shared links.
pub const PUBLIC_CONTENT_HOST: &str = "dl.dropboxusercontent.com";

/// Query parameter Dropbox uses to choose between preview page and download.
pub const REDIRECT_PARAM: &str = "dl";

/// Turn a Dropbox shared link into a stable direct-content URL.
///
/// The host is rewritten to [`PUBLIC_CONTENT_HOST`] and the `dl` parameter is
/// dropped. Other parameters (such as `rlkey` on newer links) are required
/// for access and are kept.
///
/// ```
/// use dropkeep_core::storage::normalize_shared_link;
///
/// let url = normalize_shared_link("https://www.dropbox.com/s/abc123?dl=0").unwrap();
/// assert_eq!(url.as_str(), "https://dl.dropboxusercontent.com/s/abc123");
/// ```
pub fn normalize_shared_link(raw: &str) -> Option<Url> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }

    url.set_scheme("https").ok()?;
    url.set_host(Some(PUBLIC_CONTENT_HOST)).ok()?;
    url.set_port(None).ok()?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != REDIRECT_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept.iter());
    }

    Some(url)
}
