use std::collections::HashMap;

use crate::corpus::RawRecord;

/// Placeholder some exports write instead of leaving the profile blank.
pub const PROFILE_PLACEHOLDER: &str = "None";

/// How a record's author was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    /// The record carried a usable profile itself.
    Explicit,
    /// Borrowed from another record sharing the same page id.
    PageId,
    /// Taken from the last path segment of the source URL.
    UrlSlug,
}

/// Return the trimmed profile if it is present and not the placeholder.
pub fn usable_profile(profile: Option<&str>) -> Option<&str> {
    let profile = profile?.trim();
    (!profile.is_empty() && profile != PROFILE_PLACEHOLDER).then_some(profile)
}

/// Page id to profile mapping built from every record that names its
/// author, so recovery can draw on rows anywhere in the corpus.
#[derive(Debug, Default, Clone)]
pub struct PageIdentityMap {
    profiles: HashMap<String, String>,
}

impl PageIdentityMap {
    /// Scan all records once. Later records overwrite earlier ones for the
    /// same page id.
    pub fn build(records: &[RawRecord]) -> Self {
        let mut profiles = HashMap::new();
        for record in records {
            let page_id = record.page_id.trim();
            if page_id.is_empty() {
                continue;
            }
            if let Some(profile) = usable_profile(record.profile.as_deref()) {
                profiles.insert(page_id.to_string(), profile.to_string());
            }
        }
        Self { profiles }
    }

    pub fn get(&self, page_id: &str) -> Option<&str> {
        self.profiles.get(page_id.trim()).map(String::as_str)
    }
}

/// Extract an author slug from a profile URL.
///
/// Takes the last path segment after dropping any query string, fragment
/// and trailing slashes. Purely numeric segments are content ids, not
/// author names, and yield `None`.
///
/// ```
/// use postseek::identity::url_slug;
///
/// assert_eq!(url_slug("https://www.facebook.com/larsloekke/"), Some("larsloekke"));
/// assert_eq!(url_slug("https://www.facebook.com/100044313211/"), None);
/// ```
pub fn url_slug(url: &str) -> Option<&str> {
    let url = url.trim();
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let slug = path.trim_end_matches('/').rsplit('/').next()?;
    if slug.is_empty() || slug.chars().all(|c| c.is_numeric()) {
        return None;
    }
    Some(slug)
}

/// Resolve a record's author, falling back to the page id mapping and then
/// to the source URL slug. Returns `None` when the record is unrecoverable.
pub fn resolve_profile(
    record: &RawRecord,
    page_map: &PageIdentityMap,
) -> Option<(String, ProfileSource)> {
    if let Some(profile) = usable_profile(record.profile.as_deref()) {
        return Some((profile.to_string(), ProfileSource::Explicit));
    }

    if let Some(profile) = page_map.get(&record.page_id) {
        return Some((profile.to_string(), ProfileSource::PageId));
    }

    url_slug(&record.source_url)
        .map(|slug| (slug.to_string(), ProfileSource::UrlSlug))
}
