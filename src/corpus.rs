use std::{collections::HashSet, path::Path};

use serde::{Deserialize, Deserializer};
use tracing::{debug, info};

use crate::{
    error::Result,
    identity::{PageIdentityMap, ProfileSource, resolve_profile},
    qualifier::is_meaningful,
};

/// Field delimiter used by the post exports.
pub const DEFAULT_DELIMITER: u8 = b';';

/// One row of the source corpus, as read from the export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "ccpost_id", default)]
    pub post_id: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(rename = "ccpageid", default)]
    pub page_id: String,
    #[serde(rename = "facebook_url", default)]
    pub source_url: String,
    #[serde(rename = "post_text", default)]
    pub text: String,
    #[serde(default)]
    pub date: String,
    #[serde(
        rename = "total_interactions",
        default,
        deserialize_with = "lenient_count"
    )]
    pub interaction_count: u64,
    #[serde(default)]
    pub post_url: String,
}

/// Parse an interaction count, treating anything that is not a
/// non-negative integer as zero.
fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.trim().parse().ok()).unwrap_or(0))
}

/// A record that passed text qualification and has a resolved author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanPost {
    pub id: String,
    pub profile: String,
    pub date: String,
    pub interaction_count: u64,
    pub post_url: String,
    pub source_url: String,
    pub text: String,
}

/// Counters collected while loading a corpus. Reported only; nothing
/// downstream branches on them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub total_records: usize,
    pub skipped_text: usize,
    pub skipped_identity: usize,
    pub recovered_pageid: usize,
    pub recovered_url: usize,
    pub unique_profiles: usize,
}

impl LoadStats {
    pub fn skipped(&self) -> usize {
        self.skipped_text + self.skipped_identity
    }
}

/// Read a delimited export with a header row.
///
/// Quoted fields may span lines and contain the delimiter. Columns that
/// are missing from the header default to empty strings and zero.
pub fn read_corpus(path: &Path, delimiter: u8) -> Result<Vec<RawRecord>> {
    let reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;
    read_records(reader)
}

/// Same as [`read_corpus`] but from any reader.
pub fn read_corpus_from<R: std::io::Read>(
    input: R,
    delimiter: u8,
) -> Result<Vec<RawRecord>> {
    let reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(input);
    read_records(reader)
}

fn read_records<R: std::io::Read>(
    mut reader: csv::Reader<R>,
) -> Result<Vec<RawRecord>> {
    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

/// Turn raw records into clean posts.
///
/// Records without meaningful text are dropped before any identity
/// recovery is attempted. Records whose author cannot be resolved are
/// dropped as well. Output order follows input order.
///
/// Rows without a post id get `row-<n>`, `n` being the 1-based data row.
/// If the export already uses that id for another post, a `~<k>` suffix is
/// appended until the id is free.
pub fn load(records: &[RawRecord]) -> (Vec<CleanPost>, LoadStats) {
    let page_map = PageIdentityMap::build(records);
    let mut stats = LoadStats {
        total_records: records.len(),
        ..Default::default()
    };
    let mut posts = Vec::with_capacity(records.len());
    let taken: HashSet<&str> = records
        .iter()
        .map(|r| r.post_id.trim())
        .filter(|id| !id.is_empty())
        .collect();
    let mut generated: HashSet<String> = HashSet::new();

    for (row, record) in records.iter().enumerate() {
        let text = record.text.trim();
        if text.is_empty() || !is_meaningful(text) {
            stats.skipped_text += 1;
            continue;
        }

        let Some((profile, source)) = resolve_profile(record, &page_map) else {
            debug!(row = row + 1, post_id = %record.post_id, "dropping post with unrecoverable profile");
            stats.skipped_identity += 1;
            continue;
        };
        match source {
            ProfileSource::Explicit => {}
            ProfileSource::PageId => stats.recovered_pageid += 1,
            ProfileSource::UrlSlug => stats.recovered_url += 1,
        }

        let id = if record.post_id.trim().is_empty() {
            synthetic_id(row + 1, &taken, &mut generated)
        } else {
            record.post_id.trim().to_string()
        };

        posts.push(CleanPost {
            id,
            profile,
            date: record.date.clone(),
            interaction_count: record.interaction_count,
            post_url: record.post_url.clone(),
            source_url: record.source_url.clone(),
            text: text.to_string(),
        });
    }

    stats.unique_profiles = posts
        .iter()
        .map(|p| p.profile.as_str())
        .collect::<HashSet<_>>()
        .len();

    info!(
        loaded = posts.len(),
        skipped = stats.skipped(),
        recovered_pageid = stats.recovered_pageid,
        recovered_url = stats.recovered_url,
        unique_profiles = stats.unique_profiles,
        "corpus loaded"
    );

    (posts, stats)
}

fn synthetic_id(
    row: usize,
    taken: &HashSet<&str>,
    generated: &mut HashSet<String>,
) -> String {
    let base = format!("row-{row}");
    let mut id = base.clone();
    let mut suffix = 1;
    while taken.contains(id.as_str()) || generated.contains(&id) {
        suffix += 1;
        id = format!("{base}~{suffix}");
    }
    generated.insert(id.clone());
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONG_TEXT: &str = "Vi skal investere i den grønne omstilling nu";

    fn raw(id: &str, profile: Option<&str>, page_id: &str, text: &str) -> RawRecord {
        RawRecord {
            post_id: id.to_string(),
            profile: profile.map(str::to_string),
            page_id: page_id.to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn reads_semicolon_export() {
        let data = "ccpost_id;profile;ccpageid;post_text;date;total_interactions;post_url;facebook_url\n\
                    1;Alice;p1;\"Hello; world\nsecond line\";2024-01-02;42;https://fb.com/posts/1;https://fb.com/alice\n\
                    2;;p1;Other text;2024-01-03;not-a-number;;\n";
        let records = read_corpus_from(data.as_bytes(), DEFAULT_DELIMITER).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].post_id, "1");
        assert_eq!(records[0].profile.as_deref(), Some("Alice"));
        assert_eq!(records[0].text, "Hello; world\nsecond line");
        assert_eq!(records[0].interaction_count, 42);
        assert_eq!(records[0].source_url, "https://fb.com/alice");
        assert_eq!(records[1].interaction_count, 0);
        assert!(records[1].profile.as_deref().unwrap_or("").is_empty());
    }

    #[test]
    fn missing_columns_default() {
        let data = "ccpost_id;post_text\n7;Some text here\n";
        let records = read_corpus_from(data.as_bytes(), DEFAULT_DELIMITER).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].post_id, "7");
        assert_eq!(records[0].profile, None);
        assert_eq!(records[0].interaction_count, 0);
        assert!(records[0].post_url.is_empty());
    }

    #[test]
    fn negative_and_blank_counts_become_zero() {
        let data = "ccpost_id;total_interactions\n1;-5\n2;\n3; 17 \n";
        let records = read_corpus_from(data.as_bytes(), DEFAULT_DELIMITER).unwrap();
        let counts: Vec<u64> = records.iter().map(|r| r.interaction_count).collect();
        assert_eq!(counts, vec![0, 0, 17]);
    }

    #[test]
    fn read_corpus_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("posts.csv");
        std::fs::write(&path, "ccpost_id,profile\n1,Alice\n").unwrap();

        let records = read_corpus(&path, b',').unwrap();
        assert_eq!(records[0].profile.as_deref(), Some("Alice"));
    }

    #[test]
    fn load_drops_short_text_before_identity() {
        let records = vec![
            raw("1", None, "", "🎉🎉🎉"),
            raw("2", None, "", LONG_TEXT),
        ];
        let (posts, stats) = load(&records);

        assert!(posts.is_empty());
        assert_eq!(stats.skipped_text, 1);
        assert_eq!(stats.skipped_identity, 1);
        assert_eq!(stats.skipped(), 2);
    }

    #[test]
    fn load_recovers_and_counts() {
        let mut by_url = raw("3", Some("None"), "p-unknown", LONG_TEXT);
        by_url.source_url = "https://www.facebook.com/slugname/".to_string();

        let records = vec![
            raw("1", None, "p1", LONG_TEXT),
            raw("2", Some("Alice"), "p1", LONG_TEXT),
            by_url,
        ];
        let (posts, stats) = load(&records);

        let profiles: Vec<&str> = posts.iter().map(|p| p.profile.as_str()).collect();
        assert_eq!(profiles, vec!["Alice", "Alice", "slugname"]);
        assert_eq!(stats.recovered_pageid, 1);
        assert_eq!(stats.recovered_url, 1);
        assert_eq!(stats.unique_profiles, 2);
        assert_eq!(stats.total_records, 3);
    }

    #[test]
    fn load_preserves_order_and_trims_text() {
        let records = vec![
            raw("b", Some("X"), "", &format!("  {LONG_TEXT}  ")),
            raw("a", Some("Y"), "", LONG_TEXT),
        ];
        let (posts, _) = load(&records);

        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(posts[0].text, LONG_TEXT);
    }

    #[test]
    fn empty_post_id_gets_row_id() {
        let records = vec![
            raw("1", Some("X"), "", LONG_TEXT),
            raw("", Some("X"), "", LONG_TEXT),
        ];
        let (posts, _) = load(&records);
        assert_eq!(posts[1].id, "row-2");
    }

    #[test]
    fn row_id_avoids_existing_post_ids() {
        let records = vec![
            raw("row-2", Some("X"), "", LONG_TEXT),
            raw("", Some("X"), "", LONG_TEXT),
            raw("row-2~2", Some("X"), "", LONG_TEXT),
        ];
        let (posts, _) = load(&records);

        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["row-2", "row-2~3", "row-2~2"]);
    }

    #[test]
    fn numeric_url_without_page_is_dropped() {
        let mut r = raw("1", None, "", LONG_TEXT);
        r.source_url = "https://www.facebook.com/123456".to_string();
        let (posts, stats) = load(&[r]);

        assert!(posts.is_empty());
        assert_eq!(stats.skipped_identity, 1);
    }
}
