use async_trait::async_trait;

use crate::error::ApiError;

const FALLBACK_SLUG: &str = "listing";

/// Read-only lookup used while allocating slugs.
#[async_trait]
pub trait SlugLookup {
    async fn slug_taken(&self, slug: &str, exclude_id: Option<i32>) -> Result<bool, sqlx::Error>;
}

/// Lowercases `title` and folds it into `[a-z0-9-]`, collapsing separators into single hyphens.
pub fn normalize(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_hyphen = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_hyphen = true;
        }
    }

    if slug.is_empty() {
        FALLBACK_SLUG.to_string()
    } else {
        slug
    }
}

/// Resolves the slug for a record.
///
/// An explicit slug is used verbatim and fails with [`ApiError::SlugConflict`] when another
/// record owns it. Otherwise the normalized title is tried, then `-1`, `-2`, ... until free.
/// Nothing is reserved: the unique constraint decides races at insert time.
pub async fn allocate<L>(
    lookup: &L,
    title: &str,
    explicit: Option<&str>,
    exclude_id: Option<i32>,
) -> Result<String, ApiError>
where
    L: SlugLookup + Sync + ?Sized,
{
    if let Some(slug) = explicit {
        if lookup.slug_taken(slug, exclude_id).await? {
            return Err(ApiError::SlugConflict(slug.to_string()));
        }
        return Ok(slug.to_string());
    }

    let base = normalize(title);
    let mut candidate = base.clone();
    let mut suffix: u64 = 0;
    while lookup.slug_taken(&candidate, exclude_id).await? {
        suffix += 1;
        candidate = format!("{base}-{suffix}");
    }

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::validation::SLUG_RE;

    /// Slugs mapped to the id of the owning record.
    #[derive(Default)]
    struct MemoryLookup {
        taken: HashMap<String, i32>,
        lookups: Mutex<Vec<String>>,
    }

    impl MemoryLookup {
        fn with(slugs: &[(&str, i32)]) -> Self {
            Self {
                taken: slugs.iter().map(|(s, id)| (s.to_string(), *id)).collect(),
                lookups: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl SlugLookup for MemoryLookup {
        async fn slug_taken(&self, slug: &str, exclude_id: Option<i32>) -> Result<bool, sqlx::Error> {
            self.lookups.lock().unwrap().push(slug.to_string());
            Ok(self
                .taken
                .get(slug)
                .is_some_and(|owner| Some(*owner) != exclude_id))
        }
    }

    #[test]
    fn normalizes_titles() {
        assert_eq!(normalize("Dal Lake Houseboat"), "dal-lake-houseboat");
        assert_eq!(normalize("  Café -- Lounge__Bar!! "), "caf-lounge-bar");
        assert_eq!(normalize("Hotel #1 (Srinagar)"), "hotel-1-srinagar");
        assert_eq!(normalize("---"), "listing");
        assert_eq!(normalize("ñ"), "listing");
    }

    #[test]
    fn normalized_slugs_always_match_pattern() {
        for title in ["A", "  x  y  ", "Ünïcödé hütte", "__init__", "100% Pure"] {
            let slug = normalize(title);
            assert!(SLUG_RE.is_match(&slug), "{title:?} -> {slug:?}");
            assert!(!slug.starts_with('-') && !slug.ends_with('-'));
            assert!(!slug.contains("--"));
        }
    }

    #[actix_rt::test]
    async fn free_base_is_used_directly() {
        let lookup = MemoryLookup::default();
        let slug = allocate(&lookup, "Pine Hut", None, None).await.unwrap();
        assert_eq!(slug, "pine-hut");
    }

    #[actix_rt::test]
    async fn collisions_append_increasing_suffixes() {
        let lookup = MemoryLookup::with(&[("pine-hut", 1), ("pine-hut-1", 2), ("pine-hut-2", 3)]);
        let slug = allocate(&lookup, "Pine Hut", None, None).await.unwrap();

        assert_eq!(slug, "pine-hut-3");
        assert_eq!(
            *lookup.lookups.lock().unwrap(),
            ["pine-hut", "pine-hut-1", "pine-hut-2", "pine-hut-3"]
        );
    }

    #[actix_rt::test]
    async fn taken_explicit_slug_conflicts() {
        let lookup = MemoryLookup::with(&[("dal-lake", 7)]);
        let err = allocate(&lookup, "Anything", Some("dal-lake"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::SlugConflict(slug) if slug == "dal-lake"));
    }

    #[actix_rt::test]
    async fn excluded_owner_keeps_its_slug() {
        let lookup = MemoryLookup::with(&[("dal-lake", 7)]);

        let kept = allocate(&lookup, "Dal Lake", Some("dal-lake"), Some(7)).await.unwrap();
        assert_eq!(kept, "dal-lake");

        let regenerated = allocate(&lookup, "Dal Lake", None, Some(7)).await.unwrap();
        assert_eq!(regenerated, "dal-lake");
    }
}
