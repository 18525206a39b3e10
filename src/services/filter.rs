//! Decides which listed keys are never candidates for ingestion.

use regex::Regex;

/// Skip rules evaluated for every listed key before the checkpoint check.
#[derive(Debug, Clone, Default)]
pub struct ObjectFilter {
    prefix: String,

    /// Set only when backups land in the source bucket itself.
    same_bucket_backup_prefix: Option<String>,

    exclude: Option<Regex>,
}

impl ObjectFilter {
    pub fn new(
        bucket: &str,
        prefix: &str,
        backup_bucket: Option<&str>,
        backup_prefix: Option<&str>,
        exclude: Option<Regex>,
    ) -> Self {
        let same_bucket_backup_prefix = match (backup_bucket, backup_prefix) {
            (Some(backup_bucket), Some(backup_prefix))
                if backup_bucket == bucket && !backup_prefix.is_empty() =>
            {
                Some(backup_prefix.to_string())
            }
            _ => None,
        };

        Self {
            prefix: prefix.to_string(),
            same_bucket_backup_prefix,
            exclude,
        }
    }

    /// True when `key` is the prefix marker itself, one of our own archived
    /// copies, or matches the exclusion pattern.
    pub fn should_ignore(&self, key: &str) -> bool {
        if key == self.prefix {
            return true;
        }
        if let Some(backup_prefix) = &self.same_bucket_backup_prefix {
            if key.starts_with(backup_prefix.as_str()) {
                return true;
            }
        }
        self.exclude
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_marker_is_ignored() {
        let filter = ObjectFilter::new("logs", "app/", None, None, None);
        assert!(filter.should_ignore("app/"));
        assert!(!filter.should_ignore("app/a.log"));
    }

    #[test]
    fn exclusion_pattern_applies() {
        let exclude = Regex::new(r"\.tmp$").unwrap();
        let filter = ObjectFilter::new("logs", "", None, None, Some(exclude));
        assert!(filter.should_ignore("app/a.log.tmp"));
        assert!(!filter.should_ignore("app/a.log"));
    }

    #[test]
    fn own_backups_ignored_only_in_same_bucket() {
        let same = ObjectFilter::new("logs", "", Some("logs"), Some("processed/"), None);
        assert!(same.should_ignore("processed/app/a.log"));
        assert!(!same.should_ignore("app/a.log"));

        let other = ObjectFilter::new("logs", "", Some("archive"), Some("processed/"), None);
        assert!(!other.should_ignore("processed/app/a.log"));

        let no_prefix = ObjectFilter::new("logs", "", Some("logs"), None, None);
        assert!(!no_prefix.should_ignore("processed/app/a.log"));
    }
}
