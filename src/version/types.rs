//! Common types for release resolution

/// Maximum number of characters kept from release notes
pub const MAX_NOTES_CHARS: usize = 500;

/// A release available from a remote source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDescriptor {
    /// Release identifier as published (e.g. "2024.01.01" or "v3.3.1")
    pub identifier: String,
    /// Direct download location of the release artifact
    pub fetch_location: String,
    pub notes: String,
}

impl VersionDescriptor {
    pub fn new(
        identifier: impl Into<String>,
        fetch_location: impl Into<String>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into().trim().to_string(),
            fetch_location: fetch_location.into().trim().to_string(),
            notes: truncate_notes(&notes.into()),
        }
    }

    /// A descriptor is usable only when it names both a version and a location
    pub fn is_usable(&self) -> bool {
        !self.identifier.is_empty() && !self.fetch_location.is_empty()
    }
}

fn truncate_notes(notes: &str) -> String {
    notes.chars().take(MAX_NOTES_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2024.01.01", "https://example.com/tool", true)]
    #[case("", "https://example.com/tool", false)]
    #[case("2024.01.01", "", false)]
    #[case("  ", "  ", false)]
    fn is_usable_requires_identifier_and_location(
        #[case] identifier: &str,
        #[case] location: &str,
        #[case] expected: bool,
    ) {
        let descriptor = VersionDescriptor::new(identifier, location, "");
        assert_eq!(descriptor.is_usable(), expected);
    }

    #[test]
    fn new_truncates_long_notes() {
        let descriptor = VersionDescriptor::new("1.0", "https://x", "n".repeat(2000));
        assert_eq!(descriptor.notes.chars().count(), MAX_NOTES_CHARS);
    }
}
