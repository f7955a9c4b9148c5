//! Decides which of a product's category fields counts as its inventory category.

/// Ordered category rules.
///
/// Category fields are evaluated in priority order (`Category1`, `Category2`,
/// `Category3`). The first one that is non-empty, not ignored and allow-listed
/// wins. Comparisons are case-insensitive on trimmed names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRules {
    pub allow: Vec<String>,
    pub ignore: Vec<String>,
    pub excluded: Vec<String>,
}

impl Default for CategoryRules {
    fn default() -> Self {
        Self::new(
            to_strings(&["Möbel", "Leuchten", "Accessoires", "Textilien", "Ersatzteile"]),
            to_strings(&["Alle Produkte", "Sale", "Neuheiten"]),
            to_strings(&["Antiquitäten"]),
        )
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn contains(list: &[String], needle: &str) -> bool {
    let needle = normalize(needle);
    list.iter().any(|item| normalize(item) == needle)
}

impl CategoryRules {
    pub fn new(allow: Vec<String>, ignore: Vec<String>, excluded: Vec<String>) -> Self {
        Self {
            allow,
            ignore,
            excluded,
        }
    }

    /// First allow-listed, non-ignored category in priority order.
    pub fn resolve(&self, categories: &[Option<&str>]) -> Option<String> {
        categories
            .iter()
            .flatten()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .filter(|name| !contains(&self.ignore, name))
            .find(|name| contains(&self.allow, name))
            .map(str::to_string)
    }

    /// True when any category field names an excluded category.
    pub fn is_excluded(&self, categories: &[Option<&str>]) -> bool {
        categories
            .iter()
            .flatten()
            .any(|name| contains(&self.excluded, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case([Some("Möbel"), None, None], Some("Möbel"))]
    #[case([Some("Alle Produkte"), Some("Leuchten"), None], Some("Leuchten"))]
    #[case([Some("  "), None, Some("textilien ")], Some("textilien"))]
    #[case([Some("Sale"), Some("Neuheiten"), Some("Alle Produkte")], None)]
    #[case([Some("Gartenbedarf"), Some("Accessoires"), Some("Möbel")], Some("Accessoires"))]
    #[case([None, None, None], None)]
    fn resolves_first_allowed_category(
        #[case] categories: [Option<&str>; 3],
        #[case] expected: Option<&str>,
    ) {
        let rules = CategoryRules::default();
        assert_eq!(rules.resolve(&categories).as_deref(), expected);
    }

    #[rstest]
    #[case([Some("Antiquitäten"), None, None], true)]
    #[case([Some("Möbel"), Some(" antiquitäten"), None], true)]
    #[case([Some("Möbel"), Some("Leuchten"), None], false)]
    #[case([None, None, None], false)]
    fn detects_excluded_categories(#[case] categories: [Option<&str>; 3], #[case] expected: bool) {
        assert_eq!(CategoryRules::default().is_excluded(&categories), expected);
    }

    #[test]
    fn ignore_wins_over_allow() {
        let rules = CategoryRules::new(
            vec!["Sale".into(), "Möbel".into()],
            vec!["Sale".into()],
            vec![],
        );
        assert_eq!(
            rules.resolve(&[Some("Sale"), Some("Möbel")]).as_deref(),
            Some("Möbel")
        );
    }
}
