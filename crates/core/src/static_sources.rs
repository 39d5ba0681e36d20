//! Built-in lookup lists that have no backing form or module.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticEntry {
    pub value: &'static str,
    pub label: &'static str,
    pub description: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticSource {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub entries: &'static [StaticEntry],
}

const fn entry(value: &'static str, label: &'static str) -> StaticEntry {
    StaticEntry {
        value,
        label,
        description: None,
    }
}

const fn described(
    value: &'static str,
    label: &'static str,
    description: &'static str,
) -> StaticEntry {
    StaticEntry {
        value,
        label,
        description: Some(description),
    }
}

const COUNTRIES: &[StaticEntry] = &[
    entry("US", "United States"),
    entry("CA", "Canada"),
    entry("MX", "Mexico"),
    entry("GB", "United Kingdom"),
    entry("DE", "Germany"),
    entry("FR", "France"),
    entry("ES", "Spain"),
    entry("IT", "Italy"),
    entry("IN", "India"),
    entry("JP", "Japan"),
    entry("CN", "China"),
    entry("BR", "Brazil"),
    entry("AU", "Australia"),
    entry("ZA", "South Africa"),
];

const CURRENCIES: &[StaticEntry] = &[
    described("USD", "US Dollar", "$"),
    described("EUR", "Euro", "€"),
    described("GBP", "British Pound", "£"),
    described("JPY", "Japanese Yen", "¥"),
    described("INR", "Indian Rupee", "₹"),
    described("CAD", "Canadian Dollar", "C$"),
    described("AUD", "Australian Dollar", "A$"),
    described("CNY", "Chinese Yuan", "¥"),
];

const PRIORITIES: &[StaticEntry] = &[
    described("low", "Low", "Can wait"),
    described("medium", "Medium", "Normal priority"),
    described("high", "High", "Needs attention soon"),
    described("urgent", "Urgent", "Needs attention now"),
];

const STATUSES: &[StaticEntry] = &[
    entry("draft", "Draft"),
    entry("active", "Active"),
    entry("pending", "Pending"),
    entry("completed", "Completed"),
    entry("archived", "Archived"),
];

pub const STATIC_SOURCES: &[StaticSource] = &[
    StaticSource {
        id: "countries",
        name: "Countries",
        description: "ISO 3166 country list",
        entries: COUNTRIES,
    },
    StaticSource {
        id: "currencies",
        name: "Currencies",
        description: "ISO 4217 currency list",
        entries: CURRENCIES,
    },
    StaticSource {
        id: "priorities",
        name: "Priorities",
        description: "Priority levels",
        entries: PRIORITIES,
    },
    StaticSource {
        id: "statuses",
        name: "Statuses",
        description: "Generic workflow statuses",
        entries: STATUSES,
    },
];

pub fn find(id: &str) -> Option<&'static StaticSource> {
    STATIC_SOURCES.iter().find(|s| s.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ids_are_unique_and_unprefixed() {
        for (i, a) in STATIC_SOURCES.iter().enumerate() {
            assert!(!a.id.starts_with("module_") && !a.id.starts_with("form_"));
            assert!(!a.entries.is_empty(), "{} has no entries", a.id);
            for b in &STATIC_SOURCES[i + 1..] {
                assert_ne!(a.id, b.id);
            }
        }
    }

    #[test]
    fn find_by_id() {
        assert_eq!(find("priorities").map(|s| s.entries.len()), Some(4));
        assert!(find("planets").is_none());
    }
}
