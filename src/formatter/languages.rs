//! Language name, flag and code tables for the derived language fields.

use crate::config::LanguagePreferences;

struct Language {
    name: &'static str,
    emoji: &'static str,
    code: &'static str,
    small_code: &'static str,
}

const fn lang(name: &'static str, emoji: &'static str, code: &'static str, small_code: &'static str) -> Language {
    Language {
        name,
        emoji,
        code,
        small_code,
    }
}

static LANGUAGES: &[Language] = &[
    lang("Multi", "🌎", "MUL", "MU"),
    lang("English", "🇬🇧", "ENG", "EN"),
    lang("French", "🇫🇷", "FRA", "FR"),
    lang("German", "🇩🇪", "DEU", "DE"),
    lang("Spanish", "🇪🇸", "SPA", "ES"),
    lang("Latino", "🇲🇽", "SPA", "ES"),
    lang("Italian", "🇮🇹", "ITA", "IT"),
    lang("Portuguese", "🇵🇹", "POR", "PT"),
    lang("Russian", "🇷🇺", "RUS", "RU"),
    lang("Japanese", "🇯🇵", "JPN", "JA"),
    lang("Korean", "🇰🇷", "KOR", "KO"),
    lang("Chinese", "🇨🇳", "ZHO", "ZH"),
    lang("Hindi", "🇮🇳", "HIN", "HI"),
    lang("Arabic", "🇸🇦", "ARA", "AR"),
    lang("Dutch", "🇳🇱", "NLD", "NL"),
    lang("Polish", "🇵🇱", "POL", "PL"),
    lang("Turkish", "🇹🇷", "TUR", "TR"),
];

fn lookup(name: &str) -> Option<&'static Language> {
    LANGUAGES.iter().find(|l| l.name.eq_ignore_ascii_case(name))
}

fn fallback_code(name: &str, len: usize) -> String {
    name.chars().take(len).collect::<String>().to_uppercase()
}

fn dedup(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

/// Every derived language projection for one stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LanguageFields {
    pub names: Vec<String>,
    pub user_names: Vec<String>,
    pub emojis: Vec<String>,
    pub user_emojis: Vec<String>,
    pub codes: Vec<String>,
    pub user_codes: Vec<String>,
    pub small_codes: Vec<String>,
    pub user_small_codes: Vec<String>,
}

impl LanguageFields {
    /// Languages from any of the user's lists first (stable), then project
    /// and de-duplicate.
    #[must_use]
    pub fn derive(languages: &[String], prefs: &LanguagePreferences) -> Self {
        let mut ordered: Vec<&String> = languages.iter().collect();
        ordered.sort_by_key(|l| !prefs.contains(l));

        let user: Vec<&String> = ordered.iter().copied().filter(|l| prefs.contains(l)).collect();

        let names = |list: &[&String]| {
            dedup(list.iter().map(|l| lookup(l).map_or_else(|| (*l).clone(), |lang| lang.name.to_string())))
        };
        let emojis = |list: &[&String]| {
            dedup(list.iter().map(|l| lookup(l).map_or_else(|| (*l).clone(), |lang| lang.emoji.to_string())))
        };
        let codes = |list: &[&String]| {
            dedup(list.iter().map(|l| lookup(l).map_or_else(|| fallback_code(l, 3), |lang| lang.code.to_string())))
        };
        let small_codes = |list: &[&String]| {
            dedup(
                list.iter()
                    .map(|l| lookup(l).map_or_else(|| fallback_code(l, 2), |lang| lang.small_code.to_string())),
            )
        };

        Self {
            names: names(ordered.as_slice()),
            user_names: names(user.as_slice()),
            emojis: emojis(ordered.as_slice()),
            user_emojis: emojis(user.as_slice()),
            codes: codes(ordered.as_slice()),
            user_codes: codes(user.as_slice()),
            small_codes: small_codes(ordered.as_slice()),
            user_small_codes: small_codes(user.as_slice()),
        }
    }
}
