//! Singular/plural and case conversions used to derive table names

use std::sync::LazyLock;

use regex::Regex;

type Rules = Vec<(Regex, &'static str)>;

fn rules(rules: &[(&str, &'static str)]) -> Rules {
    rules
        .iter()
        .map(|(pattern, replacement)| (Regex::new(pattern).expect("Invalid Regex"), *replacement))
        .collect()
}

static PLURAL_RULES: LazyLock<Rules> = LazyLock::new(|| {
    rules(&[
        (r"(x|ch|ss)$", "${1}es"),
        (r"([^aeiouy]|qu)y$", "${1}ies"),
        (r"(?:([^f])fe|([lr])f)$", "${1}${2}ves"),
        (r"sis$", "ses"),
        (r"([ti])um$", "${1}a"),
        (r"person$", "people"),
        (r"man$", "men"),
        (r"child$", "children"),
        (r"s$", "s"),
        (r"$", "s"),
    ])
});

static SINGULAR_RULES: LazyLock<Rules> = LazyLock::new(|| {
    rules(&[
        (r"(x|ch|ss)es$", "${1}"),
        (r"([^aeiouy]|qu)ies$", "${1}y"),
        (r"([lr])ves$", "${1}f"),
        (r"([^f])ves$", "${1}fe"),
        (r"(analy|ba|diagno|parenthe|progno|synop|the)ses$", "${1}sis"),
        (r"([ti])a$", "${1}um"),
        (r"people$", "person"),
        (r"men$", "man"),
        (r"status$", "status"),
        (r"children$", "child"),
        (r"s$", ""),
    ])
});

static CAMEL_BOUNDARY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.)([A-Z])").expect("Invalid Regex"));

/// Applies the first rule matching `word`
fn inflect(word: &str, rules: &Rules) -> String {
    rules
        .iter()
        .find(|(regex, _)| regex.is_match(word))
        .map_or_else(
            || word.to_string(),
            |(regex, replacement)| regex.replace(word, *replacement).into_owned(),
        )
}

#[must_use]
pub fn pluralize(word: &str) -> String {
    inflect(word, &PLURAL_RULES)
}

#[must_use]
pub fn singularize(word: &str) -> String {
    inflect(word, &SINGULAR_RULES)
}

/// `user_account` → `UserAccount`
#[must_use]
pub fn camelize(word: &str) -> String {
    word.split('_')
        .map(|part| {
            let mut chars = part.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect()
}

/// `UserAccount` → `user_account`
#[must_use]
pub fn snakefy(word: &str) -> String {
    CAMEL_BOUNDARY_REGEX
        .replace_all(word, "${1}_${2}")
        .to_lowercase()
}
