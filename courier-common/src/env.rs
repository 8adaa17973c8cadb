//! Environment lookups.
//!
//! Every reader takes a lookup function instead of touching the process
//! environment directly, so configuration can be assembled from any source
//! (and tested without mutating global state). [`process`] is the lookup
//! backed by the real environment.

use std::str::FromStr;

/// Reads a variable from the process environment, treating empty values as unset
pub fn process(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Returns the first non-empty value among `names`, in order
pub fn first_of<L, S>(lookup: &L, names: &[S]) -> Option<String>
where
    L: Fn(&str) -> Option<String>,
    S: AsRef<str>,
{
    names
        .iter()
        .find_map(|name| lookup(name.as_ref()).filter(|value| !value.is_empty()))
}

/// Reads and parses a variable, returning `None` when it is absent.
///
/// # Errors
/// Returns the variable name and raw value when it cannot be parsed.
pub fn parsed<L, T>(lookup: &L, name: &str) -> Result<Option<T>, (String, String)>
where
    L: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(name)
        .filter(|value| !value.is_empty())
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| (name.to_string(), raw.clone()))
        })
        .transpose()
}

/// A flag is set only when its value is exactly `true`
pub fn flag(value: Option<&str>) -> bool {
    value == Some("true")
}

/// Splits a comma separated list, dropping blank entries
pub fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn first_of_skips_empty_values() {
        let env = lookup(&[("A", ""), ("B", "two"), ("C", "three")]);
        assert_eq!(first_of(&env, &["A", "B", "C"]), Some("two".to_string()));
        assert_eq!(first_of(&env, &["D"]), None);
    }

    #[test]
    fn parsed_reports_bad_values() {
        let env = lookup(&[("PORT", "25x"), ("GOOD", " 2525 ")]);
        assert_eq!(parsed::<_, u16>(&env, "GOOD"), Ok(Some(2525)));
        assert_eq!(parsed::<_, u16>(&env, "MISSING"), Ok(None));
        assert_eq!(
            parsed::<_, u16>(&env, "PORT"),
            Err(("PORT".to_string(), "25x".to_string()))
        );
    }

    #[test]
    fn flags_and_lists() {
        assert!(flag(Some("true")));
        assert!(!flag(Some("TRUE")));
        assert!(!flag(None));
        assert_eq!(list(" mail, ,audit "), vec!["mail", "audit"]);
    }
}
