//! Channel name lists
//!
//! Several channel names travel in one frame as a comma-separated list.
//! A literal comma inside a name is written as `\,`; the list is split only
//! on commas that are not preceded by a backslash.

/// Join channel names into an escaped comma-separated list
///
/// Only commas are escaped. A backslash is written as-is, so a name that
/// ends in `\` and is followed by another name produces `\,`, which reads
/// back as an escaped comma: `["a\\", "b"]` comes back as `["a,b"]`.
/// Escaping backslashes too would change the list format peers parse.
pub fn stringify_names<S: AsRef<str>>(names: &[S]) -> String {
    let mut out = String::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&name.as_ref().replace(',', "\\,"));
    }
    out
}

/// Split an escaped comma-separated list back into channel names
///
/// An empty input yields no names.
pub fn parse_names(list: &str) -> Vec<String> {
    if list.is_empty() {
        return Vec::new();
    }

    let mut names = Vec::new();
    let mut current = String::new();
    let mut prev_backslash = false;

    for c in list.chars() {
        if c == ',' {
            if prev_backslash {
                // `\,` is an escaped comma: drop the backslash, keep the comma
                current.pop();
                current.push(',');
            } else {
                names.push(std::mem::take(&mut current));
            }
            prev_backslash = false;
            continue;
        }

        prev_backslash = c == '\\';
        current.push(c);
    }

    names.push(current);
    names
}
