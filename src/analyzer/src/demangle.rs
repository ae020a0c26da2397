//! A small length-prefixed demangling scheme for Itanium-mangled symbols
//! (spec §6). Not full Itanium demangling — just enough to turn
//! `_Z N <len><text>... E` sequences into a `::`-joined path, with a small
//! set of character substitutions. Unmangled or malformed names pass
//! through unchanged.

const SUBSTITUTIONS: &[(&str, &str)] = &[("LT", "<"), ("GT", ">"), ("LP", "("), ("RP", ")"), ("C", ","), ("SP", " "), ("u20", " ")];

/// Replaces every `$TAG$` occurrence in `part` with its substitution,
/// leaving unknown tags as the bare tag text (mirrors the original's
/// "fall back to the captured group" behavior).
fn substitute(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let chars: Vec<char> = part.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' {
            if let Some(end) = chars[i + 1..].iter().position(|&c| c == '$') {
                let tag: String = chars[i + 1..i + 1 + end].iter().collect();
                if tag.chars().all(|c| c.is_ascii_alphanumeric()) {
                    let replacement = SUBSTITUTIONS.iter().find(|(name, _)| *name == tag).map(|(_, sub)| *sub).unwrap_or(tag.as_str());
                    out.push_str(replacement);
                    i += end + 2;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Demangles `name`, returning `name` itself if it isn't recognizably
/// mangled by this scheme.
pub fn demangle(name: &str) -> String {
    try_demangle(name).unwrap_or_else(|| name.to_string())
}

fn try_demangle(name: &str) -> Option<String> {
    let rest = name.strip_prefix("_Z")?;
    if rest.is_empty() {
        return None;
    }

    let chars: Vec<char> = rest.chars().collect();
    let mut pos = 0;
    let mut parts = Vec::new();

    if chars.first() == Some(&'N') {
        pos += 1;
        while pos < chars.len() {
            if chars[pos] == 'E' {
                pos += 1;
                break;
            }
            let digits_start = pos;
            while pos < chars.len() && chars[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos == digits_start {
                return None;
            }
            let length: usize = chars[digits_start..pos].iter().collect::<String>().parse().ok()?;
            if pos + length > chars.len() {
                return None;
            }
            let part: String = chars[pos..pos + length].iter().collect();
            pos += length;
            parts.push(substitute(&part));
        }
    }

    if pos < chars.len() {
        let remainder: String = chars[pos..].iter().collect();
        parts.push(remainder);
    }

    Some(parts.join("::"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmangled_name_passes_through() {
        assert_eq!(demangle("Reset_Handler"), "Reset_Handler");
    }

    #[test]
    fn nested_namespace_is_joined_with_double_colon() {
        // _Z N 3foo 3bar E -> foo::bar
        assert_eq!(demangle("_ZN3foo3barE"), "foo::bar");
    }

    #[test]
    fn substitutions_apply_inside_parts() {
        // _Z N 9a$LT$b$GT$ E -> a<b>
        assert_eq!(demangle("_ZN9a$LT$b$GT$E"), "a<b>");
    }

    #[test]
    fn trailing_text_after_e_becomes_final_part() {
        assert_eq!(demangle("_ZN3fooE4Iter"), "foo::4Iter");
    }

    #[test]
    fn malformed_length_prefix_is_passed_through() {
        assert_eq!(demangle("_ZNxyz"), "_ZNxyz");
    }
}
