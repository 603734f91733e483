//! Daemon config rendering.
//!
//! The daemon's config file is produced from a template by plain token
//! substitution. Tokens are XML-ish self-closing tags such as `<own/>`.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Errors reading the template or writing the rendered config.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read config template {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write daemon config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Own link identity.
pub const TOKEN_OWN: &str = "<own/>";
/// Peer link identity.
pub const TOKEN_OTHER: &str = "<other/>";
/// Selected physical device index.
pub const TOKEN_PHYS: &str = "<phys/>";
/// Selected interface name.
pub const TOKEN_IFNAME: &str = "<ifname/>";

/// Token → replacement text.
pub type Substitutions = BTreeMap<String, String>;

/// Replace every occurrence of each token in `template`.
///
/// Text that is not a known token is copied through unchanged.
pub fn render(template: &str, substitutions: &Substitutions) -> String {
    substitutions
        .iter()
        .fold(template.to_string(), |text, (token, value)| {
            text.replace(token.as_str(), value)
        })
}

/// Tokens of the form `<name/>` left in `text` after rendering.
pub fn unresolved_tokens(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        let tail = &rest[start..];
        match tail.find("/>") {
            Some(end) => {
                let candidate = &tail[..end + 2];
                let name = &candidate[1..candidate.len() - 2];
                if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    found.push(candidate);
                }
                rest = &tail[1..];
            }
            None => break,
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn subs() -> Substitutions {
        [
            (TOKEN_OWN, "0xFF00"),
            (TOKEN_OTHER, "0xDD00"),
            (TOKEN_PHYS, "1"),
            (TOKEN_IFNAME, "wlan1mon"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_render_replaces_all_occurrences() {
        let template = "own = <own/>\nother = <other/>\n\
                        [pcap]\nphys = <phys/>\nif = <ifname/>\nbind = <own/>\n";
        let rendered = render(template, &subs());
        assert_eq!(
            rendered,
            "own = 0xFF00\nother = 0xDD00\n[pcap]\nphys = 1\nif = wlan1mon\nbind = 0xFF00\n"
        );
        assert!(unresolved_tokens(&rendered).is_empty());
    }

    #[test]
    fn test_unknown_text_untouched() {
        let template = "a < b; x = <custom/>; <own/>";
        let rendered = render(template, &subs());
        assert_eq!(rendered, "a < b; x = <custom/>; 0xFF00");
        assert_eq!(unresolved_tokens(&rendered), vec!["<custom/>"]);
    }

    #[test]
    fn test_render_without_substitutions() {
        let template = "static = 1\n";
        assert_eq!(render(template, &Substitutions::new()), template);
    }
}
