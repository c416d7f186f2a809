//! Identifier mapping for the generated-wrapper ABI.
//!
//! Python identifiers become host identifiers: snake_case to camelCase,
//! reserved host keywords escaped as `_name_`, Unicode normalized to NFC
//! so visually identical identifiers collide instead of diverging.

use unicode_normalization::UnicodeNormalization;

/// Host-language keywords that cannot be used as identifiers.
const RESERVED: &[&str] = &[
    "abstract", "arguments", "await", "boolean", "break", "byte", "case", "catch", "char",
    "class", "const", "continue", "debugger", "default", "delete", "do", "double", "else",
    "enum", "eval", "export", "extends", "false", "final", "finally", "float", "for",
    "function", "goto", "if", "implements", "import", "in", "instanceof", "int", "interface",
    "let", "long", "native", "new", "null", "package", "private", "protected", "public",
    "return", "short", "static", "super", "switch", "synchronized", "this", "throw", "throws",
    "transient", "true", "try", "typeof", "var", "void", "volatile", "while", "with", "yield",
];

/// snake_case → camelCase. Leading/trailing underscores survive; interior
/// underscore runs collapse into one case boundary.
pub fn to_camel_case(name: &str) -> String {
    let leading = name.chars().take_while(|&c| c == '_').count();
    let trailing = name
        .chars()
        .rev()
        .take_while(|&c| c == '_')
        .count()
        .min(name.len() - leading);
    let core = &name[leading..name.len() - trailing];

    let mut out = String::with_capacity(name.len());
    out.extend(std::iter::repeat('_').take(leading));

    let mut upper_next = false;
    for ch in core.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }

    out.extend(std::iter::repeat('_').take(trailing));
    out
}

/// Escape reserved host keywords as `_name_`.
pub fn escape_reserved(name: &str) -> String {
    if RESERVED.contains(&name) {
        format!("_{}_", name)
    } else {
        name.to_string()
    }
}

/// NFC-normalize a Unicode identifier.
pub fn normalize_identifier(name: &str) -> String {
    name.nfc().collect()
}

/// Full mapping for one Python identifier.
pub fn host_identifier(python_name: &str) -> String {
    escape_reserved(&to_camel_case(&normalize_identifier(python_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_to_camel() {
        assert_eq!(to_camel_case("load_csv"), "loadCsv");
        assert_eq!(to_camel_case("to_numpy_array"), "toNumpyArray");
        assert_eq!(to_camel_case("fit"), "fit");
    }

    #[test]
    fn test_underscore_edges_survive() {
        assert_eq!(to_camel_case("_private_name"), "_privateName");
        assert_eq!(to_camel_case("dunder__gap"), "dunderGap");
        assert_eq!(to_camel_case("trailing_"), "trailing_");
    }

    #[test]
    fn test_reserved_keywords_escaped() {
        assert_eq!(escape_reserved("class"), "_class_");
        assert_eq!(escape_reserved("delete"), "_delete_");
        assert_eq!(escape_reserved("ordinary"), "ordinary");
    }

    #[test]
    fn test_unicode_nfc() {
        // "é" composed vs decomposed must map to the same identifier.
        let composed = "caf\u{e9}";
        let decomposed = "cafe\u{301}";
        assert_eq!(normalize_identifier(composed), normalize_identifier(decomposed));
    }

    #[test]
    fn test_host_identifier_composes_all_rules() {
        assert_eq!(host_identifier("load_csv"), "loadCsv");
        assert_eq!(host_identifier("class"), "_class_");
        // `im_port` camelizes to a non-reserved name, no escaping needed
        assert_eq!(host_identifier("im_port"), "imPort");
    }
}
