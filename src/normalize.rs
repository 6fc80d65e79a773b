use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

static NON_ASCII_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\x00-\x7F]+").expect("valid regex"));

/// Reduce free text from the station API (names, addresses) to plain ASCII.
///
/// The ordinal markers common in Spanish street numbers become periods
/// ("nº 4" -> "n. 4"), accented letters lose their marks after compatibility
/// decomposition, and whatever non-ASCII remains is dropped. Empty input
/// gives an empty string.
///
/// # Examples
///
/// ```
/// use bicimad_collector::normalize::normalize_text;
///
/// assert_eq!(normalize_text("Plaza de España"), "Plaza de Espana");
/// assert_eq!(normalize_text("Calle Alcalá nº 20"), "Calle Alcala n. 20");
/// assert_eq!(normalize_text(""), "");
/// ```
pub fn normalize_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let text = text.replace("nº", "n.").replace('º', ".");
    let stripped: String = text.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    NON_ASCII_RE.replace_all(&stripped, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        assert_eq!(normalize_text("Glorieta de Embajadores"), "Glorieta de Embajadores");
    }

    #[test]
    fn test_accents_removed() {
        assert_eq!(normalize_text("Plaza de España"), "Plaza de Espana");
        assert_eq!(normalize_text("Puerta del Sol, Ópera"), "Puerta del Sol, Opera");
        assert_eq!(normalize_text("Argüelles"), "Arguelles");
    }

    #[test]
    fn test_ordinal_markers() {
        assert_eq!(normalize_text("Calle Mayor nº 5"), "Calle Mayor n. 5");
        assert_eq!(normalize_text("Piso 3º"), "Piso 3.");
    }

    #[test]
    fn test_other_non_ascii_dropped() {
        assert_eq!(normalize_text("Estación 🚲 Sol"), "Estacion  Sol");
        assert_eq!(normalize_text("€uro"), "uro");
    }

    #[test]
    fn test_output_is_ascii() {
        let inputs = ["Ñuñoa", "Çà et là", "Łódź", "日本語", "São Paulo nº 1"];
        for input in inputs {
            assert!(normalize_text(input).is_ascii(), "not ascii for {input}");
        }
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "",
            "Plaza de España",
            "Calle Alcalá nº 20",
            "Glorieta de Embajadores",
            "ﬁne ligature ½",
            "Estación 🚲 Sol",
        ];
        for input in inputs {
            let once = normalize_text(input);
            assert_eq!(normalize_text(&once), once, "not idempotent for {input}");
        }
    }
}
