use serde::{Deserialize, Serialize};

/// Per-language speaking constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub words_per_second: f64,
    /// Used for ideographic scripts where words are not space-delimited.
    pub chars_per_second: f64,
    pub pause_weight: f64,
    /// Lead-in and tail silence the synthesizer adds to every clip.
    pub overhead_secs: f64,
}

impl LanguageProfile {
    const fn new(wps: f64, cps: f64, pause_weight: f64, overhead_secs: f64) -> Self {
        Self {
            words_per_second: wps,
            chars_per_second: cps,
            pause_weight,
            overhead_secs,
        }
    }

    /// Profile for an ISO 639-1 code (region suffixes are ignored).
    /// Unknown languages fall back to English.
    pub fn for_language(code: &str) -> Self {
        let primary = code
            .split(['-', '_'])
            .next()
            .unwrap_or(code)
            .to_ascii_lowercase();
        match primary.as_str() {
            "zh" => Self::new(2.0, 6.8, 0.9, 0.13),
            "ja" => Self::new(1.8, 7.5, 0.9, 0.12),
            "ko" => Self::new(1.9, 8.5, 0.95, 0.14),
            "es" => Self::new(2.2, 11.0, 1.1, 0.16),
            "fr" => Self::new(2.3, 11.8, 1.0, 0.15),
            "de" => Self::new(2.1, 10.5, 1.2, 0.18),
            _ => Self::new(2.4, 12.5, 1.0, 0.15),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_suffix_ignored() {
        assert_eq!(
            LanguageProfile::for_language("es-MX"),
            LanguageProfile::for_language("es")
        );
        assert_eq!(
            LanguageProfile::for_language("ZH_cn"),
            LanguageProfile::for_language("zh")
        );
    }

    #[test]
    fn test_german_is_slower() {
        let de = LanguageProfile::for_language("de");
        let en = LanguageProfile::for_language("en");
        assert!(de.words_per_second < en.words_per_second);
    }
}
