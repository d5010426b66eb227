/*!
 * Supported language profiles.
 *
 * Each profile carries the defaults used for prompt guidance and output
 * shaping: CPL (characters per line) bounds the length of a rendered
 * subtitle line, CPS (characters per second) drives timing correction.
 */

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// A supported language with its subtitle formatting defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    /// Canonical language code (BCP 47 style, e.g. "ja", "zh-Hans").
    pub code: &'static str,
    /// English display name, used in prompts.
    pub name: &'static str,
    /// Characters per line.
    pub default_cpl: u32,
    /// Characters per second.
    pub default_cps: u32,
}

/// Generic defaults for Latin-script languages.
pub const DEFAULT_CPL: u32 = 42;
pub const DEFAULT_CPS: u32 = 17;

macro_rules! lang {
    ($id:expr, $code:expr, $name:expr) => {
        ($id, Language { code: $code, name: $name, default_cpl: DEFAULT_CPL, default_cps: DEFAULT_CPS })
    };
    ($id:expr, $code:expr, $name:expr, $cpl:expr, $cps:expr) => {
        ($id, Language { code: $code, name: $name, default_cpl: $cpl, default_cps: $cps })
    };
}

/// Lookup table keyed by the code accepted from configuration.
/// Note "zh" aliases to Simplified Chinese.
static LANGUAGES: Lazy<HashMap<&'static str, Language>> = Lazy::new(|| {
    HashMap::from([
        lang!("af", "af", "Afrikaans"),
        lang!("sq", "sq", "Albanian"),
        lang!("am", "am", "Amharic"),
        lang!("ar", "ar", "Arabic", DEFAULT_CPL, 20),
        lang!("hy", "hy", "Armenian"),
        lang!("as", "as", "Assamese"),
        lang!("az", "az", "Azerbaijani"),
        lang!("eu", "eu", "Basque"),
        lang!("be", "be", "Belarusian"),
        lang!("bn", "bn", "Bengali", DEFAULT_CPL, 22),
        lang!("bs", "bs", "Bosnian"),
        lang!("bg", "bg", "Bulgarian"),
        lang!("ca", "ca", "Catalan"),
        lang!("ceb", "ceb", "Cebuano"),
        lang!("zh", "zh-Hans", "Chinese (Simplified)", 16, 11),
        lang!("zh-Hans", "zh-Hans", "Chinese (Simplified)", 16, 11),
        lang!("zh-Hant", "zh-Hant", "Chinese (Traditional)", 16, 11),
        lang!("co", "co", "Corsican"),
        lang!("hr", "hr", "Croatian"),
        lang!("cs", "cs", "Czech"),
        lang!("da", "da", "Danish"),
        lang!("dv", "dv", "Dhivehi"),
        lang!("nl", "nl", "Dutch"),
        lang!("en", "en", "English", DEFAULT_CPL, 20),
        lang!("eo", "eo", "Esperanto"),
        lang!("et", "et", "Estonian"),
        lang!("fil", "fil", "Filipino"),
        lang!("fi", "fi", "Finnish"),
        lang!("fr", "fr", "French"),
        lang!("fy", "fy", "Frisian"),
        lang!("gl", "gl", "Galician"),
        lang!("ka", "ka", "Georgian"),
        lang!("de", "de", "German"),
        lang!("el", "el", "Greek"),
        lang!("gu", "gu", "Gujarati"),
        lang!("ht", "ht", "Haitian Creole"),
        lang!("ha", "ha", "Hausa"),
        lang!("haw", "haw", "Hawaiian"),
        lang!("iw", "iw", "Hebrew"),
        lang!("hi", "hi", "Hindi", DEFAULT_CPL, 22),
        lang!("hmn", "hmn", "Hmong"),
        lang!("hu", "hu", "Hungarian"),
        lang!("is", "is", "Icelandic"),
        lang!("ig", "ig", "Igbo"),
        lang!("id", "id", "Indonesian"),
        lang!("ga", "ga", "Irish"),
        lang!("it", "it", "Italian"),
        lang!("ja", "ja", "Japanese", 13, 4),
        lang!("jv", "jv", "Javanese"),
        lang!("kn", "kn", "Kannada", DEFAULT_CPL, 22),
        lang!("kk", "kk", "Kazakh"),
        lang!("km", "km", "Khmer"),
        lang!("ko", "ko", "Korean", 16, 12),
        lang!("kri", "kri", "Krio"),
        lang!("ku", "ku", "Kurdish"),
        lang!("ky", "ky", "Kyrgyz"),
        lang!("lo", "lo", "Lao"),
        lang!("la", "la", "Latin"),
        lang!("lv", "lv", "Latvian"),
        lang!("lt", "lt", "Lithuanian"),
        lang!("lb", "lb", "Luxembourgish"),
        lang!("mk", "mk", "Macedonian"),
        lang!("mg", "mg", "Malagasy"),
        lang!("ms", "ms", "Malay"),
        lang!("ml", "ml", "Malayalam", DEFAULT_CPL, 22),
        lang!("mt", "mt", "Maltese"),
        lang!("mi", "mi", "Maori"),
        lang!("mr", "mr", "Marathi", DEFAULT_CPL, 22),
        lang!("mni-Mtei", "mni-Mtei", "Meiteilon (Manipuri)"),
        lang!("mn", "mn", "Mongolian"),
        lang!("my", "my", "Myanmar (Burmese)"),
        lang!("ne", "ne", "Nepali"),
        lang!("no", "no", "Norwegian"),
        lang!("ny", "ny", "Nyanja (Chichewa)"),
        lang!("or", "or", "Odia (Oriya)"),
        lang!("ps", "ps", "Pashto"),
        lang!("fa", "fa", "Persian"),
        lang!("pl", "pl", "Polish"),
        lang!("pt", "pt", "Portuguese"),
        lang!("pa", "pa", "Punjabi"),
        lang!("ro", "ro", "Romanian"),
        lang!("ru", "ru", "Russian"),
        lang!("sm", "sm", "Samoan"),
        lang!("gd", "gd", "Scots Gaelic"),
        lang!("sr", "sr", "Serbian"),
        lang!("st", "st", "Sesotho"),
        lang!("sn", "sn", "Shona"),
        lang!("sd", "sd", "Sindhi"),
        lang!("si", "si", "Sinhala (Sinhalese)"),
        lang!("sk", "sk", "Slovak"),
        lang!("sl", "sl", "Slovenian"),
        lang!("so", "so", "Somali"),
        lang!("es", "es", "Spanish"),
        lang!("su", "su", "Sundanese"),
        lang!("sw", "sw", "Swahili"),
        lang!("sv", "sv", "Swedish"),
        lang!("tg", "tg", "Tajik"),
        lang!("ta", "ta", "Tamil", DEFAULT_CPL, 22),
        lang!("te", "te", "Telugu"),
        lang!("th", "th", "Thai", 35, DEFAULT_CPS),
        lang!("tr", "tr", "Turkish"),
        lang!("uk", "uk", "Ukrainian"),
        lang!("ur", "ur", "Urdu"),
        lang!("ug", "ug", "Uyghur"),
        lang!("uz", "uz", "Uzbek"),
        lang!("vi", "vi", "Vietnamese"),
        lang!("cy", "cy", "Welsh"),
        lang!("xh", "xh", "Xhosa"),
        lang!("yi", "yi", "Yiddish"),
        lang!("yo", "yo", "Yoruba"),
        lang!("zu", "zu", "Zulu"),
    ])
});

/// Strict lookup by configured code.
pub fn get_language(code: &str) -> Option<&'static Language> {
    LANGUAGES.get(code)
}

/// All supported languages sorted by display name, then code.
pub fn supported_languages() -> Vec<(&'static str, &'static Language)> {
    let mut entries: Vec<_> = LANGUAGES.iter().map(|(k, v)| (*k, v)).collect();
    entries.sort_by(|a, b| a.1.name.cmp(b.1.name).then(a.0.cmp(b.0)));
    entries
}
