//! Locale-aware name transcoding for manifest keys.
//!
//! The manifest persists directory and file names as UTF-8 regardless of the
//! operating system locale. This module converts names between the locale
//! encoding and UTF-8 in both directions. When the locale charset is UTF-8
//! the conversion is a validation-only borrow; no bytes are copied.

use encoding_rs::Encoding;
use std::borrow::Cow;
use std::sync::OnceLock;

#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("Name is not valid {charset}: {name}")]
    Undecodable { charset: &'static str, name: String },
    #[error("Name cannot be represented in {charset}: {name}")]
    Unencodable { charset: &'static str, name: String },
}

/// Converts names between the OS locale encoding and UTF-8.
///
/// The encoder is resolved once at program start from `LC_ALL`/`LC_CTYPE`/
/// `LANG` and is immutable afterwards, so it is safe to read from anywhere.
/// Locales without a recognizable charset (including `C` and `POSIX`) are
/// treated as UTF-8.
#[derive(Debug)]
pub struct PathEncoder {
    /// `None` means the locale charset is UTF-8 and conversion is identity.
    encoding: Option<&'static Encoding>,
}

static GLOBAL: OnceLock<PathEncoder> = OnceLock::new();

impl PathEncoder {
    /// Resolve the encoder from the process environment.
    pub fn from_env() -> Self {
        let locale = ["LC_ALL", "LC_CTYPE", "LANG"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
            .unwrap_or_default();
        Self::from_locale(&locale)
    }

    /// Resolve the encoder from a locale string such as `en_US.UTF-8` or
    /// `de_DE.ISO-8859-15@euro`.
    pub fn from_locale(locale: &str) -> Self {
        match charset_of_locale(locale) {
            Some(label) => Self::from_charset(label),
            None => Self { encoding: None },
        }
    }

    /// Build an encoder for an explicit charset label. Unknown labels fall
    /// back to UTF-8 so that an exotic locale degrades to strict UTF-8
    /// validation rather than a startup failure.
    pub fn from_charset(label: &str) -> Self {
        let encoding = Encoding::for_label(label.as_bytes())
            .filter(|enc| *enc != encoding_rs::UTF_8);
        Self { encoding }
    }

    /// Install the process-wide encoder. Later calls are ignored; the first
    /// initialization wins.
    pub fn init_global(encoder: PathEncoder) {
        let _ = GLOBAL.set(encoder);
    }

    /// The process-wide encoder. Defaults to the environment-resolved one if
    /// `init_global` has not run.
    pub fn global() -> &'static PathEncoder {
        GLOBAL.get_or_init(PathEncoder::from_env)
    }

    /// True when conversion is the UTF-8 identity.
    pub fn is_identity(&self) -> bool {
        self.encoding.is_none()
    }

    /// Convert a locale-encoded name to UTF-8.
    ///
    /// On a UTF-8 locale this validates and borrows; otherwise it transcodes.
    /// Input that is invalid under the source encoding fails with
    /// [`EncodingError::Undecodable`].
    pub fn to_utf8<'a>(&self, bytes: &'a [u8]) -> Result<Cow<'a, str>, EncodingError> {
        match self.encoding {
            None => match std::str::from_utf8(bytes) {
                Ok(s) => Ok(Cow::Borrowed(s)),
                Err(_) => Err(EncodingError::Undecodable {
                    charset: "UTF-8",
                    name: String::from_utf8_lossy(bytes).into_owned(),
                }),
            },
            Some(enc) => {
                let (decoded, had_errors) = enc.decode_without_bom_handling(bytes);
                if had_errors {
                    return Err(EncodingError::Undecodable {
                        charset: enc.name(),
                        name: String::from_utf8_lossy(bytes).into_owned(),
                    });
                }
                Ok(decoded)
            }
        }
    }

    /// Convert a UTF-8 name back to the locale encoding.
    pub fn from_utf8<'a>(&self, name: &'a str) -> Result<Cow<'a, [u8]>, EncodingError> {
        match self.encoding {
            None => Ok(Cow::Borrowed(name.as_bytes())),
            Some(enc) => {
                let (encoded, _, had_unmappable) = enc.encode(name);
                if had_unmappable {
                    return Err(EncodingError::Unencodable {
                        charset: enc.name(),
                        name: name.to_string(),
                    });
                }
                Ok(encoded)
            }
        }
    }
}

/// Extract the charset portion of a locale string: the text between `.` and
/// an optional `@modifier`. Returns `None` when there is no charset or the
/// locale is `C`/`POSIX`/empty (all of which mean "no conversion" here).
fn charset_of_locale(locale: &str) -> Option<&str> {
    if locale.is_empty() || locale == "C" || locale == "POSIX" {
        return None;
    }
    let after_dot = locale.split_once('.')?.1;
    let charset = after_dot.split('@').next().unwrap_or(after_dot);
    if charset.is_empty() { None } else { Some(charset) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_locale_borrows_in_both_directions() {
        let enc = PathEncoder::from_locale("en_US.UTF-8");
        assert!(enc.is_identity());

        let to = enc.to_utf8("grüße.txt".as_bytes()).unwrap();
        assert!(matches!(to, Cow::Borrowed(_)));
        assert_eq!(&*to, "grüße.txt");

        let from = enc.from_utf8("grüße.txt").unwrap();
        assert!(matches!(from, Cow::Borrowed(_)));
        assert_eq!(&*from, "grüße.txt".as_bytes());
    }

    #[test]
    fn utf8_locale_rejects_invalid_sequences() {
        let enc = PathEncoder::from_locale("en_US.UTF-8");
        let result = enc.to_utf8(&[0x66, 0x6f, 0xff, 0x6f]);
        assert!(matches!(result, Err(EncodingError::Undecodable { .. })));
    }

    #[test]
    fn latin1_locale_transcodes_round_trip() {
        let enc = PathEncoder::from_locale("de_DE.ISO-8859-1");
        assert!(!enc.is_identity());

        // 0xE9 is "é" in ISO-8859-1.
        let utf8 = enc.to_utf8(&[0x63, 0x61, 0x66, 0xE9]).unwrap();
        assert_eq!(&*utf8, "café");

        let back = enc.from_utf8(&utf8).unwrap();
        assert_eq!(&*back, &[0x63, 0x61, 0x66, 0xE9]);
    }

    #[test]
    fn latin1_locale_rejects_unmappable_output() {
        let enc = PathEncoder::from_locale("de_DE.ISO-8859-1");
        let result = enc.from_utf8("snow\u{2603}man");
        assert!(matches!(result, Err(EncodingError::Unencodable { .. })));
    }

    #[test]
    fn c_and_posix_locales_mean_utf8() {
        assert!(PathEncoder::from_locale("C").is_identity());
        assert!(PathEncoder::from_locale("POSIX").is_identity());
        assert!(PathEncoder::from_locale("").is_identity());
    }

    #[test]
    fn charset_extraction_handles_modifiers() {
        assert_eq!(charset_of_locale("de_DE.ISO-8859-15@euro"), Some("ISO-8859-15"));
        assert_eq!(charset_of_locale("en_US.UTF-8"), Some("UTF-8"));
        assert_eq!(charset_of_locale("de_DE"), None);
    }

    #[test]
    fn unknown_charset_falls_back_to_utf8_validation() {
        let enc = PathEncoder::from_charset("NO-SUCH-CHARSET-42");
        assert!(enc.is_identity());
    }
}
