//! Content type and charset handling for diffed content

/// Bytes inspected by [`is_binary`].
const BINARY_SNIFF_LEN: usize = 1000;

/// Content is binary when a NUL byte appears in its first 1000 bytes.
pub fn is_binary(content: &[u8]) -> bool {
    content[..content.len().min(BINARY_SNIFF_LEN)].contains(&0)
}

/// The `charset=` parameter of a content type, if any.
pub fn get_charset(content_type: Option<&str>) -> Option<String> {
    content_type?
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"').to_ascii_lowercase())
}

fn is_latin1(charset: &str) -> bool {
    matches!(
        charset,
        "iso-8859-1" | "iso8859-1" | "latin-1" | "latin1" | "l1" | "cp819"
    )
}

fn decode_latin1(content: &[u8]) -> String {
    content.iter().map(|&b| char::from(b)).collect()
}

#[derive(Debug, Clone)]
pub struct Mimeview {
    default_charset: String,
}

impl Default for Mimeview {
    fn default() -> Self {
        Mimeview::new("iso-8859-1")
    }
}

impl Mimeview {
    pub fn new(default_charset: impl Into<String>) -> Self {
        Mimeview {
            default_charset: default_charset.into().to_ascii_lowercase(),
        }
    }

    pub fn is_binary(&self, content: &[u8]) -> bool {
        is_binary(content)
    }

    /// Decode content using its declared charset, then UTF-8 when valid,
    /// then the configured default charset.
    pub fn to_unicode(&self, content: &[u8], content_type: Option<&str>) -> String {
        let charset = match get_charset(content_type) {
            Some(charset) => charset,
            None => match std::str::from_utf8(content) {
                Ok(text) => return text.to_string(),
                Err(_) => self.default_charset.clone(),
            },
        };
        if is_latin1(&charset) {
            decode_latin1(content)
        } else {
            String::from_utf8_lossy(content).into_owned()
        }
    }

    /// Content type guessed from a file name.
    pub fn content_type_for(&self, path: &str) -> String {
        mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}
