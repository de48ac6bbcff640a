use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use std::path::{Component, Path};

/// Characters `encodeURIComponent` leaves untouched.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, COMPONENT).to_string()
}

/// Percent-encodes every segment of a relative path and joins them with `/`.
pub fn encode_relative_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(encode_segment(&segment.to_string_lossy())),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalizes a decoded request path (`/a b/c.txt`) into the encoded served
/// form (`/a%20b/c.txt`) used as manifest key and path-hash input.
pub fn encode_served_path(decoded: &str) -> String {
    let encoded = decoded
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/");
    format!("/{encoded}")
}

/// Decodes a raw request path; invalid UTF-8 sequences are replaced.
pub fn decode_path(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn encodes_each_segment_like_encode_uri_component() {
        let path: PathBuf = ["dir with space", "ünï", "a+b&c(1).txt"].iter().collect();
        assert_eq!(
            encode_relative_path(&path),
            "dir%20with%20space/%C3%BCn%C3%AF/a%2Bb%26c(1).txt"
        );
    }

    #[test]
    fn served_path_round_trips_through_decode() {
        let served = encode_served_path("/my dir/file #1.html");
        assert_eq!(served, "/my%20dir/file%20%231.html");
        assert_eq!(encode_served_path(&decode_path(&served)), served);
    }

    #[test]
    fn root_encodes_to_slash() {
        assert_eq!(encode_served_path("/"), "/");
    }
}
