/*
 *  metadata.rs
 *
 *  ArtSync - artwork worth the squeeze
 *	(c) 2020-26 Stuart Hunter
 *
 *	This program is free software: you can redistribute it and/or modify
 *	it under the terms of the GNU General Public License as published by
 *	the Free Software Foundation, either version 3 of the License, or
 *	(at your option) any later version.
 *
 *	This program is distributed in the hope that it will be useful,
 *	but WITHOUT ANY WARRANTY; without even the implied warranty of
 *	MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *	GNU General Public License for more details.
 *
 *	See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *	Public License.
 *
 */
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::deutils::{default_empty, deserialize_string_or_empty, header_or_empty};

/// Now playing tags as served by `/metadata.json`.
///
/// Every field is a plain string, never absent: the host may omit or null
/// any of them and we still compare field-wise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrackMetadata {
    #[serde(default = "default_empty", deserialize_with = "deserialize_string_or_empty")]
    pub title: String,
    #[serde(default = "default_empty", deserialize_with = "deserialize_string_or_empty")]
    pub artist: String,
    #[serde(default = "default_empty", deserialize_with = "deserialize_string_or_empty")]
    pub album: String,
}

impl TrackMetadata {
    pub fn new(title: &str, artist: &str, album: &str) -> Self {
        TrackMetadata {
            title: title.to_string(),
            artist: artist.to_string(),
            album: album.to_string(),
        }
    }

    /// Parse a metadata document, extra keys (e.g. `last_updated`) are ignored.
    pub fn from_json(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Names of the fields that differ from `other`, handy for debug logs.
    pub fn changed_fields(&self, other: &TrackMetadata) -> Vec<&'static str> {
        let mut fields = Vec::with_capacity(3);
        if self.title != other.title { fields.push("title"); }
        if self.artist != other.artist { fields.push("artist"); }
        if self.album != other.album { fields.push("album"); }
        fields
    }
}

impl Display for TrackMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.title, self.artist)
    }
}

/// Opaque cache validators of the artwork resource.
///
/// Compared byte for byte, never parsed: any server side re-render moves at
/// least one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtworkValidator {
    pub last_modified: String,
    pub content_length: String,
}

impl ArtworkValidator {
    pub fn new(last_modified: &str, content_length: &str) -> Self {
        ArtworkValidator {
            last_modified: last_modified.to_string(),
            content_length: content_length.to_string(),
        }
    }

    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        ArtworkValidator {
            last_modified: header_or_empty(headers, reqwest::header::LAST_MODIFIED),
            content_length: header_or_empty(headers, reqwest::header::CONTENT_LENGTH),
        }
    }

    pub fn differs_from(&self, other: &ArtworkValidator) -> bool {
        self.last_modified != other.last_modified || self.content_length != other.content_length
    }
}

impl Display for ArtworkValidator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "last_modified='{}' content_length='{}'", self.last_modified, self.content_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, LAST_MODIFIED};

    #[test]
    fn test_full_document() {
        let md = TrackMetadata::from_json(br#"{"title":"Song","artist":"Band","album":"LP","last_updated":1712}"#).unwrap();
        assert_eq!(md, TrackMetadata::new("Song", "Band", "LP"));
    }

    #[test]
    fn test_missing_and_null_fields_become_empty() {
        let md = TrackMetadata::from_json(br#"{"title":"Song","artist":null}"#).unwrap();
        assert_eq!(md.title, "Song");
        assert_eq!(md.artist, "");
        assert_eq!(md.album, "");
    }

    #[test]
    fn test_numeric_album_kept_as_text() {
        let md = TrackMetadata::from_json(br#"{"title":"1999","album":1999}"#).unwrap();
        assert_eq!(md.album, "1999");
    }

    #[test]
    fn test_not_an_object_is_an_error() {
        assert!(TrackMetadata::from_json(b"<html>busy</html>").is_err());
    }

    #[test]
    fn test_changed_fields() {
        let a = TrackMetadata::new("A", "X", "");
        let b = TrackMetadata::new("A", "Y", "Z");
        assert_eq!(a.changed_fields(&b), vec!["artist", "album"]);
        assert!(a.changed_fields(&a.clone()).is_empty());
    }

    #[test]
    fn test_validator_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(LAST_MODIFIED, HeaderValue::from_static("Tue, 01 Apr 2025 10:00:00 GMT"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("921654"));
        let v = ArtworkValidator::from_headers(&headers);
        assert_eq!(v, ArtworkValidator::new("Tue, 01 Apr 2025 10:00:00 GMT", "921654"));

        let empty = ArtworkValidator::from_headers(&HeaderMap::new());
        assert_eq!(empty, ArtworkValidator::default());
    }

    #[test]
    fn test_validator_single_byte_difference() {
        let last = ArtworkValidator::new("T1", "500");
        assert!(ArtworkValidator::new("T1", "600").differs_from(&last));
        assert!(ArtworkValidator::new("T2", "500").differs_from(&last));
        assert!(!ArtworkValidator::new("T1", "500").differs_from(&last));
    }
}
