use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const DIGEST_MARKER: &str = "@sha256:";

/// A container image string split into its comparable parts.
///
/// `registry` holds everything before the last `/`, so for
/// `docker.io/library/nginx` it is `docker.io/library`. `name` never contains a `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed image reference '{0}': no image name found")]
    Malformed(String),
}

/// Selects which image components take part in rendering and equality checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageProjection {
    pub registry: bool,
    pub name: bool,
    pub tag: bool,
    pub digest: bool,
}

impl Default for ImageProjection {
    fn default() -> Self {
        Self {
            registry: true,
            name: true,
            tag: true,
            digest: false,
        }
    }
}

impl ImageProjection {
    pub fn all() -> Self {
        Self {
            registry: true,
            name: true,
            tag: true,
            digest: true,
        }
    }
}

impl ImageReference {
    /// Splits `s` into registry, name, tag and digest.
    ///
    /// Rules, applied right to left:
    /// - a trailing `@sha256:<word chars>` is the digest; any other `@` stays in the name
    /// - the registry is everything before the last `/`
    /// - in the final path segment, a `:` followed only by `[A-Za-z0-9_.-]` starts the tag,
    ///   an empty tag is treated as absent
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let malformed = || ParseError::Malformed(s.to_string());

        let (rest, digest) = split_digest(s);

        let (registry, last_segment) = match rest.rfind('/') {
            Some(pos) => (Some(&rest[..pos]), &rest[pos + 1..]),
            None => (None, rest),
        };

        let (name, tag) = split_tag(last_segment);
        if name.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            registry: registry.filter(|r| !r.is_empty()).map(str::to_string),
            name: name.to_string(),
            tag: tag.filter(|t| !t.is_empty()).map(str::to_string),
            digest: digest.filter(|d| !d.is_empty()).map(str::to_string),
        })
    }

    /// Renders the components selected by `projection`.
    ///
    /// A separator is only written when something precedes it, so a tag-only
    /// projection of `nginx:1.21` renders as `1.21`.
    pub fn render(&self, projection: &ImageProjection) -> String {
        let mut out = String::new();

        if projection.registry {
            if let Some(registry) = &self.registry {
                out.push_str(registry);
            }
        }
        if projection.name {
            push_component(&mut out, "/", &self.name);
        }
        if projection.tag {
            if let Some(tag) = &self.tag {
                push_component(&mut out, ":", tag);
            }
        }
        if projection.digest {
            if let Some(digest) = &self.digest {
                push_component(&mut out, DIGEST_MARKER, digest);
            }
        }
        out
    }
}

/// Free-standing form of [`ImageReference::render`] for display code.
pub fn render_image(image: &ImageReference, projection: &ImageProjection) -> String {
    image.render(projection)
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(&ImageProjection::all()))
    }
}

fn push_component(out: &mut String, separator: &str, value: &str) {
    if !out.is_empty() {
        out.push_str(separator);
    }
    out.push_str(value);
}

fn split_digest(s: &str) -> (&str, Option<&str>) {
    match s.rfind(DIGEST_MARKER) {
        Some(pos) => {
            let digest = &s[pos + DIGEST_MARKER.len()..];
            if digest.chars().all(is_word_char) {
                (&s[..pos], Some(digest))
            } else {
                (s, None)
            }
        }
        None => (s, None),
    }
}

fn split_tag(segment: &str) -> (&str, Option<&str>) {
    match segment.rfind(':') {
        Some(pos) if pos > 0 => {
            let tag = &segment[pos + 1..];
            if tag.chars().all(|c| is_word_char(c) || c == '.' || c == '-') {
                (&segment[..pos], Some(tag))
            } else {
                (segment, None)
            }
        }
        _ => (segment, None),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
