//! Image references of the form `<repository>:<tag>`, validated against the
//! [distribution reference grammar](https://github.com/distribution/distribution/blob/v2.7.1/reference/reference.go):
//!
//! ```txt
//! repository       := [domain '/'] path-component ['/' path-component]*
//! domain           := domain-component ['.' domain-component]* [':' port-number]
//! path-component   := alpha-numeric [separator alpha-numeric]*
//! tag              := /[\w][\w.-]{0,127}/
//! ```
//!
//! Digests are not part of a reference here; the publisher addresses images by tag and image ID.

use std::{fmt, sync::LazyLock};

use regex::Regex;

const TAG_PREFIX: char = ':';

static REPOSITORY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^",
        r"(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)+(?::[0-9]+)?/)?",
        r"[a-z0-9]+(?:(?:[_.]|__|[-]*)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[_.]|__|[-]*)[a-z0-9]+)*)*",
        r"$"
    ))
    .expect("repository regex is valid")
});

static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("tag regex is valid"));

#[derive(Debug, PartialEq, Eq)]
pub enum InvalidImageRef {
    Repository(String),
    Tag(String),
}

impl std::error::Error for InvalidImageRef {}

impl fmt::Display for InvalidImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidImageRef::Repository(value) => write!(f, "invalid image repository: {value:?}"),
            InvalidImageRef::Tag(value) => write!(f, "invalid image tag: {value:?}"),
        }
    }
}

pub fn is_valid_repository(value: &str) -> bool {
    REPOSITORY_REGEX.is_match(value)
}

pub fn is_valid_tag(value: &str) -> bool {
    TAG_REGEX.is_match(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    repository: String,
    tag: String,
}

impl ImageRef {
    pub fn new(
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Result<Self, InvalidImageRef> {
        let repository = repository.into();
        let tag = tag.into();
        if !is_valid_repository(&repository) {
            return Err(InvalidImageRef::Repository(repository));
        }
        if !is_valid_tag(&tag) {
            return Err(InvalidImageRef::Tag(tag));
        }
        Ok(Self { repository, tag })
    }

    /// Returns a reference to the same repository under a different tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Result<Self, InvalidImageRef> {
        Self::new(self.repository.clone(), tag)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// A file name friendly rendition of the repository, used to scope per pipeline state.
pub fn repository_slug(repository: &str) -> String {
    repository
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '.' => c,
            _ => '_',
        })
        .collect()
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{TAG_PREFIX}{}", self.repository, self.tag)
    }
}
