//! Parsing of `scheme://bucket/path` object references.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Object store families an [`ObjectRef`] can point into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectScheme {
    /// Google Cloud Storage (`gs://`)
    Gcs,
    /// Amazon S3 or a compatible store (`s3://`)
    S3,
}

impl ObjectScheme {
    pub fn prefix(&self) -> &'static str {
        match self {
            ObjectScheme::Gcs => "gs://",
            ObjectScheme::S3 => "s3://",
        }
    }
}

/// A structured "container + path" address of a single object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub scheme: ObjectScheme,
    pub bucket: String,
    pub path: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ObjectRefError {
    #[error("invalid object reference '{0}': expected gs://<bucket>/<path> or s3://<bucket>/<path>")]
    UnsupportedScheme(String),

    #[error("invalid object reference '{0}': bucket is empty")]
    EmptyBucket(String),

    #[error("invalid object reference '{0}': no object path after the bucket")]
    MissingPath(String),
}

impl ObjectRef {
    pub fn new(scheme: ObjectScheme, bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            scheme,
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// Parse `gs://bucket/path` (or `s3://`).
    ///
    /// `gs://bucket` has no path and is rejected, while `gs://bucket/` is
    /// accepted and names the object `/`.
    pub fn parse(raw: &str) -> Result<Self, ObjectRefError> {
        let (scheme, rest) = if let Some(rest) = raw.strip_prefix(ObjectScheme::Gcs.prefix()) {
            (ObjectScheme::Gcs, rest)
        } else if let Some(rest) = raw.strip_prefix(ObjectScheme::S3.prefix()) {
            (ObjectScheme::S3, rest)
        } else {
            return Err(ObjectRefError::UnsupportedScheme(raw.to_string()));
        };

        let Some((bucket, path)) = rest.split_once('/') else {
            return Err(if rest.is_empty() {
                ObjectRefError::EmptyBucket(raw.to_string())
            } else {
                ObjectRefError::MissingPath(raw.to_string())
            });
        };

        if bucket.is_empty() {
            return Err(ObjectRefError::EmptyBucket(raw.to_string()));
        }

        let path = if path.is_empty() { "/" } else { path };

        Ok(Self::new(scheme, bucket, path))
    }
}

impl FromStr for ObjectRef {
    type Err = ObjectRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", self.scheme.prefix(), self.bucket, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_references() {
        let cases = [
            ("gs://hoge/", "hoge", "/"),
            ("gs://hoge//", "hoge", "/"),
            ("gs://hoge/fuga", "hoge", "fuga"),
            ("gs://hoge/fuga/moge", "hoge", "fuga/moge"),
        ];

        for (raw, bucket, path) in cases {
            let parsed = ObjectRef::parse(raw).unwrap();
            assert_eq!(parsed.scheme, ObjectScheme::Gcs, "{raw}");
            assert_eq!(parsed.bucket, bucket, "{raw}");
            assert_eq!(parsed.path, path, "{raw}");
        }
    }

    #[test]
    fn test_parse_s3_reference() {
        let parsed: ObjectRef = "s3://logs/2023/01/01.json".parse().unwrap();
        assert_eq!(parsed.scheme, ObjectScheme::S3);
        assert_eq!(parsed.bucket, "logs");
        assert_eq!(parsed.path, "2023/01/01.json");
        assert_eq!(parsed.to_string(), "s3://logs/2023/01/01.json");
    }

    #[test]
    fn test_parse_invalid_references() {
        assert!(matches!(
            ObjectRef::parse(""),
            Err(ObjectRefError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            ObjectRef::parse("gs://"),
            Err(ObjectRefError::EmptyBucket(_))
        ));
        assert!(matches!(
            ObjectRef::parse("gs://hoge"),
            Err(ObjectRefError::MissingPath(_))
        ));
        assert!(matches!(
            ObjectRef::parse("gs:///object"),
            Err(ObjectRefError::EmptyBucket(_))
        ));
        assert!(matches!(
            ObjectRef::parse("/local/file.txt"),
            Err(ObjectRefError::UnsupportedScheme(_))
        ));
    }
}
