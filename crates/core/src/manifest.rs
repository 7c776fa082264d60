//! Manifest inspection
//!
//! Only the attributes the builder validates between builds are read here:
//! the application package and the declared minimum SDK.

use std::path::Path;

use crate::error::{BuildError, Result};

const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";

/// Values read from an AndroidManifest.xml
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestInfo {
    pub package: String,
    pub min_sdk: Option<u32>,
}

impl ManifestInfo {
    /// Parse manifest text
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| BuildError::Manifest(e.to_string()))?;
        let root = doc.root_element();
        if root.tag_name().name() != "manifest" {
            return Err(BuildError::Manifest(format!(
                "unexpected root element <{}>",
                root.tag_name().name()
            )));
        }

        let package = root
            .attribute("package")
            .ok_or_else(|| BuildError::Manifest("missing package attribute".into()))?
            .to_string();

        let min_sdk = root
            .children()
            .find(|n| n.has_tag_name("uses-sdk"))
            .and_then(|n| n.attribute((ANDROID_NS, "minSdkVersion")))
            .map(|v| {
                v.trim()
                    .parse::<u32>()
                    .map_err(|_| BuildError::Manifest(format!("invalid minSdkVersion '{}'", v)))
            })
            .transpose()?;

        Ok(Self { package, min_sdk })
    }

    /// Read and parse a manifest file
    pub fn read(path: &Path) -> Result<Self> {
        let xml = std::fs::read_to_string(path).map_err(|e| BuildError::io(path, e))?;
        Self::parse(&xml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_package_and_min_sdk() {
        let info = ManifestInfo::parse(
            r#"<?xml version="1.0" encoding="utf-8"?>
            <manifest xmlns:android="http://schemas.android.com/apk/res/android"
                      package="com.example.app">
                <uses-sdk android:minSdkVersion="21" android:targetSdkVersion="34"/>
                <application android:label="App"/>
            </manifest>"#,
        )
        .unwrap();
        assert_eq!(info.package, "com.example.app");
        assert_eq!(info.min_sdk, Some(21));
    }

    #[test]
    fn test_missing_package_is_an_error() {
        let result = ManifestInfo::parse("<manifest/>");
        assert!(matches!(result, Err(BuildError::Manifest(_))));
    }
}
