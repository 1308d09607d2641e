//! Cloud provider keys accepted alongside generated code.

use crate::error::ProviderError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Gcp,
    Azure,
}

/// Per-provider static configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderProfile {
    pub display_name: &'static str,
    /// Service catalog consulted when picking icons.
    pub services_catalog: &'static str,
    /// Module generated code imports its node classes from.
    pub diagram_module: &'static str,
}

impl CloudProvider {
    pub fn profile(self) -> ProviderProfile {
        match self {
            CloudProvider::Aws => ProviderProfile {
                display_name: "Amazon Web Services",
                services_catalog: "aws_modified.yaml",
                diagram_module: "diagrams.aws",
            },
            CloudProvider::Gcp => ProviderProfile {
                display_name: "Google Cloud Platform",
                services_catalog: "gcp_modified.yaml",
                diagram_module: "diagrams.gcp",
            },
            CloudProvider::Azure => ProviderProfile {
                display_name: "Microsoft Azure",
                services_catalog: "azure_modified.yaml",
                diagram_module: "diagrams.azure",
            },
        }
    }
}

impl FromStr for CloudProvider {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(CloudProvider::Aws),
            "gcp" => Ok(CloudProvider::Gcp),
            "azure" => Ok(CloudProvider::Azure),
            _ => Err(ProviderError::Unrecognized(s.to_string())),
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudProvider::Aws => write!(f, "aws"),
            CloudProvider::Gcp => write!(f, "gcp"),
            CloudProvider::Azure => write!(f, "azure"),
        }
    }
}
