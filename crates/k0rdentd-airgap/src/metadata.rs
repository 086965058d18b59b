//! Build flavor and version information fixed at compile time

use serde::Serialize;
use std::fmt;

/// Which variant of k0rdentd this binary is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    Online,
    Airgap,
}

impl Flavor {
    pub fn current() -> Self {
        if cfg!(feature = "airgap") {
            Flavor::Airgap
        } else {
            Flavor::Online
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Flavor::Online => "online",
            Flavor::Airgap => "airgap",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True for the air-gap build
pub fn is_airgap() -> bool {
    Flavor::current() == Flavor::Airgap
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMetadata {
    pub flavor: Flavor,
    pub version: String,
    /// Embedded k0s version (airgap builds)
    pub k0s_version: String,
    /// k0rdent version the bundle was built for (airgap builds)
    pub k0rdent_version: String,
    pub build_time: String,
}

impl BuildMetadata {
    pub fn current() -> Self {
        Self {
            flavor: Flavor::current(),
            version: option_env!("K0RDENTD_VERSION")
                .unwrap_or(env!("CARGO_PKG_VERSION"))
                .to_string(),
            k0s_version: option_env!("K0RDENTD_K0S_VERSION")
                .unwrap_or("unknown")
                .to_string(),
            k0rdent_version: option_env!("K0RDENTD_K0RDENT_VERSION")
                .unwrap_or("unknown")
                .to_string(),
            build_time: option_env!("K0RDENTD_BUILD_TIME")
                .unwrap_or("unknown")
                .to_string(),
        }
    }

    pub fn is_airgap(&self) -> bool {
        self.flavor == Flavor::Airgap
    }
}
