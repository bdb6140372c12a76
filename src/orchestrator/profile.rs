//! Fleet profiles: which image to run and where its sources come from

use std::fmt;
use std::path::PathBuf;

use crate::fleet::SourceSpec;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FleetKind {
    /// One container per VPN credential file
    Vpn,
    /// A counted fleet of Tor nodes
    Tor,
}

impl fmt::Display for FleetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FleetKind::Vpn => write!(f, "vpn"),
            FleetKind::Tor => write!(f, "tor"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetProfile {
    pub kind: FleetKind,
    pub image: String,
    pub build_context: PathBuf,
    pub sources: SourceSpec,
}

impl FleetProfile {
    pub fn vpn(settings: &Settings) -> Self {
        Self {
            kind: FleetKind::Vpn,
            image: settings.vpn.image.clone(),
            build_context: settings.vpn.build_context.clone(),
            sources: SourceSpec::Directory {
                root: settings.vpn.dir.clone(),
                extension: settings.vpn.extension.clone(),
            },
        }
    }

    pub fn tor(settings: &Settings) -> Self {
        Self {
            kind: FleetKind::Tor,
            image: settings.tor.image.clone(),
            build_context: settings.tor.build_context.clone(),
            sources: SourceSpec::Counted {
                prefix: "tor".to_string(),
                count: settings.tor.nodes,
            },
        }
    }

    pub fn for_kind(kind: FleetKind, settings: &Settings) -> Self {
        match kind {
            FleetKind::Vpn => Self::vpn(settings),
            FleetKind::Tor => Self::tor(settings),
        }
    }

    /// Whether `single` brings the fleet up when nothing is running
    pub fn starts_on_demand(&self) -> bool {
        matches!(self.sources, SourceSpec::Directory { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_follow_settings() {
        let mut settings = Settings::default();
        settings.tor.nodes = 5;
        settings.vpn.dir = PathBuf::from("creds");

        let tor = FleetProfile::tor(&settings);
        assert_eq!(tor.image, "audibleblink/tor");
        assert_eq!(
            tor.sources,
            SourceSpec::Counted {
                prefix: "tor".to_string(),
                count: 5
            }
        );
        assert!(!tor.starts_on_demand());

        let vpn = FleetProfile::for_kind(FleetKind::Vpn, &settings);
        assert!(matches!(vpn.sources, SourceSpec::Directory { ref root, .. } if root == &PathBuf::from("creds")));
        assert!(vpn.starts_on_demand());
    }
}
