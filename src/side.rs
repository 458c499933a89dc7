//! Facial side/region qualifiers for Action Unit variants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Region of the face an Action Unit variant applies to.
///
/// A qualifier only: sides carry no hierarchy. The lip funnel and lip
/// tightener variants split the mouth into four quadrants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Side {
    Left,
    Right,
    DnLeft,
    DnRight,
    UpLeft,
    UpRight,
    #[default]
    Center,
    LipFunnelDnLeft,
    LipFunnelDnRight,
    LipFunnelUpLeft,
    LipFunnelUpRight,
    LipTightenDnLeft,
    LipTightenDnRight,
    LipTightenUpLeft,
    LipTightenUpRight,
}

impl Side {
    pub const ALL: [Side; 15] = [
        Side::Left,
        Side::Right,
        Side::DnLeft,
        Side::DnRight,
        Side::UpLeft,
        Side::UpRight,
        Side::Center,
        Side::LipFunnelDnLeft,
        Side::LipFunnelDnRight,
        Side::LipFunnelUpLeft,
        Side::LipFunnelUpRight,
        Side::LipTightenDnLeft,
        Side::LipTightenDnRight,
        Side::LipTightenUpLeft,
        Side::LipTightenUpRight,
    ];

    /// Canonical document name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
            Side::DnLeft => "dnleft",
            Side::DnRight => "dnright",
            Side::UpLeft => "upleft",
            Side::UpRight => "upright",
            Side::Center => "center",
            Side::LipFunnelDnLeft => "lipfunneldnleft",
            Side::LipFunnelDnRight => "lipfunneldnright",
            Side::LipFunnelUpLeft => "lipfunnelupleft",
            Side::LipFunnelUpRight => "lipfunnelupright",
            Side::LipTightenDnLeft => "liptightendnleft",
            Side::LipTightenDnRight => "liptightendnright",
            Side::LipTightenUpLeft => "liptightenupleft",
            Side::LipTightenUpRight => "liptightenupright",
        }
    }

    /// Exact lookup of a canonical name.
    pub fn parse(name: &str) -> Option<Side> {
        let side = match name {
            "left" => Side::Left,
            "right" => Side::Right,
            "dnleft" => Side::DnLeft,
            "dnright" => Side::DnRight,
            "upleft" => Side::UpLeft,
            "upright" => Side::UpRight,
            "center" => Side::Center,
            "lipfunneldnleft" => Side::LipFunnelDnLeft,
            "lipfunneldnright" => Side::LipFunnelDnRight,
            "lipfunnelupleft" => Side::LipFunnelUpLeft,
            "lipfunnelupright" => Side::LipFunnelUpRight,
            "liptightendnleft" => Side::LipTightenDnLeft,
            "liptightendnright" => Side::LipTightenDnRight,
            "liptightenupleft" => Side::LipTightenUpLeft,
            "liptightenupright" => Side::LipTightenUpRight,
            _ => return None,
        };
        Some(side)
    }

    /// Permissive lookup: unrecognized names map to [`Side::Center`].
    ///
    /// Documents authored against a newer region list still load; the
    /// unknown region is reported at `warn` level.
    pub fn from_name(name: &str) -> Side {
        Side::parse(name).unwrap_or_else(|| {
            tracing::warn!(side = name, "unrecognized side, using center");
            Side::Center
        })
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Side::from_name(s))
    }
}

impl Serialize for Side {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Side {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Side::from_name(&name))
    }
}
