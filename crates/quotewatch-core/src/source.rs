use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical provider identifiers used in quotes, health snapshots and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Eastmoney,
    Sina,
    Tencent,
    Xueqiu,
    Yahoo,
    /// Logical adapter that delegates to a market-appropriate inner provider.
    Composite,
}

impl ProviderId {
    pub const ALL: [Self; 6] = [
        Self::Eastmoney,
        Self::Sina,
        Self::Tencent,
        Self::Xueqiu,
        Self::Yahoo,
        Self::Composite,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eastmoney => "eastmoney",
            Self::Sina => "sina",
            Self::Tencent => "tencent",
            Self::Xueqiu => "xueqiu",
            Self::Yahoo => "yahoo",
            Self::Composite => "composite",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eastmoney" => Ok(Self::Eastmoney),
            "sina" => Ok(Self::Sina),
            "tencent" => Ok(Self::Tencent),
            "xueqiu" => Ok(Self::Xueqiu),
            "yahoo" => Ok(Self::Yahoo),
            "composite" => Ok(Self::Composite),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
