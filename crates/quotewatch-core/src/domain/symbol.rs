use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SYMBOL_LEN: usize = 15;

/// Exchange a symbol trades on, inferred from its code shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    Shanghai,
    Shenzhen,
    Us,
}

impl Market {
    /// EastMoney secid market number.
    pub const fn secid_prefix(self) -> &'static str {
        match self {
            Self::Shanghai => "1",
            Self::Shenzhen => "0",
            Self::Us => "105",
        }
    }

    /// Lowercase letter prefix used by Sina and Tencent.
    pub const fn letter_prefix(self) -> &'static str {
        match self {
            Self::Shanghai => "sh",
            Self::Shenzhen => "sz",
            Self::Us => "",
        }
    }
}

/// Normalized, exchange-qualified instrument identifier.
///
/// Six-digit codes are classified as CN ETFs with the market inferred from
/// the leading digits (50/51/52/56/58 Shanghai, 15/16/18 Shenzhen); anything
/// starting with an ASCII letter is treated as a US-listed ticker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol {
    code: String,
    market: Market,
}

impl Symbol {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                len,
                max: MAX_SYMBOL_LEN,
            });
        }

        for (index, ch) in normalized.chars().enumerate() {
            let valid = ch.is_ascii_alphanumeric() || ch == '.' || ch == '-';
            if !valid {
                return Err(ValidationError::SymbolInvalidChar { ch, index });
            }
        }

        let market = if len == 6 && normalized.bytes().all(|b| b.is_ascii_digit()) {
            match &normalized[..2] {
                "15" | "16" | "18" => Market::Shenzhen,
                // Unknown numeric patterns default to Shanghai, matching the
                // convention the domestic providers use.
                _ => Market::Shanghai,
            }
        } else {
            Market::Us
        };

        Ok(Self {
            code: normalized,
            market,
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub const fn market(&self) -> Market {
        self.market
    }

    pub const fn is_cn(&self) -> bool {
        matches!(self.market, Market::Shanghai | Market::Shenzhen)
    }

    /// EastMoney secid, e.g. `1.512170`.
    pub fn secid(&self) -> String {
        format!("{}.{}", self.market.secid_prefix(), self.code)
    }

    /// Sina/Tencent list code, e.g. `sh512170`.
    pub fn letter_code(&self) -> String {
        format!(
            "{}{}",
            self.market.letter_prefix(),
            self.code.to_ascii_lowercase()
        )
    }

    /// Xueqiu symbol, e.g. `SH512170`; US tickers pass through unchanged.
    pub fn xueqiu_code(&self) -> String {
        match self.market {
            Market::Us => self.code.clone(),
            _ => format!(
                "{}{}",
                self.market.letter_prefix().to_ascii_uppercase(),
                self.code
            ),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.code
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.code
    }
}
