use enumset::{EnumSet, EnumSetType};
use itertools::Itertools;
use strum_macros::{AsRefStr, EnumString};

use crate::error::{ExtStatError, ExtStatResult};

/// Kind of extended statistic.
#[derive(EnumSetType, Debug, Hash, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StatKind {
    Ndistinct,
    Dependencies,
    Mcv,
    /// Per-expression statistics. Recognized in stored definitions, never generated here.
    Expressions,
}

pub type StatKinds = EnumSet<StatKind>;

impl StatKind {
    /// Kinds this crate is allowed to request on its own.
    pub fn generated() -> StatKinds {
        StatKind::Ndistinct | StatKind::Dependencies | StatKind::Mcv
    }

    /// Kinds made redundant on a narrower definition by a broader one.
    pub fn dimension_insensitive() -> StatKinds {
        StatKind::Ndistinct | StatKind::Dependencies
    }

    /// Character code used by the catalog's kind array.
    pub fn catalog_code(self) -> char {
        match self {
            StatKind::Ndistinct => 'd',
            StatKind::Dependencies => 'f',
            StatKind::Mcv => 'm',
            StatKind::Expressions => 'e',
        }
    }

    pub fn from_catalog_code(code: char) -> Option<StatKind> {
        match code {
            'd' => Some(StatKind::Ndistinct),
            'f' => Some(StatKind::Dependencies),
            'm' => Some(StatKind::Mcv),
            'e' => Some(StatKind::Expressions),
            _ => None,
        }
    }
}

/// Decodes the catalog's kind array. Unknown codes mean a catalog we don't understand.
pub fn kinds_from_catalog_codes<I>(codes: I) -> ExtStatResult<StatKinds>
where
    I: IntoIterator<Item = char>,
{
    codes
        .into_iter()
        .map(|code| {
            StatKind::from_catalog_code(code).ok_or_else(|| {
                ExtStatError::InvalidDefinition(format!("unknown statistics kind code {:?}", code))
            })
        })
        .collect()
}

/// Renders kinds as the comma-separated option vocabulary, in declaration order.
pub fn format_kinds(kinds: StatKinds) -> String {
    kinds.iter().map(|kind| kind.as_ref().to_string()).join(", ")
}
