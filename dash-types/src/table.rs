use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Closed set of tables the dashboard synchronizes with the hosted store.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    #[display("sales_facts")]
    SalesFacts,
    #[display("ad_spend_facts")]
    AdSpendFacts,
    #[display("service_facts")]
    ServiceFacts,
    #[display("app_config")]
    AppConfig,
    #[display("products")]
    Products,
}

/// What to put into an empty natural-key field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyDefault {
    Sentinel(&'static str),
    /// Fresh UUID v4, for dimension tables that key rows by a generated identifier.
    Generated,
}

pub const UNKNOWN_PRODUCT: &str = "unknown";
pub const DEFAULT_ACCOUNT: &str = "default";
pub const UNASSIGNED_AGENT: &str = "unassigned";

impl Table {
    pub const ALL: [Table; 5] = [
        Table::SalesFacts,
        Table::AdSpendFacts,
        Table::ServiceFacts,
        Table::AppConfig,
        Table::Products,
    ];

    pub fn conflict_key(&self) -> ConflictKey {
        match self {
            Self::SalesFacts => ConflictKey(&["date", "product_id"]),
            Self::AdSpendFacts => ConflictKey(&["date", "account", "tracked_product_id"]),
            Self::ServiceFacts => ConflictKey(&["date", "agent_account"]),
            Self::AppConfig => ConflictKey(&["key"]),
            Self::Products => ConflictKey(&["id"]),
        }
    }

    /// Fact tables regenerate their surrogate ids server-side.
    pub fn is_append_only(&self) -> bool {
        matches!(
            self,
            Self::SalesFacts | Self::AdSpendFacts | Self::ServiceFacts
        )
    }

    /// Total row order for a range read over `field`: the field itself, then the
    /// conflict key fields as tiebreak.
    pub fn sort_fields<'a>(&self, field: &'a str) -> Vec<&'a str> {
        std::iter::once(field)
            .chain(self.conflict_key().fields().iter().copied().filter(|f| *f != field))
            .collect()
    }

    pub fn date_fields(&self) -> &'static [&'static str] {
        if self.is_append_only() {
            &["date"]
        } else {
            &[]
        }
    }

    /// `None` means the field is required and has no fallback.
    pub fn key_default(&self, field: &str) -> Option<KeyDefault> {
        match (self, field) {
            (Self::SalesFacts, "product_id") => Some(KeyDefault::Sentinel(UNKNOWN_PRODUCT)),
            (Self::AdSpendFacts, "account") => Some(KeyDefault::Sentinel(DEFAULT_ACCOUNT)),
            (Self::AdSpendFacts, "tracked_product_id") => {
                Some(KeyDefault::Sentinel(UNKNOWN_PRODUCT))
            }
            (Self::ServiceFacts, "agent_account") => Some(KeyDefault::Sentinel(UNASSIGNED_AGENT)),
            (Self::Products, "id") => Some(KeyDefault::Generated),
            _ => None,
        }
    }
}

impl FromStr for Table {
    type Err = UnknownTable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|t| t.to_string() == s.trim())
            .ok_or_else(|| UnknownTable(s.to_string()))
    }
}

#[derive(Debug, Display, Error)]
#[display("Unknown table {_0}")]
pub struct UnknownTable(#[error(ignore)] pub String);

/// Ordered field list the store uses to decide insert versus update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConflictKey(&'static [&'static str]);

impl ConflictKey {
    pub fn fields(&self) -> &'static [&'static str] {
        self.0
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(&field)
    }
}

impl std::fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: String = itertools::intersperse(self.0.iter().copied(), ",").collect();
        f.write_str(&joined)
    }
}
