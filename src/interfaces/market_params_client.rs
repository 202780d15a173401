use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::Result;
use crate::types::market::MarketParam;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Key returned by the previous page, `None` for the first page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketParamsPage {
    pub market_params: Vec<MarketParam>,
    /// Absent or empty on the last page.
    #[serde(default)]
    pub next_key: Option<String>,
}

impl MarketParamsPage {
    pub fn next_page(&self) -> Option<&str> {
        self.next_key.as_deref().filter(|key| !key.is_empty())
    }
}

/// Read-only access to the authoritative market params.
#[async_trait]
pub trait MarketParamsQueryClient: Send + Sync {
    async fn all_market_params(&self, request: PageRequest) -> Result<MarketParamsPage>;
}
