use super::{CategoryOutcome, CategorySource, CompanyTarget};
use crate::models::{CategoryData, DataCategory};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub const STUB_SOURCE: &str = "stub";

/// Last link of every chain: an empty-but-valid record, never a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct StubSource;

#[async_trait]
impl CategorySource for StubSource {
    fn name(&self) -> &str {
        STUB_SOURCE
    }

    fn supports(&self, _category: DataCategory) -> bool {
        true
    }

    async fn fetch_category(
        &self,
        category: DataCategory,
        _target: &CompanyTarget,
        _cancel: &CancellationToken,
    ) -> CategoryOutcome {
        CategoryOutcome::Found(CategoryData::empty(category))
    }
}
