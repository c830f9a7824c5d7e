use async_trait::async_trait;
use ida_store::Context;
use serde_json::Value;

use crate::error::BackendResult;
use crate::traits::KvLocker;

/// Lock returned by backends without locking. Unlocking always succeeds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NoopLock;

#[async_trait]
impl KvLocker for NoopLock {
    async fn unlock(&self, _ctx: &Context) -> BackendResult<()> {
        Ok(())
    }

    fn comparator(&self) -> Option<Value> {
        None
    }
}
