use super::*;
use crate::error::ConnectionErrorKind;
use crate::manager::test_helpers::*;
use crate::parameters::Parameters;
use crate::persistence::PersistenceInfo;
use crate::transport::{TransferMode, TransportOutcome};
use crate::types::{Method, State};
use std::sync::Arc;
use std::time::Duration;

mod download;
mod shutdown;

/// Poll `check` until it holds or a second passes
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
