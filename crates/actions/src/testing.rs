//! Test doubles shared by this crate's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use demopilot_core::protocol::BufferSink;
use demopilot_core::Result;

use crate::{ActionContext, PageHandle, RunState};

/// Page double that records navigation traffic.
#[derive(Default)]
pub struct MockPage {
    pub url: Mutex<String>,
    pub goto_calls: AtomicUsize,
    pub wait_calls: AtomicUsize,
}

#[async_trait]
impl PageHandle for MockPage {
    async fn current_url(&self) -> Result<String> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn goto(&self, url: &str) -> Result<()> {
        self.goto_calls.fetch_add(1, Ordering::SeqCst);
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn wait_until_loaded(&self) -> Result<()> {
        self.wait_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn test_context() -> (ActionContext, Arc<MockPage>, Arc<BufferSink>) {
    let page = Arc::new(MockPage::default());
    let sink = Arc::new(BufferSink::new());
    let ctx = ActionContext {
        page: page.clone(),
        sink: sink.clone(),
        state: Arc::new(RunState::new()),
    };
    (ctx, page, sink)
}
