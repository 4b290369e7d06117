//! Registry of open chat pages, counted for `/health`.
//!
//! There is no connection limit: every page that completes the WebSocket
//! upgrade is registered.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// One open chat page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPage {
    pub id: Uuid,
    pub opened_at: DateTime<Utc>,
    pub submissions: u64,
}

#[derive(Debug, Default)]
pub struct PageRegistry {
    pages: HashMap<Uuid, OpenPage>,
    /// Submissions since startup, closed pages included.
    submissions: u64,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.pages.insert(
            id,
            OpenPage {
                id,
                opened_at: Utc::now(),
                submissions: 0,
            },
        );
        id
    }

    /// Forget a page, handing back what was recorded for it.
    pub fn close(&mut self, id: &Uuid) -> Option<OpenPage> {
        self.pages.remove(id)
    }

    pub fn count_submission(&mut self, id: &Uuid) {
        if let Some(page) = self.pages.get_mut(id) {
            page.submissions += 1;
            self.submissions += 1;
        }
    }

    pub fn open_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }
}
