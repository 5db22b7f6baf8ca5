use std::sync::{Arc, Mutex};

use realtime_events::BadgeCounts;
use tokio::sync::watch;

use crate::api::NotificationApi;
use crate::config::NOTIFICATIONS_ADMIN_PATH;

/// Where the user currently is, supplied explicitly by the UI layer on
/// navigation. The reconciler never reads browser state itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewContext {
    /// Route path, e.g. `/admin`.
    pub path: String,
    /// In-page tab, e.g. `#feedback`. Empty when no tab is active.
    pub hash: String,
}

impl ViewContext {
    pub fn new(path: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
        }
    }

    fn active_category(&self) -> Option<&str> {
        if self.path != NOTIFICATIONS_ADMIN_PATH {
            return None;
        }
        let category = self.hash.trim_start_matches('#');
        (!category.is_empty()).then_some(category)
    }
}

/// Consumes `badge_counts_update` events and suppresses the count for the
/// category the user is already looking at, so a stale "unread" badge never
/// shows for visible content. Suppression is presentational; a best-effort
/// mark-read request tells the server, with failures ignored.
pub struct BadgeReconciler {
    view: Mutex<ViewContext>,
    counts_tx: watch::Sender<BadgeCounts>,
    api: Arc<dyn NotificationApi>,
}

impl BadgeReconciler {
    pub fn new(api: Arc<dyn NotificationApi>) -> Self {
        let (counts_tx, _) = watch::channel(BadgeCounts::default());
        Self {
            view: Mutex::new(ViewContext::default()),
            counts_tx,
            api,
        }
    }

    pub fn set_view_context(&self, context: ViewContext) {
        *self.view.lock().expect("view context poisoned") = context;
    }

    /// Adjusted counts for badge UI.
    pub fn counts(&self) -> watch::Receiver<BadgeCounts> {
        self.counts_tx.subscribe()
    }

    pub async fn reconcile(&self, counts: &BadgeCounts) {
        match self.suppress_active_category(counts) {
            Some((adjusted, category)) => {
                tracing::debug!(category, "suppressing badge count for active view");
                self.counts_tx.send_replace(adjusted);
                if let Err(e) = self.api.mark_category_read(&category).await {
                    tracing::debug!(category, error = %e, "mark-category-read failed, ignoring");
                }
            }
            None => {
                self.counts_tx.send_replace(counts.clone());
            }
        }
    }

    fn suppress_active_category(&self, counts: &BadgeCounts) -> Option<(BadgeCounts, String)> {
        let view = self.view.lock().expect("view context poisoned").clone();
        let category = view.active_category()?;
        let count = counts.category(category);
        if count == 0 {
            return None;
        }

        let mut adjusted = counts.clone();
        adjusted.categories.insert(category.to_string(), 0);
        adjusted.total -= count;
        Some((adjusted, category.to_string()))
    }
}
