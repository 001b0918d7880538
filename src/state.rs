//! Application state management
//!
//! Wires settings, a storage backend and the collaborators into one
//! lifecycle controller shared by every caller.

use crate::collaborators::Collaborators;
use crate::config::Settings;
use crate::lifecycle::LifecycleController;
use crate::store::Store;
use std::sync::Arc;

/// Shared engine state
pub struct AppState<S: Store> {
    pub settings: Settings,

    /// Backend the controller runs its transactions on
    pub store: Arc<S>,

    pub lifecycle: LifecycleController<S>,
}

impl<S: Store> AppState<S> {
    pub fn new(settings: Settings, store: S, collaborators: Collaborators) -> Self {
        let store = Arc::new(store);
        let lifecycle = LifecycleController::new(store.clone(), &settings, collaborators);
        Self {
            settings,
            store,
            lifecycle,
        }
    }
}

/// Type alias for shared state
pub type SharedState<S> = Arc<AppState<S>>;
