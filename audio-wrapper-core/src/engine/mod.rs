pub mod capture_engine;
pub mod delivery;
pub mod permissions;
mod session;

use std::sync::Arc;

use parking_lot::RwLock;

use crate::traits::capture_delegate::CaptureDelegate;

/// Delegate registration shared by the engine and its permission broker.
pub(crate) type DelegateSlot = Arc<RwLock<Option<Arc<dyn CaptureDelegate>>>>;
