use uuid::Uuid;

/// Engine state machine.
///
/// ```text
/// idle ──start_capture──▶ active
///  ▲                        │
///  └──stop_capture / failure┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Active { session_id: Uuid },
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            Self::Active { session_id } => Some(*session_id),
            Self::Idle => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active { .. } => "active",
        }
    }
}

