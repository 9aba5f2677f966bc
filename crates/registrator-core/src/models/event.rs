/// A lifecycle notification from the runtime's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadEvent {
    pub status: String,
    pub id: String,
}

/// What the dispatcher does in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventAction {
    Register,
    Deregister,
    /// Health transitions are reported but never touch the registry.
    HealthStatus(String),
    Ignore,
}

impl WorkloadEvent {
    pub fn new(status: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            id: id.into(),
        }
    }

    pub fn action(&self) -> EventAction {
        match self.status.as_str() {
            "start" | "unpause" => EventAction::Register,
            "die" | "pause" => EventAction::Deregister,
            status => match status.strip_prefix("health_status") {
                Some(state) => {
                    EventAction::HealthStatus(state.trim_start_matches(':').trim().to_string())
                }
                None => EventAction::Ignore,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_statuses_map_to_actions() {
        assert_eq!(WorkloadEvent::new("start", "a").action(), EventAction::Register);
        assert_eq!(WorkloadEvent::new("unpause", "a").action(), EventAction::Register);
        assert_eq!(WorkloadEvent::new("die", "a").action(), EventAction::Deregister);
        assert_eq!(WorkloadEvent::new("pause", "a").action(), EventAction::Deregister);
    }

    #[test]
    fn health_status_carries_state() {
        assert_eq!(
            WorkloadEvent::new("health_status: unhealthy", "a").action(),
            EventAction::HealthStatus("unhealthy".into())
        );
        assert_eq!(
            WorkloadEvent::new("health_status:healthy", "a").action(),
            EventAction::HealthStatus("healthy".into())
        );
    }

    #[test]
    fn other_statuses_are_ignored() {
        for status in ["create", "destroy", "exec_start: sh", "kill", "stop", ""] {
            assert_eq!(WorkloadEvent::new(status, "a").action(), EventAction::Ignore);
        }
    }
}
