/// Final result of an update attempt, reported once to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub succeeded: bool,
    /// Summary shown to the user
    pub message: String,
    /// The caller must exit so the relaunch helper can finish the swap
    pub restart_required: bool,
    /// Version that was installed, when known
    pub new_identifier: String,
}

impl UpdateOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
            restart_required: false,
            new_identifier: String::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
            restart_required: false,
            new_identifier: String::new(),
        }
    }

    pub fn restart(message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
            restart_required: true,
            new_identifier: String::new(),
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.new_identifier = identifier.into();
        self
    }
}
