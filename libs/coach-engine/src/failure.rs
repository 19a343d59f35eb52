use coach_common::types::TimeoutKind;

/// What the explanation stages get to see about a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureReport<'a> {
    pub raw_error: &'a str,
    pub timeout_kind: TimeoutKind,
}

impl<'a> FailureReport<'a> {
    pub fn new(raw_error: &'a str, timeout_kind: TimeoutKind) -> Self {
        Self { raw_error, timeout_kind }
    }

    pub fn runtime(raw_error: &'a str) -> Self {
        Self::new(raw_error, TimeoutKind::None)
    }
}
