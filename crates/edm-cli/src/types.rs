/// How a command finished, for the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// The command ran but left failed rows, pending retries or open duplicates.
    NeedsAttention,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::NeedsAttention => 2,
        }
    }
}
