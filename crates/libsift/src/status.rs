//! Store status vocabulary → what the client should do with it.

/// Classification of a snapshot's raw `status` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl Observed {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Observed::Completed | Observed::Failed | Observed::Cancelled
        )
    }
}

/// Unknown values count as in progress; the client fails open.
pub fn observe(raw: &str) -> Observed {
    match raw {
        "queued" | "pending" => Observed::Pending,
        "completed" => Observed::Completed,
        "failed" => Observed::Failed,
        "cancelled" => Observed::Cancelled,
        // running | planning | researching | writing | anything new
        _ => Observed::Active,
    }
}
