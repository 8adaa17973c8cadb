use std::borrow::Cow;

use courier_common::status::Status;

/// A reply to one client command, possibly spanning several lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: Status,
    pub lines: Vec<Cow<'static, str>>,
    /// The session ends once this reply is written
    pub close: bool,
}

impl Reply {
    pub fn new(status: Status, line: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            lines: vec![line.into()],
            close: false,
        }
    }

    pub fn multi<I, L>(status: Status, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Cow<'static, str>>,
    {
        Self {
            status,
            lines: lines.into_iter().map(Into::into).collect(),
            close: false,
        }
    }

    #[must_use]
    pub const fn closing(mut self) -> Self {
        self.close = true;
        self
    }

    /// The wire lines, without terminators: `250-first`, ..., `250 last`
    pub fn render(&self) -> Vec<String> {
        let last = self.lines.len().saturating_sub(1);

        if self.lines.is_empty() {
            return vec![self.status.to_string()];
        }

        self.lines
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                let separator = if idx == last { ' ' } else { '-' };
                format!("{}{separator}{line}", self.status)
            })
            .collect()
    }
}
