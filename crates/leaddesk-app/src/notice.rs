// User-visible alert banners.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::format::clock_time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeKind {
    Success,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub message: String,
    pub at: DateTime<Local>,
}

impl Notice {
    pub fn new(kind: NoticeKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Notice {
            kind,
            title: title.into(),
            message: message.into(),
            at: Local::now(),
        }
    }

    /// A notice whose message is prefixed with the time it was raised,
    /// e.g. `9:30:00 AM - detail`.
    pub fn stamped(kind: NoticeKind, title: impl Into<String>, detail: impl AsRef<str>) -> Self {
        Self::stamped_at(kind, title, detail, Local::now())
    }

    pub fn stamped_at(
        kind: NoticeKind,
        title: impl Into<String>,
        detail: impl AsRef<str>,
        at: DateTime<Local>,
    ) -> Self {
        Notice {
            kind,
            title: title.into(),
            message: format!("{} - {}", clock_time(&at), detail.as_ref()),
            at,
        }
    }

    pub fn success(title: impl Into<String>, detail: impl AsRef<str>) -> Self {
        Self::stamped(NoticeKind::Success, title, detail)
    }

    pub fn warning(title: impl Into<String>, detail: impl AsRef<str>) -> Self {
        Self::stamped(NoticeKind::Warning, title, detail)
    }
}
