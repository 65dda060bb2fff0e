use serde::Serialize;

use crate::sample::ChannelId;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeKind {
    LoadFailed { sample_id: String },
    ChannelUnavailable { sample_id: String, channel: ChannelId },
    SaveFailed { sample_id: String },
    Saved { sample_id: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notice {
    pub id: u64,
    #[serde(flatten)]
    pub kind: NoticeKind,
    pub message: String,
}

/// User-dismissable notices for recovered failures.
#[derive(Clone, Debug, Default)]
pub struct NoticeBoard {
    next_id: u64,
    notices: Vec<Notice>,
}

impl NoticeBoard {
    pub fn push(&mut self, kind: NoticeKind, message: impl Into<String>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.notices.push(Notice {
            id,
            kind,
            message: message.into(),
        });
        id
    }

    /// Returns false if there was no active notice with that id.
    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }

    pub fn active(&self) -> &[Notice] {
        &self.notices
    }

    pub fn clear(&mut self) {
        self.notices.clear();
    }

    pub fn count_matching(&self, predicate: impl Fn(&NoticeKind) -> bool) -> usize {
        self.notices.iter().filter(|n| predicate(&n.kind)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_dismiss() {
        let mut board = NoticeBoard::default();
        let a = board.push(
            NoticeKind::LoadFailed {
                sample_id: "s".to_string(),
            },
            "HTTP 404: Sample not found",
        );
        let b = board.push(
            NoticeKind::ChannelUnavailable {
                sample_id: "s".to_string(),
                channel: ChannelId(3),
            },
            "no data",
        );
        assert_ne!(a, b);
        assert_eq!(board.active().len(), 2);
        assert!(board.dismiss(a));
        assert!(!board.dismiss(a));
        assert_eq!(board.active()[0].id, b);
        assert_eq!(
            board.count_matching(|k| matches!(k, NoticeKind::ChannelUnavailable { .. })),
            1
        );
    }

    #[test]
    fn test_notice_serializes_flat() {
        let mut board = NoticeBoard::default();
        board.push(
            NoticeKind::SaveFailed {
                sample_id: "s".to_string(),
            },
            "HTTP 500: boom",
        );
        let value = serde_json::to_value(&board.active()[0]).unwrap();
        assert_eq!(value["kind"], "save_failed");
        assert_eq!(value["sample_id"], "s");
        assert_eq!(value["message"], "HTTP 500: boom");
    }
}
