//! Reduces a raw dataset to one row per keyword "moment".

use crate::ChatEvent;
use chrono::Duration;
use tracing::debug;

/// Keeps the first keyword row of each burst.
///
/// A keyword row starts a new burst when it is at least `window` after the
/// row that started the current one. Rows without the keyword are dropped.
pub fn clean(events: &[ChatEvent], keyword: &str, window: Duration) -> Vec<ChatEvent> {
    let keyword = keyword.to_lowercase();
    let mut indicator: Option<&ChatEvent> = None;
    let mut kept = Vec::new();

    for event in events {
        if !event.message.to_lowercase().contains(&keyword) {
            continue;
        }

        let starts_burst = match indicator {
            None => true,
            Some(current) => event.sent - current.sent >= window,
        };
        if starts_burst {
            indicator = Some(event);
            kept.push(event.clone());
        }
    }

    debug!(
        "Kept {} of {} rows for keyword '{}'",
        kept.len(),
        events.len(),
        keyword
    );
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn event(secs: u32, user: &str, message: &str) -> ChatEvent {
        ChatEvent {
            sent: NaiveDate::from_ymd_opt(2021, 6, 1)
                .unwrap()
                .and_hms_opt(14, 0, 0)
                .unwrap()
                + Duration::seconds(secs as i64),
            game_name: "Just Chatting".to_string(),
            title: "news".to_string(),
            user: user.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_burst_collapses_to_first_row() {
        let events = vec![
            event(0, "a", "das CRAZY"),
            event(5, "b", "crazy"),
            event(29, "c", "so crazy"),
            event(30, "d", "Crazy again"),
            event(45, "e", "crazy"),
            event(70, "f", "crazy"),
        ];

        let users: Vec<String> = clean(&events, "crazy", Duration::seconds(30))
            .into_iter()
            .map(|e| e.user)
            .collect();
        assert_eq!(users, vec!["a", "d", "f"]);
    }

    #[test]
    fn test_rows_without_keyword_are_dropped() {
        let events = vec![
            event(0, "a", "hello"),
            event(40, "b", "peepoHas"),
            event(100, "c", "das crazy"),
        ];

        let kept = clean(&events, "Crazy", Duration::seconds(30));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0], events[2]);
    }

    #[test]
    fn test_empty_input() {
        assert!(clean(&[], "crazy", Duration::seconds(30)).is_empty());
    }
}
