use rusqlite::Connection;

use arbor_core::events::{EventKind, MarkPayload};
use arbor_core::replay::ReplayRange;
use arbor_store::{events, EventRow};

use crate::error::EngineError;
use crate::marks::{Mark, MarkStack};

/// Events visible to one agent, in play-forward order, plus the marks
/// collected on the way.
#[derive(Clone, Debug, Default)]
pub struct ReplayContext {
    pub events: Vec<EventRow>,
    pub marks: MarkStack,
}

/// Load every range in order and collect marks.
pub fn execute(conn: &Connection, ranges: &[ReplayRange]) -> Result<ReplayContext, EngineError> {
    let mut ctx = ReplayContext::default();
    for range in ranges {
        for event in events::query_range(conn, range)? {
            match event.kind {
                EventKind::Mark => ctx.marks.push(Mark {
                    event_id: event.id,
                    label: MarkPayload::from_data(event.data.as_ref()).label,
                }),
                EventKind::Rewind => {
                    let label = MarkPayload::from_data(event.data.as_ref()).label;
                    let _ = ctx.marks.rewind(label.as_deref());
                }
                _ => {}
            }
            ctx.events.push(event);
        }
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use arbor_core::ids::AgentId;
    use arbor_store::Database;
    use serde_json::json;

    use super::*;

    #[test]
    fn ranges_are_concatenated_in_order() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|c| {
            let a = AgentId::new();
            let b = AgentId::new();
            let a1 = events::append(c, &a, EventKind::User, Some("a1"), None)?.id;
            events::append(c, &b, EventKind::User, Some("b1"), None)?;
            events::append(c, &a, EventKind::User, Some("a2"), None)?;

            let ranges = vec![ReplayRange::new(a, 0, a1), ReplayRange::new(b, 0, 0)];
            let ctx = execute(c, &ranges).unwrap();
            let texts: Vec<_> = ctx.events.iter().filter_map(|e| e.content.as_deref()).collect();
            assert_eq!(texts, vec!["a1", "b1"]);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn marks_and_rewinds_build_the_stack() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|c| {
            let a = AgentId::new();
            let label = |l: &str| json!({ "label": l });
            let base = events::append(c, &a, EventKind::Mark, None, Some(&label("base")))?.id;
            events::append(c, &a, EventKind::Mark, None, Some(&label("try")))?;
            events::append(c, &a, EventKind::Rewind, None, Some(&label("base")))?;
            events::append(c, &a, EventKind::Mark, None, Some(&json!({ "label": null })))?;

            let ctx = execute(c, &[ReplayRange::new(a, 0, 0)]).unwrap();
            assert_eq!(ctx.events.len(), 4);
            let marks: Vec<_> = ctx.marks.iter().map(|m| m.event_id).collect();
            assert_eq!(marks.len(), 2);
            assert_eq!(marks[0], base);
            assert_eq!(ctx.marks.top().unwrap().label, None);
            Ok(())
        })
        .unwrap();
    }
}
