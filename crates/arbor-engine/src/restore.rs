//! Startup: rebuild the live tree from the registry and the event log.

use tracing::{info, instrument, warn};

use arbor_core::events::EventKind;
use arbor_core::ids::AgentId;

use crate::agent::Agent;
use crate::error::EngineError;
use crate::lifecycle::AgentManager;
use crate::replay::replay_agent;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// The root had no history; its stream was initialised.
    pub fresh_install: bool,
    /// Pre-registry events adopted by the root.
    pub adopted_events: usize,
    /// Non-root agents rebuilt, in restoration order.
    pub restored: Vec<AgentId>,
    /// Agents that could not be rebuilt, with the reason.
    pub failed: Vec<(AgentId, String)>,
}

impl AgentManager {
    /// Replay the root and every running agent into the tree. An agent that
    /// fails to replay is logged and left out; the rest still load.
    #[instrument(skip(self))]
    pub fn restore(&self) -> Result<RestoreReport, EngineError> {
        let root_id = self.root_id();
        let mut report = RestoreReport {
            adopted_events: self.adopted_events,
            ..RestoreReport::default()
        };

        if self.events.count(&root_id)? == 0 {
            report.fresh_install = true;
            let _ = self.events.append(&root_id, EventKind::Clear, None, None)?;
            if let Some(prompt) = self.config.system_prompt.as_deref() {
                let event = self.events.append(&root_id, EventKind::System, Some(prompt), None)?;
                self.show(&root_id, &event);
            }
        } else {
            let summary = {
                let mut tree = self.tree.lock();
                self.db.with_conn(|conn| Ok(replay_agent(conn, tree.root_mut())))??
            };
            if summary.model_changed {
                self.gateway.invalidate(&root_id);
            }
            self.echo_scrollback(&root_id);
        }

        for row in self.agents.list_running()? {
            if row.is_root() || self.tree.lock().contains(&row.uuid) {
                continue;
            }
            let mut agent = Agent::from_row(&row, self.config.default_selection.clone());
            match self.db.with_conn(|conn| Ok(replay_agent(conn, &mut agent)))? {
                Ok(summary) => {
                    self.tree.lock().push(agent);
                    if summary.model_changed {
                        self.gateway.invalidate(&row.uuid);
                    }
                    self.echo_scrollback(&row.uuid);
                    report.restored.push(row.uuid);
                }
                Err(e) => {
                    warn!(agent_uuid = %row.uuid, error = %e, kind = e.kind(), "skipping agent that failed to restore");
                    report.failed.push((row.uuid, e.to_string()));
                }
            }
        }

        info!(
            fresh_install = report.fresh_install,
            adopted = report.adopted_events,
            restored = report.restored.len(),
            failed = report.failed.len(),
            "agent tree restored"
        );
        self.render();
        Ok(report)
    }

    fn echo_scrollback(&self, agent: &AgentId) {
        let lines = self
            .tree
            .lock()
            .get(agent)
            .map(|a| a.scrollback.clone())
            .unwrap_or_default();
        for line in &lines {
            self.renderer.append_display_line(agent, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use arbor_core::messages::Role;
    use arbor_store::{agents, events, AgentRow, Database};

    use super::*;
    use crate::test_support::{harness, harness_on, restart};

    #[test]
    fn fresh_install_writes_clear_and_system_prompt() {
        let h = harness_on(Database::in_memory().unwrap(), Some("be helpful"));
        let report = h.manager.restore().unwrap();
        assert!(report.fresh_install);

        let root = h.manager.root_id();
        let kinds: Vec<_> = h
            .manager
            .events
            .query_range(&arbor_core::replay::ReplayRange::new(root.clone(), 0, 0))
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![EventKind::Clear, EventKind::System]);

        let tree = h.manager.tree();
        assert!(tree.root().conversation.is_empty());
        assert_eq!(tree.root().scrollback, vec!["[system] be helpful"]);
        drop(tree);
        assert_eq!(h.renderer.lines_for(&root), vec!["[system] be helpful"]);
    }

    #[test]
    fn second_start_replays_root() {
        let h = harness_on(Database::in_memory().unwrap(), Some("be helpful"));
        h.manager.restore().unwrap();

        let h2 = harness_on(h.db.clone(), Some("be helpful"));
        let report = h2.manager.restore().unwrap();
        assert!(!report.fresh_install);
        let tree = h2.manager.tree();
        let roles: Vec<_> = tree.root().conversation.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System]);
    }

    #[test]
    fn orphan_events_are_adopted_by_the_root() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (agent_uuid, kind, content, created_at)
                 VALUES (NULL, 'user', 'from before agents existed', 1)",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let h = harness_on(db, None);
        let report = h.manager.restore().unwrap();
        assert_eq!(report.adopted_events, 1);
        assert!(!report.fresh_install);
        let tree = h.manager.tree();
        assert_eq!(tree.root().conversation[0].text, "from before agents existed");
    }

    #[tokio::test]
    async fn out_of_order_created_at_still_restores() {
        let h = harness();
        let root = h.manager.root_id();
        h.manager.send_user_message("r1").await.unwrap();
        let a = h.manager.fork(&root, None).await.unwrap();
        h.manager.send_user_message("a1").await.unwrap();
        let b = h.manager.fork(&a, None).await.unwrap();

        // Child clocks running behind their parents.
        h.db.with_conn(|conn| {
            conn.execute("UPDATE agents SET created_at = 100 WHERE uuid = ?1", [b.as_str()])?;
            conn.execute("UPDATE agents SET created_at = 200 WHERE uuid = ?1", [a.as_str()])?;
            Ok(())
        })
        .unwrap();

        let h2 = restart(&h);
        let report_order: Vec<_> = h2.manager.tree().iter().map(|x| x.uuid.clone()).collect();
        assert_eq!(report_order, vec![root.clone(), b.clone(), a.clone()]);
        let tree = h2.manager.tree();
        let texts: Vec<_> = tree.get(&b).unwrap().conversation.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["r1", "a1"]);
        assert_eq!(tree.depth(&b), 2);
    }

    #[test]
    fn broken_agent_is_skipped_not_fatal() {
        let h = harness();
        let root = h.manager.root_id();
        let good = AgentRow::new_child(&root, 0);
        let cyclic_a = AgentRow {
            uuid: AgentId::from_raw("cycle-a"),
            ..AgentRow::new_child(&AgentId::from_raw("cycle-b"), 7)
        };
        let cyclic_b = AgentRow {
            uuid: AgentId::from_raw("cycle-b"),
            ..AgentRow::new_child(&AgentId::from_raw("cycle-a"), 7)
        };
        h.db.with_conn(|conn| {
            agents::insert(conn, &good)?;
            agents::insert(conn, &cyclic_a)?;
            agents::insert(conn, &cyclic_b)?;
            events::append(conn, &good.uuid, EventKind::User, Some("fine"), None)?;
            Ok(())
        })
        .unwrap();

        let h2 = harness_on(h.db.clone(), None);
        let report = h2.manager.restore().unwrap();
        assert_eq!(report.restored, vec![good.uuid.clone()]);
        assert_eq!(report.failed.len(), 2);
        assert!(h2.manager.tree().contains(&good.uuid));
        assert_eq!(h2.manager.tree().len(), 2);
    }
}
