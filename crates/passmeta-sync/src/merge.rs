//! Three-way merge of section lists keyed by section id.
//!
//! A section unchanged on one side relative to the base yields to the side
//! that changed it. Sections changed differently on both sides, or edited on
//! one side and deleted on the other, become conflicts: both candidates are
//! reported and nothing is placed in the result for that id until the caller
//! resolves it. Without a base every difference is a conflict.

use std::collections::{HashMap, HashSet};

use passmeta_db::Section;

/// A section id whose local and remote versions both diverged from the base.
///
/// `None` means the section is absent on that side (deleted or never there).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub section_id: String,
    pub base: Option<Section>,
    pub local: Option<Section>,
    pub remote: Option<Section>,
}

#[derive(Debug, Clone)]
pub enum ConflictChoice {
    Local,
    Remote,
    /// A hand-merged section; its id is forced to the conflicting id.
    Custom(Section),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub result_sections: Vec<Section>,
    pub conflicts: Vec<Conflict>,
    /// Ids of every merged position, conflicting ones included.
    pub order: Vec<String>,
}

impl MergeResult {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Settle the conflict for `section_id`. Returns `false` if there is none.
    ///
    /// The chosen section takes the conflict's place in the merged order;
    /// choosing an absent side drops the section.
    pub fn resolve(&mut self, section_id: &str, choice: ConflictChoice) -> bool {
        let Some(pos) = self.conflicts.iter().position(|c| c.section_id == section_id) else {
            return false;
        };
        let conflict = self.conflicts.remove(pos);
        let chosen = match choice {
            ConflictChoice::Local => conflict.local,
            ConflictChoice::Remote => conflict.remote,
            ConflictChoice::Custom(mut section) => {
                section.id = conflict.section_id.clone();
                Some(section)
            }
        };

        if let Some(section) = chosen {
            let rank: HashMap<&str, usize> = self
                .order
                .iter()
                .enumerate()
                .map(|(i, id)| (id.as_str(), i))
                .collect();
            let target = rank.get(section_id).copied().unwrap_or(usize::MAX);
            let insert_at = self
                .result_sections
                .iter()
                .position(|s| rank.get(s.id.as_str()).copied().unwrap_or(usize::MAX) > target)
                .unwrap_or(self.result_sections.len());
            self.result_sections.insert(insert_at, section);
        }
        true
    }
}

enum Outcome {
    Keep(Section),
    Drop,
    Conflict,
}

fn decide(base: Option<&Section>, local: Option<&Section>, remote: Option<&Section>) -> Outcome {
    match (local, remote) {
        (None, None) => Outcome::Drop,
        (Some(l), Some(r)) if l == r => Outcome::Keep(l.clone()),
        (Some(l), Some(r)) => match base {
            Some(b) if b == l => Outcome::Keep(r.clone()),
            Some(b) if b == r => Outcome::Keep(l.clone()),
            _ => Outcome::Conflict,
        },
        // Only one side has it: an addition, or a deletion on the other side.
        (Some(only), None) | (None, Some(only)) => match base {
            None => Outcome::Keep(only.clone()),
            Some(b) if b == only => Outcome::Drop,
            Some(_) => Outcome::Conflict,
        },
    }
}

/// Merge local and remote section lists against their common base.
///
/// Result order: local order first, then remote-only sections in remote order.
pub fn merge(base: Option<&[Section]>, local: &[Section], remote: &[Section]) -> MergeResult {
    let base_by_id: HashMap<&str, &Section> = base
        .unwrap_or_default()
        .iter()
        .map(|s| (s.id.as_str(), s))
        .collect();
    let local_by_id: HashMap<&str, &Section> = local.iter().map(|s| (s.id.as_str(), s)).collect();
    let remote_by_id: HashMap<&str, &Section> = remote.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut seen = HashSet::new();
    let ids: Vec<&str> = local
        .iter()
        .chain(remote.iter())
        .map(|s| s.id.as_str())
        .filter(|id| seen.insert(*id))
        .collect();

    let mut result = MergeResult::default();
    for id in ids {
        let b = base_by_id.get(id).copied();
        let l = local_by_id.get(id).copied();
        let r = remote_by_id.get(id).copied();
        match decide(b, l, r) {
            Outcome::Keep(section) => {
                result.order.push(id.to_string());
                result.result_sections.push(section);
            }
            Outcome::Drop => {}
            Outcome::Conflict => {
                result.order.push(id.to_string());
                result.conflicts.push(Conflict {
                    section_id: id.to_string(),
                    base: b.cloned(),
                    local: l.cloned(),
                    remote: r.cloned(),
                });
            }
        }
    }

    tracing::debug!(
        "Merged {} sections, {} conflicts",
        result.result_sections.len(),
        result.conflicts.len()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use passmeta_db::SectionItem;

    fn s(id: &str, name: &str) -> Section {
        Section::with_id(id, name, vec![])
    }

    fn s_item(id: &str, name: &str, value: &str) -> Section {
        Section::with_id(id, name, vec![SectionItem::new("password", value)])
    }

    fn ids(sections: &[Section]) -> Vec<&str> {
        sections.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn local_addition_is_kept() {
        let base = vec![s("1", "a")];
        let local = vec![s("1", "a"), s("2", "new")];
        let remote = vec![s("1", "a")];
        let result = merge(Some(&base[..]), &local, &remote);
        assert_eq!(result.result_sections, vec![s("1", "a"), s("2", "new")]);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn unchanged_side_yields_to_changed_side() {
        let base = vec![s_item("1", "Mail", "old"), s_item("2", "Bank", "old")];
        let local = vec![s_item("1", "Mail", "new-local"), s_item("2", "Bank", "old")];
        let remote = vec![s_item("1", "Mail", "old"), s_item("2", "Bank", "new-remote")];
        let result = merge(Some(&base[..]), &local, &remote);
        assert!(!result.has_conflicts());
        assert_eq!(
            result.result_sections,
            vec![s_item("1", "Mail", "new-local"), s_item("2", "Bank", "new-remote")]
        );
    }

    #[test]
    fn both_changed_is_single_conflict_without_union() {
        let base = vec![s_item("1", "Mail", "old")];
        let local = vec![s_item("1", "Mail", "L")];
        let remote = vec![s_item("1", "Mail", "R")];
        let result = merge(Some(&base[..]), &local, &remote);
        assert_eq!(result.conflicts.len(), 1);
        assert!(result.result_sections.is_empty());
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.section_id, "1");
        assert_eq!(conflict.local, Some(s_item("1", "Mail", "L")));
        assert_eq!(conflict.remote, Some(s_item("1", "Mail", "R")));
    }

    #[test]
    fn deletion_against_unchanged_is_applied() {
        let base = vec![s("1", "a"), s("2", "b")];
        let local = vec![s("2", "b")];
        let remote = vec![s("1", "a")];
        let result = merge(Some(&base[..]), &local, &remote);
        assert!(result.result_sections.is_empty());
        assert!(!result.has_conflicts());
    }

    #[test]
    fn edit_versus_delete_conflicts() {
        let base = vec![s_item("1", "Mail", "old")];
        let local: Vec<Section> = vec![];
        let remote = vec![s_item("1", "Mail", "edited")];
        let result = merge(Some(&base[..]), &local, &remote);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].local, None);

        let result = merge(Some(&base[..]), &remote, &local);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].remote, None);
    }

    #[test]
    fn deleted_on_both_sides_stays_deleted() {
        let base = vec![s("1", "a")];
        let result = merge(Some(&base[..]), &[], &[]);
        assert!(result.result_sections.is_empty());
        assert!(result.order.is_empty());
    }

    #[test]
    fn without_base_differences_conflict() {
        let local = vec![s("1", "a"), s("2", "only-local")];
        let remote = vec![s("1", "b"), s("3", "only-remote")];
        let result = merge(None, &local, &remote);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(ids(&result.result_sections), vec!["2", "3"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let sections = vec![s("1", "a"), s_item("2", "b", "x")];
        let result = merge(Some(&sections[..]), &sections, &sections);
        assert_eq!(result.result_sections, sections);
        assert!(!result.has_conflicts());
    }

    #[test]
    fn order_is_local_then_remote_additions() {
        let base = vec![s("1", "a")];
        let local = vec![s("2", "l"), s("1", "a")];
        let remote = vec![s("3", "r1"), s("1", "a"), s("4", "r2")];
        let result = merge(Some(&base[..]), &local, &remote);
        assert_eq!(ids(&result.result_sections), vec!["2", "1", "3", "4"]);
    }

    #[test]
    fn resolution_keeps_conflict_position() {
        let base = vec![s("1", "a"), s_item("2", "b", "old"), s("3", "c")];
        let local = vec![s("1", "a"), s_item("2", "b", "L"), s("3", "c")];
        let remote = vec![s("1", "a"), s_item("2", "b", "R"), s("3", "c")];
        let mut result = merge(Some(&base[..]), &local, &remote);
        assert_eq!(ids(&result.result_sections), vec!["1", "3"]);

        assert!(result.resolve("2", ConflictChoice::Remote));
        assert!(!result.has_conflicts());
        assert_eq!(ids(&result.result_sections), vec!["1", "2", "3"]);
        assert_eq!(result.result_sections[1], s_item("2", "b", "R"));
        assert!(!result.resolve("2", ConflictChoice::Local));
    }

    #[test]
    fn custom_resolution_takes_conflict_id() {
        let base = vec![s_item("1", "Mail", "old")];
        let mut result = merge(
            Some(&base[..]),
            &[s_item("1", "Mail", "L")],
            &[s_item("1", "Mail", "R")],
        );
        assert!(result.resolve("1", ConflictChoice::Custom(s_item("other", "Mail", "LR"))));
        assert_eq!(result.result_sections, vec![s_item("1", "Mail", "LR")]);
    }

    #[test]
    fn choosing_deleted_side_drops_section() {
        let base = vec![s_item("1", "Mail", "old")];
        let mut result = merge(Some(&base[..]), &[], &[s_item("1", "Mail", "edited")]);
        assert!(result.resolve("1", ConflictChoice::Local));
        assert!(result.result_sections.is_empty());
    }
}
