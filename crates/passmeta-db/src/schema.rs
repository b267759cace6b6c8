//! Schema definitions for passfiles and their decrypted sections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Passfile identifier. Negative values are local-only (never synced).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassFileId(pub i64);

impl PassFileId {
    pub fn is_local(self) -> bool {
        self.0 < 0
    }

    /// Next free local id given the ids already in use.
    pub fn next_local<I: IntoIterator<Item = PassFileId>>(existing: I) -> Self {
        let min = existing.into_iter().map(|id| id.0).min().unwrap_or(0).min(0);
        Self(min - 1)
    }
}

impl std::fmt::Display for PassFileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PassFileId {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Local provenance of a passfile relative to the remote copy.
///
/// Never sent to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocalState {
    Synced,
    Created,
    Changed { merged: bool },
    Deleted { was_changed: bool },
}

impl LocalState {
    pub fn is_deleted(self) -> bool {
        matches!(self, Self::Deleted { .. })
    }
}

impl std::fmt::Display for LocalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synced => write!(f, "synced"),
            Self::Created => write!(f, "created"),
            Self::Changed { merged: false } => write!(f, "changed"),
            Self::Changed { merged: true } => write!(f, "changed (merged)"),
            Self::Deleted { .. } => write!(f, "deleted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    NeedsMerge,
    Conflict,
    DeletedOnOneSide,
    DecryptFailed,
}

impl std::fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NeedsMerge => write!(f, "needs merge"),
            Self::Conflict => write!(f, "conflict"),
            Self::DeletedOnOneSide => write!(f, "deleted on the other side"),
            Self::DecryptFailed => write!(f, "decryption failed"),
        }
    }
}

/// Sync problem attached to a passfile until the next successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub kind: ProblemKind,
    pub detail: Option<String>,
}

impl Problem {
    pub fn new(kind: ProblemKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: ProblemKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Rejected state transition, e.g. editing a deleted passfile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("passfile {id} is {state}, cannot {action}")]
pub struct IllegalTransition {
    pub id: PassFileId,
    pub state: LocalState,
    pub action: &'static str,
}

/// A named, versioned container of encrypted sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassFile {
    pub id: PassFileId,
    pub name: String,
    pub color: Option<String>,
    pub version: u32,
    pub remote_version: Option<u32>,
    #[serde(with = "b64")]
    pub data_encrypted: Vec<u8>,
    /// Content as last synced with the remote; the merge base.
    #[serde(default, with = "b64_opt")]
    pub origin_encrypted: Option<Vec<u8>>,
    #[serde(skip)]
    pub sections: Option<Vec<Section>>,
    pub state: LocalState,
    #[serde(default)]
    pub problem: Option<Problem>,
    pub created_on: DateTime<Utc>,
    pub info_changed_on: DateTime<Utc>,
    pub version_changed_on: DateTime<Utc>,
}

impl PassFile {
    /// A passfile created on this device and not yet pushed.
    pub fn new_local(
        id: PassFileId,
        name: String,
        color: Option<String>,
        data_encrypted: Vec<u8>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            color,
            version: 1,
            remote_version: None,
            data_encrypted,
            origin_encrypted: None,
            sections: None,
            state: LocalState::Created,
            problem: None,
            created_on: now,
            info_changed_on: now,
            version_changed_on: now,
        }
    }

    /// Copy with the decrypted sections stripped; the only form that is persisted.
    pub fn without_secrets(&self) -> Self {
        Self {
            sections: None,
            ..self.clone()
        }
    }

    pub fn is_decrypted(&self) -> bool {
        self.sections.is_some()
    }

    fn ensure_editable(&self, action: &'static str) -> Result<(), IllegalTransition> {
        if self.state.is_deleted() {
            return Err(IllegalTransition {
                id: self.id,
                state: self.state,
                action,
            });
        }
        Ok(())
    }

    fn mark_changed(&mut self) {
        if self.state == LocalState::Synced {
            self.state = LocalState::Changed { merged: false };
        }
    }

    /// Record new sealed content: bumps the version and marks the passfile changed.
    pub fn record_content_change(
        &mut self,
        data_encrypted: Vec<u8>,
    ) -> Result<(), IllegalTransition> {
        self.ensure_editable("change content")?;
        self.data_encrypted = data_encrypted;
        self.version += 1;
        self.version_changed_on = Utc::now();
        self.mark_changed();
        Ok(())
    }

    pub fn record_info_change(
        &mut self,
        name: String,
        color: Option<String>,
    ) -> Result<(), IllegalTransition> {
        self.ensure_editable("change info")?;
        self.name = name;
        self.color = color;
        self.info_changed_on = Utc::now();
        self.mark_changed();
        Ok(())
    }

    pub fn mark_deleted(&mut self) -> Result<(), IllegalTransition> {
        self.ensure_editable("delete")?;
        self.state = LocalState::Deleted {
            was_changed: !matches!(self.state, LocalState::Synced),
        };
        Ok(())
    }

    pub fn restore(&mut self) -> Result<(), IllegalTransition> {
        match self.state {
            LocalState::Deleted { was_changed: true } => {
                self.state = LocalState::Changed { merged: false };
                Ok(())
            }
            LocalState::Deleted { was_changed: false } => {
                self.state = LocalState::Synced;
                Ok(())
            }
            state => Err(IllegalTransition {
                id: self.id,
                state,
                action: "restore",
            }),
        }
    }

    /// Drop local changes and return to the last synced content.
    pub fn rollback(&mut self) -> Result<(), IllegalTransition> {
        let (Some(origin), Some(remote_version)) =
            (self.origin_encrypted.clone(), self.remote_version)
        else {
            return Err(IllegalTransition {
                id: self.id,
                state: self.state,
                action: "roll back",
            });
        };
        self.data_encrypted = origin;
        self.version = remote_version;
        self.version_changed_on = Utc::now();
        self.sections = None;
        self.state = LocalState::Synced;
        self.problem = None;
        Ok(())
    }

    /// The remote accepted `version` of the current content.
    pub fn mark_synced(&mut self, version: u32) {
        self.version = version;
        self.remote_version = Some(version);
        self.origin_encrypted = Some(self.data_encrypted.clone());
        self.state = LocalState::Synced;
        self.problem = None;
    }

    /// Local content was merged against remote `remote_version` whose sealed
    /// content becomes the new merge base.
    pub fn mark_merged(&mut self, data_encrypted: Vec<u8>, remote_version: u32, base: Vec<u8>) {
        self.data_encrypted = data_encrypted;
        self.remote_version = Some(remote_version);
        self.version = self.version.max(remote_version) + 1;
        self.version_changed_on = Utc::now();
        self.origin_encrypted = Some(base);
        self.state = LocalState::Changed { merged: true };
        self.problem = None;
    }

    /// Human readable state description, one line per fact.
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match self.state {
            LocalState::Synced => {}
            LocalState::Created => lines.push("Created locally, not yet synced".to_string()),
            LocalState::Changed { merged } => {
                lines.push("Changed locally, not yet synced".to_string());
                if merged {
                    lines.push("Merged with remote changes".to_string());
                }
            }
            LocalState::Deleted { .. } => lines.push("Deleted locally, not yet synced".to_string()),
        }
        if let Some(problem) = &self.problem {
            lines.push(format!("Problem: {problem}"));
        }
        if lines.is_empty() {
            lines.push("OK".to_string());
        }
        lines
    }
}

/// One key/value secret inside a section.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SectionItem {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub comment: String,
}

impl SectionItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            comment: String::new(),
        }
    }
}

/// Edit-time mark of a section. Not persisted and ignored by equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SectionMark {
    #[default]
    None,
    Created,
}

/// Named group of secret items, the decrypted unit of a passfile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub items: Vec<SectionItem>,
    #[serde(skip)]
    pub mark: SectionMark,
}

impl Section {
    /// A fresh section with a random id, marked as created.
    pub fn new(name: impl Into<String>, items: Vec<SectionItem>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            items,
            mark: SectionMark::Created,
        }
    }

    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        items: Vec<SectionItem>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            items,
            mark: SectionMark::None,
        }
    }

    pub fn differs_from(&self, other: &Section) -> bool {
        self != other
    }
}

impl PartialEq for Section {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name && self.items == other.items
    }
}

impl Eq for Section {}

/// Base64 serde adapter for byte fields, shared with the remote wire types.
pub mod b64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => super::b64::serialize(bytes, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapped(#[serde(with = "super::b64")] Vec<u8>);

        Option::<Wrapped>::deserialize(d).map(|opt| opt.map(|w| w.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synced_file() -> PassFile {
        let mut pf = PassFile::new_local(PassFileId(-1), "Mail".into(), None, vec![1, 2, 3]);
        pf.id = PassFileId(10);
        pf.mark_synced(3);
        pf
    }

    #[test]
    fn next_local_id_goes_below_existing() {
        assert_eq!(PassFileId::next_local(Vec::new()), PassFileId(-1));
        assert_eq!(PassFileId::next_local([PassFileId(5), PassFileId(7)]), PassFileId(-1));
        assert_eq!(PassFileId::next_local([PassFileId(-3), PassFileId(2)]), PassFileId(-4));
    }

    #[test]
    fn content_change_on_synced_marks_changed() {
        let mut pf = synced_file();
        pf.record_content_change(vec![9]).unwrap();
        assert_eq!(pf.state, LocalState::Changed { merged: false });
        assert_eq!(pf.version, 4);
        assert_eq!(pf.remote_version, Some(3));
    }

    #[test]
    fn content_change_keeps_created() {
        let mut pf = PassFile::new_local(PassFileId(-1), "New".into(), None, vec![]);
        pf.record_content_change(vec![1]).unwrap();
        assert_eq!(pf.state, LocalState::Created);
    }

    #[test]
    fn deleted_rejects_edits() {
        let mut pf = synced_file();
        pf.mark_deleted().unwrap();
        assert!(pf.record_content_change(vec![1]).is_err());
        assert!(pf.record_info_change("x".into(), None).is_err());
    }

    #[test]
    fn restore_returns_to_previous_state() {
        let mut pf = synced_file();
        pf.mark_deleted().unwrap();
        pf.restore().unwrap();
        assert_eq!(pf.state, LocalState::Synced);

        pf.record_info_change("Other".into(), None).unwrap();
        pf.mark_deleted().unwrap();
        assert_eq!(pf.state, LocalState::Deleted { was_changed: true });
        pf.restore().unwrap();
        assert_eq!(pf.state, LocalState::Changed { merged: false });

        assert!(pf.restore().is_err());
    }

    #[test]
    fn rollback_restores_origin() {
        let mut pf = synced_file();
        pf.record_content_change(vec![7, 7]).unwrap();
        pf.rollback().unwrap();
        assert_eq!(pf.data_encrypted, vec![1, 2, 3]);
        assert_eq!(pf.version, 3);
        assert_eq!(pf.state, LocalState::Synced);

        let mut created = PassFile::new_local(PassFileId(-1), "x".into(), None, vec![]);
        assert!(created.rollback().is_err());
    }

    #[test]
    fn persisted_form_has_no_sections() {
        let mut pf = synced_file();
        pf.sections = Some(vec![Section::new("secret", vec![SectionItem::new("pw", "hunter2")])]);
        let json = serde_json::to_string(&pf).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(pf.without_secrets().sections.is_none());

        let back: PassFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data_encrypted, pf.data_encrypted);
        assert_eq!(back.origin_encrypted, pf.origin_encrypted);
        assert_eq!(back.state, LocalState::Synced);
    }

    #[test]
    fn section_equality_ignores_mark() {
        let a = Section::new("Mail", vec![SectionItem::new("login", "me")]);
        let mut b = a.clone();
        b.mark = SectionMark::None;
        assert_eq!(a, b);
        b.items[0].value = "you".into();
        assert!(a.differs_from(&b));
    }

    #[test]
    fn status_lines_describe_state() {
        let mut pf = synced_file();
        assert_eq!(pf.status_lines(), vec!["OK".to_string()]);
        pf.problem = Some(Problem::new(ProblemKind::NeedsMerge));
        pf.state = LocalState::Changed { merged: true };
        let lines = pf.status_lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("needs merge"));
    }
}
