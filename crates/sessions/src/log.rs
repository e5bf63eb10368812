//! Append-only JSONL session log with branch navigation.
//!
//! Each session is a `<sessionId>.jsonl` file, one JSON entry per line, plus
//! a `<sessionId>.leaf` sidecar holding the id of the current leaf. The file
//! is the source of truth; an in-memory index maps ids to entries and
//! parents to children. Entries are never rewritten — navigation and
//! "deletion" are expressed purely by moving the leaf.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use coda_domain::entry::{Entry, EntryPayload, SessionMessage};
use coda_domain::error::{Error, Result};

/// A loaded session: entries in file order plus tree indexes.
pub struct SessionLog {
    session_id: String,
    path: PathBuf,
    leaf_path: PathBuf,
    entries: Vec<Entry>,
    /// id → position in `entries`.
    index: HashMap<Uuid, usize>,
    /// parent id → child ids, in append order.
    children: HashMap<Uuid, Vec<Uuid>>,
    leaf: Option<Uuid>,
}

impl SessionLog {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Construction
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Create a fresh, empty session under `dir`.
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(Error::Io)?;
        let session_id = Uuid::new_v4().to_string();
        let path = dir.join(format!("{session_id}.jsonl"));
        std::fs::File::create(&path).map_err(Error::Io)?;
        let leaf_path = path.with_extension("leaf");

        tracing::info!(session_id = %session_id, path = %path.display(), "session created");

        Ok(Self {
            session_id,
            leaf_path,
            path,
            entries: Vec::new(),
            index: HashMap::new(),
            children: HashMap::new(),
            leaf: None,
        })
    }

    /// Open an existing session file, validating and indexing every line.
    ///
    /// Malformed lines are skipped with a diagnostic. A partial trailing
    /// line (crash mid-append) is detected by its parse failure and
    /// discarded. Entries whose parent never resolves are skipped too;
    /// the file is topologically sorted, so a valid parent always appears
    /// first.
    pub fn open(path: &Path) -> Result<Self> {
        let session_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Session(format!("bad session path: {}", path.display())))?
            .to_owned();

        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut entries: Vec<Entry> = Vec::new();
        let mut index: HashMap<Uuid, usize> = HashMap::new();
        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

        let line_count = raw.lines().count();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: Entry = match serde_json::from_str(line) {
                Ok(e) => e,
                Err(e) => {
                    if lineno + 1 == line_count {
                        tracing::warn!(
                            session_id = %session_id,
                            error = %e,
                            "discarding partial trailing line"
                        );
                    } else {
                        tracing::warn!(
                            session_id = %session_id,
                            line = lineno + 1,
                            error = %e,
                            "skipping malformed session line"
                        );
                    }
                    continue;
                }
            };

            if let Some(parent) = entry.parent_id {
                if !index.contains_key(&parent) {
                    tracing::warn!(
                        session_id = %session_id,
                        entry_id = %entry.id,
                        parent_id = %parent,
                        "skipping entry with unresolved parent"
                    );
                    continue;
                }
            }
            if index.contains_key(&entry.id) {
                tracing::warn!(session_id = %session_id, entry_id = %entry.id, "skipping duplicate entry id");
                continue;
            }

            if let Some(parent) = entry.parent_id {
                children.entry(parent).or_default().push(entry.id);
            }
            index.insert(entry.id, entries.len());
            entries.push(entry);
        }

        let leaf_path = path.with_extension("leaf");
        let leaf = Self::read_leaf_sidecar(&leaf_path, &index)
            .or_else(|| entries.last().map(|e| e.id));

        tracing::debug!(
            session_id = %session_id,
            entries = entries.len(),
            leaf = ?leaf,
            "session loaded"
        );

        Ok(Self {
            session_id,
            path: path.to_path_buf(),
            leaf_path,
            entries,
            index,
            children,
            leaf,
        })
    }

    fn read_leaf_sidecar(leaf_path: &Path, index: &HashMap<Uuid, usize>) -> Option<Uuid> {
        let raw = std::fs::read_to_string(leaf_path).ok()?;
        let id = Uuid::parse_str(raw.trim()).ok()?;
        if index.contains_key(&id) {
            Some(id)
        } else {
            tracing::warn!(leaf = %id, "leaf sidecar points at unknown entry, falling back to tail");
            None
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Accessors
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The active branch terminator, if any entry exists.
    pub fn leaf(&self) -> Option<Uuid> {
        self.leaf
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Entry> {
        self.index.get(&id).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.index.contains_key(&id)
    }

    /// Child ids of an entry, in append order.
    pub fn children_of(&self, id: Uuid) -> &[Uuid] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Mutation
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Append one entry: validate its parent, write one line, update the
    /// indexes, and advance the leaf when the entry extends the active
    /// branch.
    pub fn append(&mut self, entry: Entry) -> Result<Uuid> {
        match entry.parent_id {
            Some(parent) => {
                if !self.index.contains_key(&parent) {
                    return Err(Error::DetachedParent(parent));
                }
            }
            None => {
                if !self.entries.is_empty() {
                    return Err(Error::Session(
                        "session already has a root entry".into(),
                    ));
                }
            }
        }
        if self.index.contains_key(&entry.id) {
            return Err(Error::Session(format!("duplicate entry id {}", entry.id)));
        }

        let mut line = serde_json::to_string(&entry).map_err(Error::Json)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(Error::Io)?;
        file.write_all(line.as_bytes()).map_err(Error::Io)?;

        let id = entry.id;
        if let Some(parent) = entry.parent_id {
            self.children.entry(parent).or_default().push(id);
        }
        self.index.insert(id, self.entries.len());
        self.entries.push(entry);

        // Advance the leaf only when the new entry extends the active branch.
        let extends_active = match (self.leaf, self.entries[self.index[&id]].parent_id) {
            (Some(leaf), Some(parent)) => leaf == parent,
            (None, None) => true,
            _ => false,
        };
        if extends_active {
            self.set_leaf(id)?;
        }

        Ok(id)
    }

    /// Move the active branch terminator. No entry is mutated; the leaf is
    /// stored in a small sidecar file written atomically.
    pub fn set_leaf(&mut self, id: Uuid) -> Result<()> {
        if !self.index.contains_key(&id) {
            return Err(Error::UnknownEntry(id));
        }
        self.leaf = Some(id);

        let tmp = self.leaf_path.with_extension("leaf.tmp");
        std::fs::write(&tmp, id.to_string()).map_err(Error::Io)?;
        std::fs::rename(&tmp, &self.leaf_path).map_err(Error::Io)?;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Branch navigation
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Entries from the root to `leaf_id`, in order.
    pub fn branch(&self, leaf_id: Uuid) -> Result<Vec<&Entry>> {
        let mut chain = Vec::new();
        let mut cursor = Some(leaf_id);
        while let Some(id) = cursor {
            let entry = self.get(id).ok_or(Error::UnknownEntry(id))?;
            chain.push(entry);
            // The parent chain cannot be longer than the file.
            if chain.len() > self.entries.len() {
                return Err(Error::Session(format!(
                    "cycle detected following parents from {leaf_id}"
                )));
            }
            cursor = entry.parent_id;
        }
        chain.reverse();
        Ok(chain)
    }

    /// The active branch (root to current leaf). Empty for a new session.
    pub fn active_branch(&self) -> Result<Vec<&Entry>> {
        match self.leaf {
            Some(leaf) => self.branch(leaf),
            None => Ok(Vec::new()),
        }
    }

    /// Fork: create a new session file containing every entry from the root
    /// to `at`, by reference (identical ids), with its leaf at `at`. The
    /// source session is never mutated.
    pub fn fork(&self, at: Uuid, dir: &Path) -> Result<SessionLog> {
        let chain = self.branch(at)?;

        std::fs::create_dir_all(dir).map_err(Error::Io)?;
        let session_id = Uuid::new_v4().to_string();
        let path = dir.join(format!("{session_id}.jsonl"));
        let leaf_path = path.with_extension("leaf");

        let mut buf = String::new();
        for entry in &chain {
            buf.push_str(&serde_json::to_string(entry).map_err(Error::Json)?);
            buf.push('\n');
        }
        std::fs::write(&path, buf).map_err(Error::Io)?;

        let mut forked = SessionLog {
            session_id,
            path,
            leaf_path,
            entries: chain.into_iter().cloned().collect(),
            index: HashMap::new(),
            children: HashMap::new(),
            leaf: None,
        };
        for (i, entry) in forked.entries.iter().enumerate() {
            forked.index.insert(entry.id, i);
            if let Some(parent) = entry.parent_id {
                forked.children.entry(parent).or_default().push(entry.id);
            }
        }
        forked.set_leaf(at)?;

        tracing::info!(
            source = %self.session_id,
            fork = %forked.session_id,
            at = %at,
            entries = forked.entries.len(),
            "session forked"
        );
        Ok(forked)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Late-binding lookups
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// The effective label for an entry: the last `label-change` targeting
    /// it on the active branch.
    pub fn label_for(&self, target: Uuid) -> Option<String> {
        let branch = self.active_branch().ok()?;
        branch.iter().rev().find_map(|e| match &e.payload {
            EntryPayload::LabelChange {
                target_entry_id,
                label,
            } if *target_entry_id == target => Some(label.clone()),
            _ => None,
        })?
    }

    /// The effective session name: the last `session-info` on the active
    /// branch.
    pub fn session_name(&self) -> Option<String> {
        let branch = self.active_branch().ok()?;
        branch.iter().rev().find_map(|e| match &e.payload {
            EntryPayload::SessionInfo { name } => Some(name.clone()),
            _ => None,
        })
    }

    /// Text of the last assistant message on the active branch.
    pub fn last_assistant_text(&self) -> Option<String> {
        let branch = self.active_branch().ok()?;
        branch.iter().rev().find_map(|e| match &e.payload {
            EntryPayload::Message {
                message: SessionMessage::Assistant { content, .. },
            } if !content.is_empty() => Some(content.clone()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coda_domain::entry::EntryPayload;

    fn new_log(tmp: &tempfile::TempDir) -> SessionLog {
        SessionLog::create(tmp.path()).unwrap()
    }

    #[test]
    fn append_advances_leaf_and_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = new_log(&tmp);

        let a = log.append(Entry::user_message(None, "one")).unwrap();
        let b = log
            .append(Entry::assistant_message(Some(a), "two", None, vec![], None))
            .unwrap();
        assert_eq!(log.leaf(), Some(b));

        let reloaded = SessionLog::open(log.path()).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.leaf(), Some(b));
        let branch = reloaded.active_branch().unwrap();
        assert_eq!(branch[0].id, a);
        assert_eq!(branch[1].id, b);
    }

    #[test]
    fn detached_parent_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = new_log(&tmp);
        log.append(Entry::user_message(None, "root")).unwrap();

        let orphan = Entry::user_message(Some(Uuid::new_v4()), "orphan");
        let err = log.append(orphan).unwrap_err();
        assert!(matches!(err, Error::DetachedParent(_)));
    }

    #[test]
    fn second_root_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = new_log(&tmp);
        log.append(Entry::user_message(None, "root")).unwrap();
        assert!(log.append(Entry::user_message(None, "root2")).is_err());
    }

    #[test]
    fn forks_share_a_parent_without_moving_the_leaf() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = new_log(&tmp);
        let a = log.append(Entry::user_message(None, "a")).unwrap();
        let b = log
            .append(Entry::assistant_message(Some(a), "b", None, vec![], None))
            .unwrap();

        // A sibling of b: same parent, does not extend the active branch.
        let c = log.append(Entry::user_message(Some(a), "c")).unwrap();
        assert_eq!(log.leaf(), Some(b));
        assert_eq!(log.children_of(a), &[b, c]);

        // Navigating to the sibling changes the active branch.
        log.set_leaf(c).unwrap();
        let branch = log.active_branch().unwrap();
        assert_eq!(branch.iter().map(|e| e.id).collect::<Vec<_>>(), vec![a, c]);
    }

    #[test]
    fn set_leaf_survives_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = new_log(&tmp);
        let a = log.append(Entry::user_message(None, "a")).unwrap();
        let _b = log
            .append(Entry::assistant_message(Some(a), "b", None, vec![], None))
            .unwrap();
        log.set_leaf(a).unwrap();

        let reloaded = SessionLog::open(log.path()).unwrap();
        assert_eq!(reloaded.leaf(), Some(a));
    }

    #[test]
    fn partial_trailing_line_is_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = new_log(&tmp);
        let a = log.append(Entry::user_message(None, "a")).unwrap();

        // Simulate a crash mid-append.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(log.path())
            .unwrap();
        file.write_all(b"{\"id\":\"truncat").unwrap();
        drop(file);

        let reloaded = SessionLog::open(log.path()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.leaf(), Some(a));
    }

    #[test]
    fn fork_copies_the_prefix_by_reference() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = new_log(&tmp);
        let a = log.append(Entry::user_message(None, "a")).unwrap();
        let b = log
            .append(Entry::assistant_message(Some(a), "b", None, vec![], None))
            .unwrap();
        let c = log.append(Entry::user_message(Some(b), "c")).unwrap();
        let d = log
            .append(Entry::assistant_message(Some(c), "d", None, vec![], None))
            .unwrap();
        assert_eq!(log.leaf(), Some(d));

        let fork_dir = tmp.path().join("forks");
        let mut fork = log.fork(b, &fork_dir).unwrap();
        assert_eq!(fork.leaf(), Some(b));
        assert_eq!(fork.len(), 2);
        // Same ids: copied by reference.
        assert!(fork.contains(a));
        assert!(fork.contains(b));
        assert!(!fork.contains(d));

        // Appending to the fork does not affect the source.
        let e = fork.append(Entry::user_message(Some(b), "e")).unwrap();
        assert_eq!(fork.leaf(), Some(e));
        assert_eq!(log.leaf(), Some(d));
        assert!(!log.contains(e));
    }

    #[test]
    fn labels_and_session_name_are_late_binding() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = new_log(&tmp);
        let a = log.append(Entry::user_message(None, "a")).unwrap();
        let l1 = log
            .append(Entry::new(
                Some(a),
                EntryPayload::LabelChange {
                    target_entry_id: a,
                    label: Some("first".into()),
                },
            ))
            .unwrap();
        assert_eq!(log.label_for(a).as_deref(), Some("first"));

        // A later change wins.
        log.append(Entry::new(
            Some(l1),
            EntryPayload::LabelChange {
                target_entry_id: a,
                label: None,
            },
        ))
        .unwrap();
        assert_eq!(log.label_for(a), None);

        assert_eq!(log.session_name(), None);
        let n = log
            .append(Entry::new(
                Some(log.leaf().unwrap()),
                EntryPayload::SessionInfo { name: "demo".into() },
            ))
            .unwrap();
        log.append(Entry::new(
            Some(n),
            EntryPayload::SessionInfo {
                name: "renamed".into(),
            },
        ))
        .unwrap();
        assert_eq!(log.session_name().as_deref(), Some("renamed"));
    }

    #[test]
    fn malformed_middle_line_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = new_log(&tmp);
        let a = log.append(Entry::user_message(None, "a")).unwrap();
        let raw = std::fs::read_to_string(log.path()).unwrap();
        let b = log.append(Entry::user_message(Some(a), "b")).unwrap();
        let tail = std::fs::read_to_string(log.path()).unwrap();
        let last_line = tail.strip_prefix(&raw).unwrap().to_owned();

        std::fs::write(
            log.path(),
            format!("{raw}not json at all\n{last_line}"),
        )
        .unwrap();

        let reloaded = SessionLog::open(log.path()).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains(a));
        assert!(reloaded.contains(b));
    }
}
