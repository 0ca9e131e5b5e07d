//! Sectioned, filtered view of the application list.
//!
//! `build` is pure: the same list, query and settings always produce the same
//! snapshot. Consumers replace their snapshot on every change and may diff the
//! old one against the new one.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::bundle::{AppId, AppRecord};
use crate::config::{DisplaySettings, SortOrder};

/// Semantic bucket an application falls into. Declaration order is display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Available,
    Installed,
    Unsupported,
    Ignored,
}

impl SectionKind {
    pub const ALL: [SectionKind; 4] = [
        SectionKind::Available,
        SectionKind::Installed,
        SectionKind::Unsupported,
        SectionKind::Ignored,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            SectionKind::Available => "Available Updates",
            SectionKind::Installed => "Installed",
            SectionKind::Unsupported => "Unsupported",
            SectionKind::Ignored => "Ignored",
        }
    }

    /// Bucket for one record
    pub fn of(app: &AppRecord) -> SectionKind {
        if app.ignored {
            SectionKind::Ignored
        } else if app.update_available {
            SectionKind::Available
        } else if !app.is_supported() {
            SectionKind::Unsupported
        } else {
            SectionKind::Installed
        }
    }

    fn is_visible(&self, settings: &DisplaySettings) -> bool {
        match self {
            SectionKind::Available => true,
            SectionKind::Installed => settings.show_installed,
            SectionKind::Unsupported => settings.show_unsupported,
            SectionKind::Ignored => settings.show_ignored,
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub kind: SectionKind,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEntry {
    Section(Section),
    App(Arc<AppRecord>),
}

impl SnapshotEntry {
    pub fn as_app(&self) -> Option<&Arc<AppRecord>> {
        match self {
            SnapshotEntry::App(app) => Some(app),
            SnapshotEntry::Section(_) => None,
        }
    }
}

/// Immutable projection of the application list
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    entries: Vec<SnapshotEntry>,
}

impl Snapshot {
    #[cfg(test)]
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Application entries in display order
    pub fn apps(&self) -> impl Iterator<Item = &Arc<AppRecord>> {
        self.entries.iter().filter_map(SnapshotEntry::as_app)
    }

    /// Number of entries, section markers included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Each present section with its applications
    pub fn sections(&self) -> Vec<(&Section, Vec<&Arc<AppRecord>>)> {
        let mut sections: Vec<(&Section, Vec<&Arc<AppRecord>>)> = Vec::new();
        for entry in &self.entries {
            match entry {
                SnapshotEntry::Section(section) => sections.push((section, Vec::new())),
                SnapshotEntry::App(app) => {
                    if let Some((_, apps)) = sections.last_mut() {
                        apps.push(app);
                    }
                }
            }
        }
        sections
    }

    /// Entry index of an application
    pub fn position_of(&self, id: &AppId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.as_app().is_some_and(|app| app.id == *id))
    }
}

/// Lowercased, trimmed filter query
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

fn matches(app: &AppRecord, query: &str) -> bool {
    query.is_empty() || app.name.to_lowercase().contains(query)
}

fn compare(a: &AppRecord, b: &AppRecord, order: SortOrder) -> Ordering {
    let by_name = || {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.id.cmp(&b.id))
    };
    match order {
        SortOrder::Name => by_name(),
        // Newest first, undated last
        SortOrder::UpdateDate => match (a.update_date(), b.update_date()) {
            (Some(a_date), Some(b_date)) => b_date.cmp(&a_date).then_with(by_name),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => by_name(),
        },
    }
}

/// Project `apps` into a sectioned snapshot.
pub fn build(apps: &[Arc<AppRecord>], query: &str, settings: &DisplaySettings) -> Snapshot {
    let query = normalize_query(query);

    let mut sorted: Vec<&Arc<AppRecord>> = apps.iter().collect();
    sorted.sort_by(|a, b| compare(a, b, settings.sort_order));

    let mut entries = Vec::new();
    for kind in SectionKind::ALL {
        if !kind.is_visible(settings) {
            continue;
        }
        let mut members = sorted
            .iter()
            .filter(|app| SectionKind::of(app) == kind && matches(app, &query))
            .peekable();
        if members.peek().is_none() {
            continue;
        }
        entries.push(SnapshotEntry::Section(Section {
            kind,
            title: kind.title().to_string(),
        }));
        entries.extend(members.map(|app| SnapshotEntry::App(Arc::clone(app))));
    }

    Snapshot { entries }
}
